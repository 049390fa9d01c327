//! # Repochain
//!
//! Builds the artifact dependency graph for a chain of pipeline runs
//! against packed data repositories.
//!
//! Each registered step becomes one node producing three artifacts: the
//! packed output repository, the saved run graph and the engine log. Main
//! chain steps consume the previous step's repository; side runs branch
//! off the current head without becoming part of the chain. Fault plans
//! inject planned failures, and a memory escalation expands into a
//! fail-then-rescue pair of nodes. The builder never executes anything:
//! `finish()` hands the artifacts to an external build scheduler.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use repochain::prelude::*;
//!
//! let mut chain = ChainBuilder::new(
//!     "RC2",
//!     "pipelines/RC2.yaml",
//!     Artifact::external("base-repo"),
//!     ChainConfig::default(),
//! )?;
//! chain.extend(StepSpec::step("step1").with_where("band='r'"))?;
//! chain.add_side_run(
//!     "rescue-test",
//!     StepSpec::subsets(["isr"]).with_faults(FaultPlan::new().fail("isr", "exposure=1")),
//! )?;
//! chain.extend(StepSpec::step("step2a"))?;
//!
//! let rules = BuildRule::from_artifacts(&chain.finish()?)?;
//! scheduler.register_all(&rules)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod definition;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ChainConfig, ErrorClasses, ToolPaths};
    pub use crate::core::{classify_exit, Artifact, ArtifactRole, ExitExpectation, RunOutcome};
    pub use crate::definition::{PipelineDefinition, TaskSelection};
    pub use crate::errors::{
        ConfigurationError, ContractErrorInfo, DuplicateArtifactNameError, ExecutionFailure,
        ExhaustedBuilderError, PartialOutputsReported, RepochainError,
    };
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        BuildManifest, BuildRule, BuildScheduler, ChainBuilder, FailureMode, FaultPlan, FaultRule,
        MemoryEscalation, MemorySize, StepSpec,
    };
}
