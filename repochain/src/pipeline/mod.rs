//! Chain construction.
//!
//! This module provides:
//! - Step specifications and fault plans
//! - The chain builder
//! - Command rendering for the execution engine
//! - Build rules for external schedulers

mod builder;
mod command;
mod faults;
mod rules;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::ChainBuilder;
pub use command::{
    pack_repo_cmd, shell_quote, shell_word, unpack_repo_cmd, CommandRenderer, Invocation,
};
pub use faults::{FailureMode, FaultPlan, FaultRule, MemoryEscalation, MemorySize};
pub use rules::{command_fingerprint, BuildManifest, BuildRule, BuildScheduler};
pub use spec::StepSpec;
