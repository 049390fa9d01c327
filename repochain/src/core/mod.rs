//! Core domain model types for repochain.
//!
//! - Artifacts and their roles
//! - Exit expectations and classification of engine exit statuses

mod artifact;
mod status;

pub use artifact::{Artifact, ArtifactRole};
pub use status::{classify_exit, ExitExpectation, RunOutcome};
