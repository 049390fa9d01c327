//! Testing utilities for chains.
//!
//! This module provides:
//! - A small mock pipeline definition and builders over it
//! - Recording and failing build schedulers
//! - Assertions over finished artifact lists

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_depends_on, assert_independent, assert_unique_names, count_fault_args, find_artifact,
};
pub use fixtures::{rc2_builder, rc2_definition, write_pipeline, BASE_REPO, RC2_PIPELINE};
pub use mocks::{FailingScheduler, RecordingScheduler};
