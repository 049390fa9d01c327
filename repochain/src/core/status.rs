//! Exit expectations and exit-status classification.
//!
//! The graph decides before execution how each command is allowed to
//! exit. Classification only compares an observed status against that plan;
//! it never triggers a retry.

use super::Artifact;
use crate::errors::{ExecutionFailure, PartialOutputsReported, RepochainError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a node's command is planned to exit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitExpectation {
    /// The command is expected to exit non-zero.
    pub expect_failure: bool,
    /// The engine was told to raise on partial outputs.
    pub raise_on_partial_outputs: bool,
    /// Task labels with injected partial-output faults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_output_tasks: Vec<String>,
}

/// Result of a command whose exit status matched its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Exit 0 and no partial outputs were injected.
    Succeeded,
    /// Exit 0 with partial outputs tolerated; downstream work may find
    /// nothing to do for the affected work units.
    QualifiedSuccess,
    /// Non-zero exit that the node declared in advance.
    ExpectedFailure,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::QualifiedSuccess => write!(f, "qualified_success"),
            Self::ExpectedFailure => write!(f, "expected_failure"),
        }
    }
}

/// Classifies the exit status of the command producing `artifact`.
///
/// # Errors
///
/// Returns `PartialOutputsReported` when the engine raised on injected
/// partial outputs that the node did not expect, and `ExecutionFailure`
/// for any other unplanned status (including an expected failure that
/// exited 0).
pub fn classify_exit(artifact: &Artifact, exit_code: i32) -> Result<RunOutcome, RepochainError> {
    let Some(expectation) = artifact.expectation() else {
        return Err(ExecutionFailure::new(
            artifact.node(),
            exit_code,
            "external artifacts are not executed by the chain",
        )
        .into());
    };

    match (exit_code, expectation.expect_failure) {
        (0, true) => {
            tracing::warn!(node = artifact.node(), "command succeeded but failure was expected");
            Err(ExecutionFailure::new(artifact.node(), 0, "expected failure but succeeded").into())
        }
        (0, false) if !expectation.partial_output_tasks.is_empty() => Ok(RunOutcome::QualifiedSuccess),
        (0, false) => Ok(RunOutcome::Succeeded),
        (_, true) => Ok(RunOutcome::ExpectedFailure),
        (code, false) if expectation.raise_on_partial_outputs => {
            tracing::debug!(node = artifact.node(), code, "partial outputs raised");
            Err(PartialOutputsReported::new(
                artifact.node(),
                expectation.partial_output_tasks.clone(),
            )
            .into())
        }
        (code, false) => Err(ExecutionFailure::new(artifact.node(), code, "unexpected non-zero exit").into()),
    }
}
