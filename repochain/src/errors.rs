//! Error types for repochain.
//!
//! Every failure the builder can report is synchronous: configuration
//! problems surface when a builder or step is registered, graph-shape
//! conflicts surface from `finish()`, and execution-boundary failures are
//! produced by exit-status classification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The main error type for repochain operations.
#[derive(Debug, Error)]
pub enum RepochainError {
    /// A pipeline, step, fault or template reference could not be resolved.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Two artifacts in one chain declare the same output.
    #[error("{0}")]
    DuplicateArtifactName(#[from] DuplicateArtifactNameError),

    /// The builder was used after `finish()`.
    #[error("{0}")]
    ExhaustedBuilder(#[from] ExhaustedBuilderError),

    /// The execution engine exited in a way the graph did not plan for.
    #[error("{0}")]
    ExecutionFailure(#[from] ExecutionFailure),

    /// The execution engine raised on partial outputs.
    #[error("{0}")]
    PartialOutputsReported(#[from] PartialOutputsReported),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RepochainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl RepochainError {
    /// Returns the contract error info attached to the error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::Configuration(e) => Some(&e.error_info),
            Self::DuplicateArtifactName(e) => Some(&e.error_info),
            Self::ExhaustedBuilder(e) => Some(&e.error_info),
            Self::ExecutionFailure(_)
            | Self::PartialOutputsReported(_)
            | Self::Serialization(_)
            | Self::Io(_) => None,
        }
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CHAIN-001-UNKNOWN_SUBSET").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline, step subset, task label, template or
/// fault plan cannot be resolved.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl ConfigurationError {
    /// Creates a new configuration error with the given code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_fix_hint(hint);
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_context_entry(key, value);
        self
    }

    /// Returns the error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }
}

/// Error raised by `finish()` when two nodes collide.
#[derive(Debug, Clone, Error)]
#[error("Duplicate artifact name '{name}' declared by {}", nodes.join(" and "))]
pub struct DuplicateArtifactNameError {
    /// The colliding output name (or composite step key).
    pub name: String,
    /// The node base names that declared it.
    pub nodes: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl DuplicateArtifactNameError {
    /// Creates a new duplicate artifact name error.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<String>) -> Self {
        let name = name.into();
        let info = ContractErrorInfo::new(
            "CHAIN-002-DUPLICATE",
            format!("Output '{name}' is declared more than once"),
        )
        .with_fix_hint("Give each (step, group) pair and each side-run label a distinct name.");
        Self {
            name,
            nodes,
            error_info: info,
        }
    }
}

/// Error raised when a finished builder is used again.
#[derive(Debug, Clone, Error)]
#[error("Chain builder for '{pipeline}' has already been finished")]
pub struct ExhaustedBuilderError {
    /// The pipeline name of the exhausted builder.
    pub pipeline: String,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl ExhaustedBuilderError {
    /// Creates a new exhausted builder error.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            error_info: ContractErrorInfo::new(
                "CHAIN-003-EXHAUSTED",
                "A chain builder can only be finished once",
            )
            .with_fix_hint("Construct a new ChainBuilder for every published graph."),
        }
    }
}

/// The execution engine returned an exit status the graph did not plan for.
#[derive(Debug, Clone, Error)]
#[error("Execution of '{node}' failed: {reason} (exit status {exit_code})")]
pub struct ExecutionFailure {
    /// Base name of the failing node.
    pub node: String,
    /// Raw exit status.
    pub exit_code: i32,
    /// Why the status was unexpected.
    pub reason: String,
}

impl ExecutionFailure {
    /// Creates a new execution failure.
    #[must_use]
    pub fn new(node: impl Into<String>, exit_code: i32, reason: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            exit_code,
            reason: reason.into(),
        }
    }
}

/// The engine reported partial outputs and was configured to raise on them.
#[derive(Debug, Clone, Error)]
#[error("Partial outputs reported by '{node}' for {}", task_labels.join(", "))]
pub struct PartialOutputsReported {
    /// Base name of the reporting node.
    pub node: String,
    /// Task labels whose quanta were injected with partial-output faults.
    pub task_labels: Vec<String>,
}

impl PartialOutputsReported {
    /// Creates a new partial-outputs report.
    #[must_use]
    pub fn new(node: impl Into<String>, task_labels: Vec<String>) -> Self {
        Self {
            node: node.into(),
            task_labels,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = RepochainError> = std::result::Result<T, E>;
