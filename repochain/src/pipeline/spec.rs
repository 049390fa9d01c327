//! Step specifications.

use super::faults::FaultPlan;
use serde::{Deserialize, Serialize};

/// Describes one invocation of the execution engine.
///
/// The same value is used for main-chain steps and side runs; side runs
/// are named by their label instead of `(step, group)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step subsets (or task labels) to run; empty runs the whole pipeline.
    #[serde(default)]
    pub subsets: Vec<String>,
    /// Partition label when one step is split across several graphs.
    #[serde(default)]
    pub group: Option<String>,
    /// Data selection predicate, passed through uninterpreted.
    #[serde(default, rename = "where")]
    pub where_clause: String,
    /// Injected faults.
    #[serde(default)]
    pub faults: FaultPlan,
    /// Reuse results already in the output chain instead of recomputing.
    #[serde(default)]
    pub skip_existing_in_last: bool,
    /// Write into the previous main-chain output run.
    #[serde(default)]
    pub extend_run: bool,
    /// Overwrite outputs that already exist.
    #[serde(default)]
    pub clobber_outputs: bool,
    /// Overrides the exit expectation derived from `faults`.
    #[serde(default)]
    pub expect_failure: Option<bool>,
}

impl StepSpec {
    /// Runs the whole pipeline.
    #[must_use]
    pub fn full_pipeline() -> Self {
        Self::default()
    }

    /// Runs a single step subset.
    #[must_use]
    pub fn step(name: impl Into<String>) -> Self {
        Self {
            subsets: vec![name.into()],
            ..Self::default()
        }
    }

    /// Runs several step subsets back to back in one invocation.
    #[must_use]
    pub fn subsets(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            subsets: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the group label.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the data selection predicate.
    #[must_use]
    pub fn with_where(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = where_clause.into();
        self
    }

    /// Sets the fault plan.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Skips work already present in the output chain.
    #[must_use]
    pub fn skip_existing_in_last(mut self) -> Self {
        self.skip_existing_in_last = true;
        self
    }

    /// Extends the previous main-chain run.
    #[must_use]
    pub fn extend_run(mut self) -> Self {
        self.extend_run = true;
        self
    }

    /// Clobbers existing outputs.
    #[must_use]
    pub fn clobber_outputs(mut self) -> Self {
        self.clobber_outputs = true;
        self
    }

    /// Declares whether the command is expected to exit non-zero.
    #[must_use]
    pub fn expect_failure(mut self, expected: bool) -> Self {
        self.expect_failure = Some(expected);
        self
    }

    /// The step name used in artifact and collection names.
    #[must_use]
    pub fn step_name(&self) -> String {
        if self.subsets.is_empty() {
            "run".to_string()
        } else {
            self.subsets.join("+")
        }
    }
}
