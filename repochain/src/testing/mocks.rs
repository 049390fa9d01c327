//! Mock build schedulers for testing.

use crate::errors::{ConfigurationError, RepochainError};
use crate::pipeline::{BuildRule, BuildScheduler};

/// A scheduler that records every rule it receives.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    rules: Vec<BuildRule>,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules received so far, in registration order.
    #[must_use]
    pub fn rules(&self) -> &[BuildRule] {
        &self.rules
    }

    /// Repository outputs received so far.
    #[must_use]
    pub fn repos(&self) -> Vec<&str> {
        self.rules.iter().map(BuildRule::repo).collect()
    }
}

impl BuildScheduler for RecordingScheduler {
    fn register(&mut self, rule: &BuildRule) -> Result<(), RepochainError> {
        self.rules.push(rule.clone());
        Ok(())
    }
}

/// A scheduler that rejects one named repository output.
#[derive(Debug)]
pub struct FailingScheduler {
    reject: String,
    accepted: usize,
}

impl FailingScheduler {
    /// Creates a scheduler rejecting the rule whose repository is `reject`.
    #[must_use]
    pub fn new(reject: impl Into<String>) -> Self {
        Self {
            reject: reject.into(),
            accepted: 0,
        }
    }

    /// Number of rules accepted before the rejection.
    #[must_use]
    pub const fn accepted(&self) -> usize {
        self.accepted
    }
}

impl BuildScheduler for FailingScheduler {
    fn register(&mut self, rule: &BuildRule) -> Result<(), RepochainError> {
        if rule.repo() == self.reject {
            return Err(ConfigurationError::new(
                "SCHED-REJECTED",
                format!("Scheduler rejected '{}'", rule.repo()),
            )
            .into());
        }
        self.accepted += 1;
        Ok(())
    }
}
