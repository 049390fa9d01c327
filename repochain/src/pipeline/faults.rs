//! Fault injection plans.
//!
//! A [`FaultPlan`] names the work units that should fail during an
//! otherwise real execution and how they fail. An optional
//! [`MemoryEscalation`] turns one registration into a planned
//! fail-then-rescue pair of nodes.

use crate::config::ErrorClasses;
use crate::definition::TaskSelection;
use crate::errors::ConfigurationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn memory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*(B|KB|MB|GB|TB|KiB|MiB|GiB|TiB)?\s*$").expect("valid memory regex")
    })
}

/// A memory ceiling as written on the engine command line.
///
/// The spelling as written is kept for rendering; comparisons use bytes.
/// A bare number is taken as megabytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemorySize {
    text: String,
    bytes: u64,
}

impl MemorySize {
    /// Parses a size such as `512MB` or `4GiB`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unrecognised spellings.
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let invalid = || {
            ConfigurationError::new("CHAIN-001-MEMORY", format!("Invalid memory size '{text}'"))
                .with_fix_hint("Use an integer with an optional unit, e.g. 512MB or 4GiB.")
        };
        let caps = memory_re().captures(text).ok_or_else(invalid)?;
        let value: u64 = caps[1].parse().map_err(|_| invalid())?;
        let scale: u64 = match caps.get(2).map(|m| m.as_str()) {
            Some("B") => 1,
            Some("KB") => 1_000,
            None | Some("MB") => 1_000_000,
            Some("GB") => 1_000_000_000,
            Some("TB") => 1_000_000_000_000,
            Some("KiB") => 1 << 10,
            Some("MiB") => 1 << 20,
            Some("GiB") => 1 << 30,
            Some("TiB") => 1 << 40,
            Some(_) => return Err(invalid()),
        };
        Ok(Self {
            text: text.trim().to_string(),
            bytes: value.checked_mul(scale).ok_or_else(invalid)?,
        })
    }

    /// The size in bytes.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The size as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for MemorySize {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemorySize {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MemorySize> for String {
    fn from(size: MemorySize) -> Self {
        size.text
    }
}

impl PartialEq for MemorySize {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for MemorySize {}

impl PartialOrd for MemorySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemorySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How an injected fault manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// The work unit raises and produces nothing.
    HardError,
    /// The work unit reports partial outputs and the engine raises on them.
    PartialOutputsRaised,
    /// The work unit reports partial outputs and the engine carries on.
    PartialOutputsQualified,
    /// The work unit runs out of memory whenever the attempt's ceiling is
    /// below `memory_required`.
    ResourceExhaustion {
        /// Memory the work unit needs to succeed.
        memory_required: MemorySize,
    },
}

impl FailureMode {
    const fn is_partial(&self) -> bool {
        matches!(self, Self::PartialOutputsRaised | Self::PartialOutputsQualified)
    }
}

/// One injected fault: which work units fail and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    /// Label of the task whose work units fail.
    pub task_label: String,
    /// Predicate selecting the failing work units; empty means all of them.
    #[serde(default, rename = "where")]
    pub where_clause: String,
    /// How the fault manifests.
    pub mode: FailureMode,
    /// Overrides the exception class configured for `mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

impl FaultRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(task_label: impl Into<String>, where_clause: impl Into<String>, mode: FailureMode) -> Self {
        Self {
            task_label: task_label.into(),
            where_clause: where_clause.into(),
            mode,
            error_class: None,
        }
    }

    /// A hard failure.
    #[must_use]
    pub fn hard_error(task_label: impl Into<String>, where_clause: impl Into<String>) -> Self {
        Self::new(task_label, where_clause, FailureMode::HardError)
    }

    /// Partial outputs that halt the run.
    #[must_use]
    pub fn partial_outputs_raised(task_label: impl Into<String>, where_clause: impl Into<String>) -> Self {
        Self::new(task_label, where_clause, FailureMode::PartialOutputsRaised)
    }

    /// Partial outputs that the run tolerates.
    #[must_use]
    pub fn partial_outputs_qualified(task_label: impl Into<String>, where_clause: impl Into<String>) -> Self {
        Self::new(task_label, where_clause, FailureMode::PartialOutputsQualified)
    }

    /// A simulated out-of-memory failure.
    #[must_use]
    pub fn memory_exhaustion(
        task_label: impl Into<String>,
        where_clause: impl Into<String>,
        memory_required: MemorySize,
    ) -> Self {
        Self::new(task_label, where_clause, FailureMode::ResourceExhaustion { memory_required })
    }

    /// Overrides the exception class.
    #[must_use]
    pub fn with_error_class(mut self, error_class: impl Into<String>) -> Self {
        self.error_class = Some(error_class.into());
        self
    }

    /// The exception class injected for this rule.
    #[must_use]
    pub fn error_class<'a>(&'a self, classes: &'a ErrorClasses) -> &'a str {
        if let Some(class) = &self.error_class {
            return class;
        }
        match self.mode {
            FailureMode::HardError => &classes.hard_error,
            FailureMode::PartialOutputsRaised | FailureMode::PartialOutputsQualified => {
                &classes.partial_outputs
            }
            FailureMode::ResourceExhaustion { .. } => &classes.memory_error,
        }
    }

    /// Renders the engine's `label:class:where[:memory]` argument value.
    #[must_use]
    pub fn render(&self, classes: &ErrorClasses) -> String {
        let mut value = format!(
            "{}:{}:{}",
            self.task_label,
            self.error_class(classes),
            self.where_clause
        );
        if let FailureMode::ResourceExhaustion { memory_required } = &self.mode {
            value.push(':');
            value.push_str(memory_required.as_str());
        }
        value
    }

    /// Whether the rule makes an attempt with `ceiling` exit non-zero.
    #[must_use]
    pub fn fails_under(&self, ceiling: Option<&MemorySize>) -> bool {
        match &self.mode {
            FailureMode::HardError | FailureMode::PartialOutputsRaised => true,
            FailureMode::PartialOutputsQualified => false,
            FailureMode::ResourceExhaustion { memory_required } => {
                ceiling.map_or(true, |ceiling| ceiling < memory_required)
            }
        }
    }
}

/// Memory ceilings for a planned fail-then-rescue pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEscalation {
    /// Ceiling for the first attempt, expected to run out of memory.
    pub initial: MemorySize,
    /// Ceiling for the automatic retry, expected to succeed.
    pub retry: MemorySize,
}

impl MemoryEscalation {
    /// Creates an escalation pair.
    #[must_use]
    pub const fn new(initial: MemorySize, retry: MemorySize) -> Self {
        Self { initial, retry }
    }

    /// Parses both ceilings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either size is invalid.
    pub fn parse(initial: &str, retry: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::new(MemorySize::parse(initial)?, MemorySize::parse(retry)?))
    }
}

/// The faults injected into one step, plus optional retry escalation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Injected faults.
    #[serde(default)]
    pub rules: Vec<FaultRule>,
    /// Memory escalation for automatic retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<MemoryEscalation>,
}

impl FaultPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: FaultRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Adds a hard-error rule.
    #[must_use]
    pub fn fail(self, task_label: impl Into<String>, where_clause: impl Into<String>) -> Self {
        self.with_rule(FaultRule::hard_error(task_label, where_clause))
    }

    /// Sets the retry escalation.
    #[must_use]
    pub fn with_escalation(mut self, escalation: MemoryEscalation) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// Whether the plan injects nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.escalation.is_none()
    }

    /// Whether the engine is told to raise on partial outputs.
    #[must_use]
    pub fn raise_on_partial_outputs(&self) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.mode == FailureMode::PartialOutputsRaised)
    }

    /// Task labels with partial-output faults, deduplicated in rule order.
    #[must_use]
    pub fn partial_output_tasks(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for rule in self.rules.iter().filter(|rule| rule.mode.is_partial()) {
            if !labels.contains(&rule.task_label) {
                labels.push(rule.task_label.clone());
            }
        }
        labels
    }

    /// Whether an attempt capped at `ceiling` is expected to exit non-zero.
    #[must_use]
    pub fn expects_failure(&self, ceiling: Option<&MemorySize>) -> bool {
        self.rules.iter().any(|rule| rule.fails_under(ceiling))
    }

    /// Rules simulating memory exhaustion.
    pub fn memory_rules(&self) -> impl Iterator<Item = &FaultRule> {
        self.rules
            .iter()
            .filter(|rule| matches!(rule.mode, FailureMode::ResourceExhaustion { .. }))
    }

    /// The plan carried by the rescue attempt: only the memory rules.
    #[must_use]
    pub fn rescue_plan(&self) -> Self {
        Self {
            rules: self.memory_rules().cloned().collect(),
            escalation: None,
        }
    }

    /// The selection for the rescue attempt: the step's own predicate
    /// restricted to the work units of the memory rules.
    #[must_use]
    pub fn rescue_where(&self, step_where: &str) -> String {
        let predicates: Vec<&str> = self
            .memory_rules()
            .map(|rule| rule.where_clause.trim())
            .collect();
        conjoin(step_where.trim(), &predicates)
    }

    /// Checks the plan against the tasks selected by its owning step.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a rule targets an unselected task,
    /// raised and qualified partial outputs are mixed, or the escalation
    /// ceilings cannot produce a fail-then-rescue pair.
    pub fn validate(&self, selection: &TaskSelection) -> Result<(), ConfigurationError> {
        for rule in &self.rules {
            if rule.task_label.is_empty() || rule.task_label.contains(':') {
                return Err(ConfigurationError::new(
                    "CHAIN-001-FAULT",
                    format!("Invalid fault task label '{}'", rule.task_label),
                ));
            }
            if !selection.contains(&rule.task_label) {
                return Err(ConfigurationError::new(
                    "CHAIN-001-FAULT_TARGET",
                    format!(
                        "Fault targets task '{}', which the step does not select",
                        rule.task_label
                    ),
                )
                .with_fix_hint("Only inject faults into tasks run by the same step.")
                .with_context_entry("task", rule.task_label.clone()));
            }
        }

        let raised = self.rules.iter().any(|r| r.mode == FailureMode::PartialOutputsRaised);
        let qualified = self.rules.iter().any(|r| r.mode == FailureMode::PartialOutputsQualified);
        if raised && qualified {
            return Err(ConfigurationError::new(
                "CHAIN-001-PARTIAL_MIX",
                "A fault plan cannot both raise and tolerate partial outputs",
            )
            .with_fix_hint("Split the faults across two side runs."));
        }

        if let Some(escalation) = &self.escalation {
            if escalation.retry <= escalation.initial {
                return Err(ConfigurationError::new(
                    "CHAIN-001-ESCALATION",
                    format!(
                        "Retry ceiling {} must exceed initial ceiling {}",
                        escalation.retry, escalation.initial
                    ),
                ));
            }
            for rule in self.memory_rules() {
                if let FailureMode::ResourceExhaustion { memory_required } = &rule.mode {
                    if *memory_required <= escalation.initial || *memory_required > escalation.retry {
                        return Err(ConfigurationError::new(
                            "CHAIN-001-ESCALATION",
                            format!(
                                "Task '{}' needs {memory_required}, outside ({}, {}]",
                                rule.task_label, escalation.initial, escalation.retry
                            ),
                        )
                        .with_fix_hint("The first attempt must run out of memory and the retry must not."));
                    }
                }
            }
        }
        Ok(())
    }
}

fn conjoin(base: &str, alternatives: &[&str]) -> String {
    let restriction = if alternatives.is_empty() || alternatives.iter().any(|a| a.is_empty()) {
        None
    } else if alternatives.len() == 1 {
        Some(alternatives[0].to_string())
    } else {
        Some(
            alternatives
                .iter()
                .map(|a| format!("({a})"))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    };
    match (base.is_empty(), restriction) {
        (true, None) => String::new(),
        (false, None) => base.to_string(),
        (true, Some(restriction)) => restriction,
        (false, Some(restriction)) => format!("({base}) AND ({restriction})"),
    }
}
