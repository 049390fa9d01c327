//! Pipeline definition files.
//!
//! Only the parts of a pipeline YAML document that the chain needs are
//! read: the task labels and the named subsets grouping them into steps.

use crate::errors::ConfigurationError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    imports: Option<serde_yaml::Value>,
    #[serde(default)]
    tasks: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    subsets: BTreeMap<String, RawSubset>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSubset {
    Labels(Vec<String>),
    Detailed { subset: Vec<String> },
}

impl RawSubset {
    fn into_labels(self) -> Vec<String> {
        match self {
            Self::Labels(labels) | Self::Detailed { subset: labels } => labels,
        }
    }
}

/// Task labels and step subsets declared by a pipeline file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDefinition {
    tasks: BTreeSet<String>,
    subsets: BTreeMap<String, Vec<String>>,
    has_imports: bool,
}

/// The task labels selected by a list of step subsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSelection {
    labels: BTreeSet<String>,
    open: bool,
}

impl TaskSelection {
    /// Whether `label` may be selected.
    ///
    /// An open selection (one involving imported tasks) accepts any label.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.open || self.labels.contains(label)
    }

    /// The labels known to be selected.
    #[must_use]
    pub const fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    /// Whether the selection could not be fully resolved locally.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }
}

impl PipelineDefinition {
    /// Reads a pipeline file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path does not resolve or the
    /// document is malformed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::new(
                "CHAIN-001-PIPELINE",
                format!("Pipeline definition '{}' does not resolve: {e}", path.display()),
            )
            .with_context_entry("path", path.display().to_string())
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parses a pipeline document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the YAML is invalid or a subset
    /// names an undeclared task.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let raw: RawDefinition = serde_yaml::from_str(yaml).map_err(|e| {
            ConfigurationError::new("CHAIN-001-PIPELINE", format!("Invalid pipeline definition: {e}"))
        })?;

        let definition = Self {
            tasks: raw.tasks.into_keys().collect(),
            subsets: raw
                .subsets
                .into_iter()
                .map(|(name, subset)| (name, subset.into_labels()))
                .collect(),
            has_imports: raw.imports.is_some_and(|v| !v.is_null()),
        };

        if !definition.has_imports {
            for (name, labels) in &definition.subsets {
                if let Some(missing) = labels.iter().find(|l| !definition.tasks.contains(*l)) {
                    return Err(ConfigurationError::new(
                        "CHAIN-001-UNKNOWN_TASK",
                        format!("Subset '{name}' names unknown task '{missing}'"),
                    )
                    .with_context_entry("subset", name.clone()));
                }
            }
        }

        Ok(definition)
    }

    /// Builds a definition directly from task labels and subsets.
    #[must_use]
    pub fn from_parts(
        tasks: impl IntoIterator<Item = impl Into<String>>,
        subsets: impl IntoIterator<Item = (String, Vec<String>)>,
    ) -> Self {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
            subsets: subsets.into_iter().collect(),
            has_imports: false,
        }
    }

    /// Declared task labels.
    #[must_use]
    pub const fn tasks(&self) -> &BTreeSet<String> {
        &self.tasks
    }

    /// Whether a named subset exists.
    #[must_use]
    pub fn has_subset(&self, name: &str) -> bool {
        self.subsets.contains_key(name)
    }

    /// Whether the document imports other pipelines.
    #[must_use]
    pub const fn has_imports(&self) -> bool {
        self.has_imports
    }

    /// Expands subset names (or bare task labels) to the selected tasks.
    ///
    /// An empty list selects the whole pipeline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for names that are neither a subset
    /// nor a task label, unless the document has imports.
    pub fn resolve_labels(&self, names: &[String]) -> Result<TaskSelection, ConfigurationError> {
        if names.is_empty() {
            return Ok(TaskSelection {
                labels: self.tasks.clone(),
                open: self.has_imports,
            });
        }

        let mut selection = TaskSelection::default();
        for name in names {
            if let Some(members) = self.subsets.get(name) {
                selection.labels.extend(members.iter().cloned());
            } else if self.tasks.contains(name) {
                selection.labels.insert(name.clone());
            } else if self.has_imports {
                tracing::warn!(name = %name, "step reference not declared locally; skipping label checks");
                selection.open = true;
            } else {
                return Err(ConfigurationError::new(
                    "CHAIN-001-UNKNOWN_SUBSET",
                    format!("Unresolvable step reference '{name}'"),
                )
                .with_fix_hint("Use a subset or task label declared in the pipeline definition.")
                .with_context_entry("step", name.clone()));
            }
        }
        Ok(selection)
    }
}
