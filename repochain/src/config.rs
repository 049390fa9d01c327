//! Configuration for chain construction and command rendering.
//!
//! Collection templates, the defaults collection, unmocked dataset types
//! and tool locations are never read from globals; a `ChainConfig` is
//! handed to the builder explicitly.

use crate::errors::{ConfigurationError, RepochainError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

#[allow(clippy::expect_used)]
fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("valid placeholder regex"))
}

/// Locations of the external executables invoked by rendered commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// Python interpreter used to launch the engine.
    #[serde(default = "default_python")]
    pub python: String,
    /// Path to the pipeline execution engine entry point.
    #[serde(default = "default_pipetask")]
    pub pipetask: String,
    /// Optional environment prefix (e.g. a library loader path assignment)
    /// placed before the interpreter.
    #[serde(default)]
    pub loader_env: Option<String>,
}

fn default_python() -> String {
    "python".to_string()
}

fn default_pipetask() -> String {
    "pipetask".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            python: default_python(),
            pipetask: default_pipetask(),
            loader_env: None,
        }
    }
}

impl ToolPaths {
    /// Environment variable naming the engine's installation directory.
    pub const ENGINE_DIR_VAR: &'static str = "CTRL_MPEXEC_DIR";

    /// Derives tool paths from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `CTRL_MPEXEC_DIR` is unset.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Derives tool paths from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the engine directory is not set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let engine_dir = lookup(Self::ENGINE_DIR_VAR).ok_or_else(|| {
            ConfigurationError::new(
                "CHAIN-001-ENV",
                format!("Environment variable {} is not set", Self::ENGINE_DIR_VAR),
            )
            .with_fix_hint("Set up the engine package before building chains.")
        })?;
        Ok(Self {
            pipetask: format!("{}/bin/pipetask", engine_dir.trim_end_matches('/')),
            ..Self::default()
        })
    }

    /// Sets the loader environment prefix.
    #[must_use]
    pub fn with_loader_env(mut self, prefix: impl Into<String>) -> Self {
        self.loader_env = Some(prefix.into());
        self
    }
}

/// Exception class names injected for each failure mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClasses {
    /// Raised for hard failures.
    #[serde(default = "default_hard_error")]
    pub hard_error: String,
    /// Raised for partial-output failures, raised or qualified.
    #[serde(default = "default_partial_outputs")]
    pub partial_outputs: String,
    /// Raised for simulated memory exhaustion.
    #[serde(default = "default_memory_error")]
    pub memory_error: String,
}

fn default_hard_error() -> String {
    "ValueError".to_string()
}

fn default_partial_outputs() -> String {
    "lsst.pipe.base.AnnotatedPartialOutputsError".to_string()
}

fn default_memory_error() -> String {
    "MemoryError".to_string()
}

impl Default for ErrorClasses {
    fn default() -> Self {
        Self {
            hard_error: default_hard_error(),
            partial_outputs: default_partial_outputs(),
            memory_error: default_memory_error(),
        }
    }
}

/// Configuration for a [`ChainBuilder`](crate::pipeline::ChainBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Template for the output CHAINED collection; `{name}` is the pipeline name.
    #[serde(default = "default_chain_template")]
    pub chain_template: String,
    /// Template for RUN collections; `{name}` and `{suffix}` placeholders.
    #[serde(default = "default_run_template")]
    pub run_template: String,
    /// Input collection holding the defaults for every run.
    #[serde(default = "default_defaults_collection")]
    pub defaults_collection: String,
    /// Dataset types the engine must not mock.
    #[serde(default = "default_unmocked")]
    pub unmocked_dataset_types: Vec<String>,
    /// Packages to collect coverage for; empty disables coverage flags.
    #[serde(default)]
    pub coverage_packages: Vec<String>,
    /// Whether each node also depends on the pipeline definition file.
    #[serde(default)]
    pub track_pipeline_definition: bool,
    /// Exception classes used by fault injection.
    #[serde(default)]
    pub error_classes: ErrorClasses,
    /// External executables.
    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_chain_template() -> String {
    "{name}".to_string()
}

fn default_run_template() -> String {
    "{name}/{suffix}".to_string()
}

fn default_defaults_collection() -> String {
    "HSC/defaults".to_string()
}

fn default_unmocked() -> Vec<String> {
    vec!["skyMap".to_string()]
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_template: default_chain_template(),
            run_template: default_run_template(),
            defaults_collection: default_defaults_collection(),
            unmocked_dataset_types: default_unmocked(),
            coverage_packages: Vec::new(),
            track_pipeline_definition: false,
            error_classes: ErrorClasses::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl ChainConfig {
    /// Creates a default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from JSON, filling in defaults for absent fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the templates are malformed.
    pub fn from_json_str(json: &str) -> Result<Self, RepochainError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, RepochainError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Sets the collection templates.
    #[must_use]
    pub fn with_templates(mut self, chain: impl Into<String>, run: impl Into<String>) -> Self {
        self.chain_template = chain.into();
        self.run_template = run.into();
        self
    }

    /// Sets the defaults collection.
    #[must_use]
    pub fn with_defaults_collection(mut self, collection: impl Into<String>) -> Self {
        self.defaults_collection = collection.into();
        self
    }

    /// Enables coverage collection for the given packages.
    #[must_use]
    pub fn with_coverage(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.coverage_packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Makes every node depend on the pipeline definition file.
    #[must_use]
    pub fn tracking_pipeline_definition(mut self) -> Self {
        self.track_pipeline_definition = true;
        self
    }

    /// Sets the tool paths.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Checks that both templates only use known placeholders.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending template.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_template("chain_template", &self.chain_template, &["name"], &[])?;
        check_template("run_template", &self.run_template, &["name", "suffix"], &["suffix"])?;
        Ok(())
    }

    /// Renders the CHAINED collection name for a pipeline.
    #[must_use]
    pub fn chain_collection(&self, name: &str) -> String {
        fill_template(&self.chain_template, &[("name", name)])
    }

    /// Renders a RUN collection name.
    #[must_use]
    pub fn run_collection(&self, name: &str, suffix: &str) -> String {
        fill_template(&self.run_template, &[("name", name), ("suffix", suffix)])
    }
}

fn check_template(
    field: &str,
    template: &str,
    allowed: &[&str],
    required: &[&str],
) -> Result<(), ConfigurationError> {
    let mut seen = BTreeSet::new();
    for cap in placeholder_re().captures_iter(template) {
        let key = cap[1].to_string();
        if !allowed.contains(&key.as_str()) {
            return Err(ConfigurationError::new(
                "CHAIN-001-TEMPLATE",
                format!("Unknown placeholder '{{{key}}}' in {field} '{template}'"),
            )
            .with_fix_hint(format!("Allowed placeholders: {}", allowed.join(", "))));
        }
        seen.insert(key);
    }
    for key in required {
        if !seen.contains(*key) {
            return Err(ConfigurationError::new(
                "CHAIN-001-TEMPLATE",
                format!("{field} '{template}' must contain '{{{key}}}'"),
            ));
        }
    }
    Ok(())
}

fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    placeholder_re()
        .replace_all(template, |cap: &regex::Captures<'_>| {
            values
                .iter()
                .find(|(key, _)| *key == &cap[1])
                .map_or_else(|| cap[0].to_string(), |(_, value)| (*value).to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let config = ChainConfig::default();
        assert_eq!(config.chain_collection("RC2"), "RC2");
        assert_eq!(config.run_collection("RC2", "step1/attempt1"), "RC2/step1/attempt1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_templates() {
        let config = ChainConfig::new().with_templates("HSC/runs/{name}", "HSC/runs/{name}/{suffix}");
        assert_eq!(config.chain_collection("RC2"), "HSC/runs/RC2");
        assert_eq!(config.run_collection("RC2", "step5"), "HSC/runs/RC2/step5");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let config = ChainConfig::new().with_templates("{pipeline}", "{name}/{suffix}");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CHAIN-001-TEMPLATE");
        assert!(err.message.contains("chain_template"));
    }

    #[test]
    fn test_run_template_requires_suffix() {
        let config = ChainConfig::new().with_templates("{name}", "{name}/only");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ChainConfig::from_json_str(
            r#"{"defaults_collection": "LSSTCam/defaults", "tools": {"pipetask": "/opt/bin/pipetask"}}"#,
        )
        .unwrap();
        assert_eq!(config.defaults_collection, "LSSTCam/defaults");
        assert_eq!(config.tools.pipetask, "/opt/bin/pipetask");
        assert_eq!(config.tools.python, "python");
        assert_eq!(config.run_template, "{name}/{suffix}");
        assert_eq!(config.unmocked_dataset_types, vec!["skyMap".to_string()]);
    }

    #[test]
    fn test_from_json_rejects_bad_template() {
        let result = ChainConfig::from_json_str(r#"{"run_template": "{name}"}"#);
        assert!(matches!(result, Err(RepochainError::Configuration(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.json");
        std::fs::write(&path, r#"{"coverage_packages": ["lsst.daf.butler"]}"#).unwrap();
        let config = ChainConfig::from_path(&path).unwrap();
        assert_eq!(config.coverage_packages, vec!["lsst.daf.butler".to_string()]);
    }

    #[test]
    fn test_tool_paths_from_lookup() {
        let tools = ToolPaths::from_lookup(|key| {
            (key == "CTRL_MPEXEC_DIR").then(|| "/stack/ctrl_mpexec/".to_string())
        })
        .unwrap();
        assert_eq!(tools.pipetask, "/stack/ctrl_mpexec/bin/pipetask");

        let missing = ToolPaths::from_lookup(|_| None);
        assert_eq!(missing.unwrap_err().code(), "CHAIN-001-ENV");
    }
}
