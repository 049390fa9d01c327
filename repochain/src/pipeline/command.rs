//! Command rendering for chain nodes.
//!
//! Rendering is pure: the same invocation and configuration always yield
//! the same command string, so schedulers can use it for staleness checks.

use super::faults::{FaultPlan, MemorySize};
use crate::config::ChainConfig;
use crate::core::ArtifactRole;

/// Everything needed to render one node's command.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    /// Base name of the node; also the extraction directory.
    pub node: &'a str,
    /// Name of the packed input repository.
    pub input_repo: &'a str,
    /// Path to the pipeline definition file.
    pub pipeline_path: &'a str,
    /// Step subsets to run; empty runs the whole pipeline.
    pub subsets: &'a [String],
    /// Data selection predicate.
    pub where_clause: &'a str,
    /// Output CHAINED collection.
    pub chain: &'a str,
    /// Output RUN collection.
    pub output_run: &'a str,
    /// Injected faults.
    pub faults: &'a FaultPlan,
    /// Collection whose completed work is reused.
    pub skip_existing_in: Option<&'a str>,
    /// Write into an existing run.
    pub extend_run: bool,
    /// Overwrite existing outputs.
    pub clobber_outputs: bool,
    /// Memory ceiling per work unit.
    pub memory_ceiling: Option<&'a MemorySize>,
    /// Guard the engine call so a non-zero exit still packs the repository.
    pub expect_failure: bool,
}

/// Returns a command that packs a repository directory into a single-file
/// archive, with the repository files at the archive root, then removes
/// the directory.
#[must_use]
pub fn pack_repo_cmd(input_dir: &str, output_archive: &str) -> String {
    format!("tar -czf {output_archive} -C {input_dir} . && rm -rf {input_dir}")
}

/// Returns a command that unpacks a flat-root archive into a fresh directory.
#[must_use]
pub fn unpack_repo_cmd(source_archive: &str, output_dir: &str) -> String {
    format!(
        "rm -rf {output_dir} && mkdir {output_dir} && tar -C {output_dir} -xzf {}",
        shell_word(source_archive)
    )
}

/// Passes plain words through and double-quotes anything a shell would
/// split or expand.
#[must_use]
pub fn shell_word(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.starts_with(['#', '~'])
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=+,:@%#".contains(c));
    if plain {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

/// Double-quotes a value for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Renders node commands for one configuration.
#[derive(Debug, Clone, Copy)]
pub struct CommandRenderer<'a> {
    config: &'a ChainConfig,
}

impl<'a> CommandRenderer<'a> {
    /// Creates a renderer.
    #[must_use]
    pub const fn new(config: &'a ChainConfig) -> Self {
        Self { config }
    }

    /// Renders the full unpack / execute / pack command.
    #[must_use]
    pub fn render(&self, invocation: &Invocation<'_>) -> String {
        let repo = ArtifactRole::Repo.output_name(invocation.node);
        let engine = self.engine_cmd(invocation);
        let engine = if invocation.expect_failure {
            format!("{{ {engine} || true; }}")
        } else {
            engine
        };
        [
            unpack_repo_cmd(invocation.input_repo, invocation.node),
            engine,
            pack_repo_cmd(invocation.node, &repo),
        ]
        .join(" && ")
    }

    /// Renders only the engine invocation.
    #[must_use]
    pub fn engine_cmd(&self, invocation: &Invocation<'_>) -> String {
        let tools = &self.config.tools;
        let mut terms: Vec<String> = Vec::new();
        if let Some(prefix) = &tools.loader_env {
            terms.push(prefix.clone());
        }
        terms.push(shell_word(&tools.python));
        terms.push(shell_word(&tools.pipetask));
        terms.push("--long-log".to_string());
        terms.push(format!(
            "--log-file {}",
            ArtifactRole::Log.output_name(invocation.node)
        ));
        terms.push("--no-log-tty".to_string());
        terms.push("run".to_string());
        terms.push(format!("-b {}", invocation.node));

        let mut pipeline = invocation.pipeline_path.to_string();
        if !invocation.subsets.is_empty() {
            pipeline.push('#');
            pipeline.push_str(&invocation.subsets.join(","));
        }
        terms.push(format!("-p {}", shell_word(&pipeline)));
        terms.push(format!("-d {}", shell_quote(invocation.where_clause)));
        terms.push(format!("--input {}", shell_word(&self.config.defaults_collection)));
        terms.push(format!("--output {}", shell_word(invocation.chain)));
        terms.push(format!("--output-run {}", shell_word(invocation.output_run)));
        terms.push(format!(
            "--save-qgraph {}",
            ArtifactRole::Graph.output_name(invocation.node)
        ));
        terms.push("--register-dataset-types".to_string());
        terms.push("--mock".to_string());

        for rule in &invocation.faults.rules {
            terms.push(format!(
                "--mock-failure {}",
                shell_quote(&rule.render(&self.config.error_classes))
            ));
        }
        if let Some(collection) = invocation.skip_existing_in {
            terms.push(format!("--skip-existing-in {}", shell_word(collection)));
        }
        if invocation.extend_run {
            terms.push("--extend-run".to_string());
        }
        if invocation.clobber_outputs {
            terms.push("--clobber-outputs".to_string());
        }
        if let Some(ceiling) = invocation.memory_ceiling {
            terms.push(format!("--memory-per-quantum {ceiling}"));
        }
        if invocation.faults.raise_on_partial_outputs() {
            terms.push("--raise-on-partial-outputs".to_string());
        } else {
            terms.push("--no-raise-on-partial-outputs".to_string());
        }
        if !self.config.unmocked_dataset_types.is_empty() {
            terms.push(format!(
                "--unmocked-dataset-types {}",
                shell_quote(&self.config.unmocked_dataset_types.join(","))
            ));
        }
        if !self.config.coverage_packages.is_empty() {
            terms.push("--coverage".to_string());
            terms.push(format!(
                "--cov-packages {}",
                self.config.coverage_packages.join(",")
            ));
            terms.push("--no-cov-report".to_string());
        }
        terms.join(" ")
    }
}
