//! Build rules handed to an external scheduler.
//!
//! A finished chain is a flat list of artifacts; schedulers want one rule
//! per command. [`BuildRule::from_artifacts`] regroups the three outputs of
//! each node and [`BuildManifest`] serialises the result as JSON.

use crate::core::{Artifact, ArtifactRole, ExitExpectation};
use crate::errors::{ConfigurationError, RepochainError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One command with its declared outputs and inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRule {
    /// Repository, graph and log outputs, in that order.
    pub outputs: [String; 3],
    /// Names of the inputs shared by all three outputs.
    pub inputs: Vec<String>,
    /// Shell command producing the outputs.
    pub command: String,
    /// Hex SHA-256 of `command`; changes whenever the command does.
    pub fingerprint: String,
    /// How the command is planned to exit.
    #[serde(default)]
    pub expectation: ExitExpectation,
}

/// Hex SHA-256 digest of a command string.
#[must_use]
pub fn command_fingerprint(command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    hex::encode(hasher.finalize())
}

impl BuildRule {
    /// The repository output.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.outputs[0]
    }

    /// Groups `finish()` output into one rule per node.
    ///
    /// External artifacts are skipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a node's three outputs are not
    /// adjacent and complete, or disagree on inputs or command.
    pub fn from_artifacts(artifacts: &[Artifact]) -> Result<Vec<Self>, ConfigurationError> {
        let produced: Vec<&Artifact> = artifacts.iter().filter(|a| !a.is_external()).collect();
        let mut rules = Vec::with_capacity(produced.len() / ArtifactRole::ALL.len());

        for group in produced.chunks(ArtifactRole::ALL.len()) {
            let head = group[0];
            let complete = group.len() == ArtifactRole::ALL.len()
                && group
                    .iter()
                    .zip(ArtifactRole::ALL)
                    .all(|(artifact, role)| {
                        artifact.role() == role
                            && artifact.node() == head.node()
                            && artifact.inputs() == head.inputs()
                            && artifact.command() == head.command()
                    });
            if !complete {
                return Err(ConfigurationError::new(
                    "CHAIN-001-RULE",
                    format!("Outputs of node '{}' are incomplete or out of order", head.node()),
                )
                .with_fix_hint("Pass the artifact list returned by finish() unchanged."));
            }

            let command = head.command().unwrap_or_default().to_string();
            rules.push(Self {
                outputs: ArtifactRole::ALL.map(|role| role.output_name(head.node())),
                inputs: head.inputs().to_vec(),
                fingerprint: command_fingerprint(&command),
                command,
                expectation: head.expectation().cloned().unwrap_or_default(),
            });
        }
        Ok(rules)
    }
}

/// Serialisable set of rules for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Pipeline name.
    pub pipeline: String,
    /// Rules in dependency order.
    pub rules: Vec<BuildRule>,
}

impl BuildManifest {
    /// Builds a manifest from `finish()` output.
    ///
    /// # Errors
    ///
    /// Propagates grouping errors from [`BuildRule::from_artifacts`].
    pub fn from_artifacts(pipeline: impl Into<String>, artifacts: &[Artifact]) -> Result<Self> {
        Ok(Self {
            pipeline: pipeline.into(),
            rules: BuildRule::from_artifacts(artifacts)?,
        })
    }

    /// Serialises the manifest as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a manifest.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the manifest to `path`.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(pipeline = %self.pipeline, rules = self.rules.len(), path = %path.display(), "manifest written");
        Ok(())
    }
}

/// Receives build rules, e.g. to declare them to a build tool.
pub trait BuildScheduler {
    /// Registers one rule.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn register(&mut self, rule: &BuildRule) -> Result<(), RepochainError>;

    /// Registers every rule in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    fn register_all(&mut self, rules: &[BuildRule]) -> Result<(), RepochainError> {
        for rule in rules {
            self.register(rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepSpec;
    use crate::testing::rc2_builder;
    use mockall::{mock, predicate, Sequence};
    use pretty_assertions::assert_eq;

    mock! {
        Scheduler {}
        impl BuildScheduler for Scheduler {
            fn register(&mut self, rule: &BuildRule) -> Result<(), RepochainError>;
        }
    }

    fn two_step_artifacts() -> Vec<Artifact> {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        builder.extend(StepSpec::step("step2a")).unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            command_fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(command_fingerprint("a"), command_fingerprint("b"));
    }

    #[test]
    fn test_rules_from_artifacts() {
        let rules = BuildRule::from_artifacts(&two_step_artifacts()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0].outputs,
            [
                "RC2-step1.tgz".to_string(),
                "RC2-step1.qgraph".to_string(),
                "RC2-step1.log".to_string()
            ]
        );
        assert_eq!(rules[1].repo(), "RC2-step2a.tgz");
        assert_eq!(rules[1].inputs, vec!["RC2-step1.tgz".to_string()]);
        assert_eq!(rules[1].fingerprint, command_fingerprint(&rules[1].command));
    }

    #[test]
    fn test_external_artifacts_skipped() {
        let mut artifacts = vec![Artifact::external("base-repo")];
        artifacts.extend(two_step_artifacts());
        assert_eq!(BuildRule::from_artifacts(&artifacts).unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_group_rejected() {
        let mut artifacts = two_step_artifacts();
        artifacts.remove(1);
        let err = BuildRule::from_artifacts(&artifacts).unwrap_err();
        assert_eq!(err.code(), "CHAIN-001-RULE");
    }

    #[test]
    fn test_manifest_json_roundtrip_and_write() {
        let manifest = BuildManifest::from_artifacts("RC2", &two_step_artifacts()).unwrap();
        let json = manifest.to_json().unwrap();
        assert!(json.contains("\"fingerprint\""));
        assert_eq!(BuildManifest::from_json(&json).unwrap(), manifest);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("RC2.json");
        manifest.write_to(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(BuildManifest::from_json(&written).unwrap().rules.len(), 2);
    }

    #[test]
    fn test_register_all_in_order() {
        let rules = BuildRule::from_artifacts(&two_step_artifacts()).unwrap();
        let mut scheduler = MockScheduler::new();
        let mut seq = Sequence::new();
        scheduler
            .expect_register()
            .with(predicate::function(|rule: &BuildRule| rule.repo() == "RC2-step1.tgz"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        scheduler
            .expect_register()
            .with(predicate::function(|rule: &BuildRule| rule.repo() == "RC2-step2a.tgz"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        scheduler.register_all(&rules).unwrap();
    }

    #[test]
    fn test_register_all_stops_at_first_error() {
        let rules = BuildRule::from_artifacts(&two_step_artifacts()).unwrap();
        let mut scheduler = MockScheduler::new();
        scheduler
            .expect_register()
            .times(1)
            .returning(|_| Err(ConfigurationError::new("SCHED", "rejected").into()));

        assert!(scheduler.register_all(&rules).is_err());
    }
}
