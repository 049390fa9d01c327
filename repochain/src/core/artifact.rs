//! Build artifacts produced by a chain.

use super::ExitExpectation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// A packed data repository snapshot.
    Repo,
    /// The structured run graph saved by the engine.
    Graph,
    /// The engine's log.
    Log,
}

impl ArtifactRole {
    /// All roles, in the order a node declares its outputs.
    pub const ALL: [Self; 3] = [Self::Repo, Self::Graph, Self::Log];

    /// File extension appended to the node's base name.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Repo => ".tgz",
            Self::Graph => ".qgraph",
            Self::Log => ".log",
        }
    }

    /// Output name for a node base name.
    #[must_use]
    pub fn output_name(self, base: &str) -> String {
        format!("{base}{}", self.extension())
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repo => write!(f, "repo"),
            Self::Graph => write!(f, "graph"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// An immutable named build output plus the edges needed to produce it.
///
/// External artifacts (the chain's initial input) have no command and no
/// inputs; every produced artifact shares its command and inputs with the
/// two siblings of its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    name: String,
    node: String,
    role: ArtifactRole,
    inputs: Vec<String>,
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expectation: Option<ExitExpectation>,
}

impl Artifact {
    /// Creates an external repository artifact, built outside the chain.
    #[must_use]
    pub fn external(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            node: name.clone(),
            name,
            role: ArtifactRole::Repo,
            inputs: Vec::new(),
            command: None,
            expectation: None,
        }
    }

    pub(crate) fn produced(
        node: &str,
        role: ArtifactRole,
        inputs: Vec<String>,
        command: String,
        expectation: ExitExpectation,
    ) -> Self {
        Self {
            name: role.output_name(node),
            node: node.to_string(),
            role,
            inputs,
            command: Some(command),
            expectation: Some(expectation),
        }
    }

    /// The unique output name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base name of the producing node; also the extraction directory.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The artifact's role.
    #[must_use]
    pub const fn role(&self) -> ArtifactRole {
        self.role
    }

    /// Names of the artifacts (and tracked files) this one depends on.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// The command producing this artifact, `None` for external artifacts.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Exit expectations of the producing command.
    #[must_use]
    pub const fn expectation(&self) -> Option<&ExitExpectation> {
        self.expectation.as_ref()
    }

    /// Whether the artifact is produced outside the chain.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        self.command.is_none()
    }

    /// Whether `name` is one of this artifact's inputs.
    #[must_use]
    pub fn depends_on(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input == name)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
