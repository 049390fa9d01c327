//! Test assertions for finished chains.

use std::collections::HashSet;

use crate::core::Artifact;

/// Returns the artifact named `name`.
///
/// # Panics
///
/// Panics if no artifact has that name.
#[must_use]
pub fn find_artifact<'a>(artifacts: &'a [Artifact], name: &str) -> &'a Artifact {
    artifacts
        .iter()
        .find(|a| a.name() == name)
        .unwrap_or_else(|| {
            panic!(
                "Expected artifact '{}', got: {:?}",
                name,
                artifacts.iter().map(Artifact::name).collect::<Vec<_>>()
            )
        })
}

/// Asserts that `artifact` lists `input` among its inputs.
pub fn assert_depends_on(artifact: &Artifact, input: &str) {
    assert!(
        artifact.depends_on(input),
        "Expected '{}' to depend on '{}', inputs: {:?}",
        artifact.name(),
        input,
        artifact.inputs()
    );
}

/// Asserts that neither artifact depends on the other.
pub fn assert_independent(a: &Artifact, b: &Artifact) {
    assert!(
        !a.depends_on(b.name()) && !b.depends_on(a.name()),
        "Expected '{}' and '{}' to be independent",
        a.name(),
        b.name()
    );
}

/// Asserts that no two artifacts share a name.
pub fn assert_unique_names(artifacts: &[Artifact]) {
    let mut seen = HashSet::new();
    for artifact in artifacts {
        assert!(
            seen.insert(artifact.name()),
            "Duplicate artifact name '{}'",
            artifact.name()
        );
    }
}

/// Counts `--mock-failure` arguments in the artifact's command.
#[must_use]
pub fn count_fault_args(artifact: &Artifact) -> usize {
    artifact
        .command()
        .map_or(0, |command| command.matches("--mock-failure ").count())
}
