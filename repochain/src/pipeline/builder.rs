//! Chain builder: turns a sequence of step registrations into a build graph.
//!
//! The builder keeps a single cursor, the chain head. Main-chain steps
//! consume the head and replace it; side runs consume it and leave it
//! alone. A fault plan with a memory escalation expands into two nodes, a
//! first attempt and a rescue that depends on the first attempt.

use super::command::{CommandRenderer, Invocation};
use super::faults::{FaultPlan, MemorySize};
use super::spec::StepSpec;
use crate::config::ChainConfig;
use crate::core::{Artifact, ArtifactRole, ExitExpectation};
use crate::definition::PipelineDefinition;
use crate::errors::{
    ConfigurationError, DuplicateArtifactNameError, ExhaustedBuilderError, RepochainError, Result,
};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

#[allow(clippy::expect_used)]
fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid label regex"))
}

const FIRST_ATTEMPT: &str = "try1";
const RESCUE_ATTEMPT: &str = "try2";

/// Composite identity of a node, checked for uniqueness by `finish()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum NodeKey {
    Step { step: String, group: Option<String> },
    Side { label: String },
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step { step, group: None } => write!(f, "({step})"),
            Self::Step { step, group: Some(group) } => write!(f, "({step}, {group})"),
            Self::Side { label } => write!(f, "side run '{label}'"),
        }
    }
}

#[derive(Debug, Clone)]
struct ChainNode {
    key: NodeKey,
    base: String,
    inputs: Vec<String>,
    command: String,
    expectation: ExitExpectation,
}

impl ChainNode {
    fn artifact(&self, role: ArtifactRole) -> Artifact {
        Artifact::produced(
            &self.base,
            role,
            self.inputs.clone(),
            self.command.clone(),
            self.expectation.clone(),
        )
    }
}

/// Naming for one registration before attempt expansion.
struct Naming {
    key: NodeKey,
    base: String,
    suffix: String,
}

impl Naming {
    fn attempt(&self, attempt: &str) -> Self {
        let key = match &self.key {
            NodeKey::Step { step, group } => NodeKey::Step {
                step: step.clone(),
                group: Some(group.as_ref().map_or_else(
                    || attempt.to_string(),
                    |group| format!("{group}-{attempt}"),
                )),
            },
            NodeKey::Side { label } => NodeKey::Side {
                label: format!("{label}-{attempt}"),
            },
        };
        Self {
            key,
            base: format!("{}-{attempt}", self.base),
            suffix: format!("{}/{attempt}", self.suffix),
        }
    }
}

/// Per-node values that differ between a plain node and its attempts.
struct NodePlan<'a> {
    input: &'a str,
    where_clause: &'a str,
    faults: &'a FaultPlan,
    output_run: String,
    skip_existing_in: Option<String>,
    extend_run: bool,
    memory_ceiling: Option<&'a MemorySize>,
    expect_failure: bool,
}

/// Mutable builder for the artifact graph of one pipeline.
///
/// Usage:
/// ```rust,ignore
/// let mut chain = ChainBuilder::new("RC2", "pipelines/RC2.yaml", Artifact::external("base-repo"), ChainConfig::default())?;
/// chain.extend(StepSpec::step("step1").with_where("band='r'"))?;
/// chain.add_side_run("rescue-test", StepSpec::subsets(["isr"]).with_faults(plan))?;
/// chain.extend(StepSpec::step("step2a"))?;
/// let artifacts = chain.finish()?;
/// ```
#[derive(Debug)]
pub struct ChainBuilder {
    name: String,
    pipeline_path: String,
    definition: PipelineDefinition,
    config: ChainConfig,
    chain: String,
    initial: Artifact,
    head: Artifact,
    last_output_run: Option<String>,
    nodes: Vec<ChainNode>,
    finished: bool,
}

impl ChainBuilder {
    /// Creates a builder, loading the pipeline definition from disk.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pipeline definition does not
    /// resolve, or the name or configuration is invalid.
    pub fn new(
        name: impl Into<String>,
        pipeline_path: impl AsRef<Path>,
        initial_input: Artifact,
        config: ChainConfig,
    ) -> Result<Self> {
        let path = pipeline_path.as_ref();
        let definition = PipelineDefinition::from_path(path)?;
        Self::from_definition(name, path.display().to_string(), definition, initial_input, config)
    }

    /// Creates a builder from an already parsed pipeline definition.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name or configuration is invalid.
    pub fn from_definition(
        name: impl Into<String>,
        pipeline_path: impl Into<String>,
        definition: PipelineDefinition,
        initial_input: Artifact,
        config: ChainConfig,
    ) -> Result<Self> {
        let name = name.into();
        check_label("pipeline name", &name)?;
        config.validate()?;
        let chain = config.chain_collection(&name);
        debug!(pipeline = %name, chain = %chain, input = initial_input.name(), "chain builder created");
        Ok(Self {
            name,
            pipeline_path: pipeline_path.into(),
            definition,
            config,
            chain,
            head: initial_input.clone(),
            initial: initial_input,
            last_output_run: None,
            nodes: Vec::new(),
            finished: false,
        })
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current chain head.
    #[must_use]
    pub const fn head(&self) -> &Artifact {
        &self.head
    }

    /// The output CHAINED collection.
    #[must_use]
    pub fn chain_collection(&self) -> &str {
        &self.chain
    }

    /// The RUN collection written by the most recent main-chain step.
    #[must_use]
    pub fn last_output_run(&self) -> Option<&str> {
        self.last_output_run.as_deref()
    }

    /// Number of nodes registered so far (each yields three artifacts).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Appends a step to the main chain and advances the head to it.
    ///
    /// Returns the new head's repository artifact. With a memory
    /// escalation this is the rescue attempt's repository.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unresolvable steps or faults, and
    /// `ExhaustedBuilder` after `finish()`.
    pub fn extend(&mut self, spec: StepSpec) -> Result<Artifact> {
        self.ensure_active()?;
        if spec.subsets.len() > 1 {
            return Err(ConfigurationError::new(
                "CHAIN-001-MULTI_STEP",
                format!("A main-chain step runs one subset, got {}", spec.subsets.join(", ")),
            )
            .with_fix_hint("Use a side run to run several subsets back to back.")
            .into());
        }
        let step = spec.step_name();
        check_label("step", &step)?;
        if let Some(group) = &spec.group {
            check_label("group", group)?;
        }

        let naming = Naming {
            base: match &spec.group {
                Some(group) => format!("{}-{step}-{group}", self.name),
                None => format!("{}-{step}", self.name),
            },
            suffix: match &spec.group {
                Some(group) => format!("{step}/{group}"),
                None => step.clone(),
            },
            key: NodeKey::Step {
                step,
                group: spec.group.clone(),
            },
        };

        let (repo, output_run) = self.register(&spec, &naming, true)?;
        info!(pipeline = %self.name, head = repo.name(), "chain head advanced");
        self.head = repo.clone();
        self.last_output_run = Some(output_run);
        Ok(repo)
    }

    /// Registers a side run against the current head without moving it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid labels, unresolvable
    /// steps or faults, and `ExhaustedBuilder` after `finish()`.
    pub fn add_side_run(&mut self, label: impl Into<String>, spec: StepSpec) -> Result<Artifact> {
        self.ensure_active()?;
        let label = label.into();
        check_label("side-run label", &label)?;
        if spec.group.is_some() {
            return Err(ConfigurationError::new(
                "CHAIN-001-SIDE_GROUP",
                format!("Side run '{label}' is named by its label and cannot take a group"),
            )
            .into());
        }

        let naming = Naming {
            base: format!("{}-{label}", self.name),
            suffix: label.clone(),
            key: NodeKey::Side { label },
        };
        let (repo, _) = self.register(&spec, &naming, false)?;
        debug!(pipeline = %self.name, side_run = repo.name(), head = self.head.name(), "side run registered");
        Ok(repo)
    }

    /// Publishes every artifact created so far, in dependency order.
    ///
    /// The builder is consumed by the first call, whether or not it
    /// succeeds; later calls fail with `ExhaustedBuilder`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateArtifactName` if two nodes share a `(step, group)`
    /// key, a side-run label, or an output name.
    pub fn finish(&mut self) -> Result<Vec<Artifact>> {
        self.ensure_active()?;
        self.finished = true;
        let nodes = std::mem::take(&mut self.nodes);

        let mut keys: BTreeMap<&NodeKey, &str> = BTreeMap::new();
        for node in &nodes {
            if let Some(previous) = keys.insert(&node.key, &node.base) {
                return Err(DuplicateArtifactNameError::new(
                    node.key.to_string(),
                    vec![previous.to_string(), node.base.clone()],
                )
                .into());
            }
        }

        let mut artifacts = Vec::with_capacity(nodes.len() * ArtifactRole::ALL.len());
        let mut owners: HashMap<String, String> = HashMap::new();
        owners.insert(self.initial.name().to_string(), self.initial.node().to_string());
        for node in &nodes {
            for role in ArtifactRole::ALL {
                let artifact = node.artifact(role);
                if let Some(previous) = owners.insert(artifact.name().to_string(), node.base.clone()) {
                    return Err(DuplicateArtifactNameError::new(
                        artifact.name(),
                        vec![previous, node.base.clone()],
                    )
                    .into());
                }
                artifacts.push(artifact);
            }
        }

        info!(
            pipeline = %self.name,
            nodes = nodes.len(),
            artifacts = artifacts.len(),
            head = self.head.name(),
            "chain finished"
        );
        Ok(artifacts)
    }

    fn ensure_active(&self) -> Result<(), ExhaustedBuilderError> {
        if self.finished {
            return Err(ExhaustedBuilderError::new(&self.name));
        }
        Ok(())
    }

    /// Validates a spec and appends its node(s); returns the repository
    /// artifact of the last node and the output run it writes.
    fn register(
        &mut self,
        spec: &StepSpec,
        naming: &Naming,
        main_chain: bool,
    ) -> Result<(Artifact, String)> {
        let selection = self.definition.resolve_labels(&spec.subsets)?;
        spec.faults.validate(&selection)?;

        let skip_existing_in = spec.skip_existing_in_last.then(|| self.chain.clone());
        let head = self.head.name().to_string();

        let Some(escalation) = spec.faults.escalation.clone() else {
            let output_run = self.output_run(spec, &naming.suffix)?;
            let plan = NodePlan {
                input: &head,
                where_clause: &spec.where_clause,
                faults: &spec.faults,
                output_run: output_run.clone(),
                skip_existing_in,
                extend_run: spec.extend_run,
                memory_ceiling: None,
                expect_failure: spec
                    .expect_failure
                    .unwrap_or_else(|| planned_failure(&spec.faults, None, main_chain)),
            };
            let node = self.make_node(spec, naming.key.clone(), &naming.base, &plan);
            let repo = node.artifact(ArtifactRole::Repo);
            self.nodes.push(node);
            return Ok((repo, output_run));
        };

        if spec.extend_run {
            return Err(ConfigurationError::new(
                "CHAIN-001-ESCALATION",
                "A memory escalation writes its own runs and cannot extend an existing one",
            )
            .into());
        }

        let first_naming = naming.attempt(FIRST_ATTEMPT);
        let first_run = self.config.run_collection(&self.name, &first_naming.suffix);
        let first_plan = NodePlan {
            input: &head,
            where_clause: &spec.where_clause,
            faults: &spec.faults,
            output_run: first_run.clone(),
            skip_existing_in,
            extend_run: false,
            memory_ceiling: Some(&escalation.initial),
            expect_failure: spec.expect_failure.unwrap_or_else(|| {
                planned_failure(&spec.faults, Some(&escalation.initial), main_chain)
            }),
        };
        let first = self.make_node(spec, first_naming.key.clone(), &first_naming.base, &first_plan);
        let first_repo = first.artifact(ArtifactRole::Repo);
        self.nodes.push(first);

        let rescue_naming = naming.attempt(RESCUE_ATTEMPT);
        let rescue_run = self.config.run_collection(&self.name, &rescue_naming.suffix);
        let rescue_faults = spec.faults.rescue_plan();
        let rescue_where = spec.faults.rescue_where(&spec.where_clause);
        let rescue_plan = NodePlan {
            input: first_repo.name(),
            where_clause: &rescue_where,
            faults: &rescue_faults,
            output_run: rescue_run.clone(),
            skip_existing_in: Some(first_run),
            extend_run: false,
            memory_ceiling: Some(&escalation.retry),
            expect_failure: rescue_faults.expects_failure(Some(&escalation.retry)),
        };
        let rescue = self.make_node(spec, rescue_naming.key.clone(), &rescue_naming.base, &rescue_plan);
        let rescue_repo = rescue.artifact(ArtifactRole::Repo);
        debug!(
            first = first_repo.name(),
            rescue = rescue_repo.name(),
            initial = %escalation.initial,
            retry = %escalation.retry,
            "memory escalation expanded"
        );
        self.nodes.push(rescue);
        Ok((rescue_repo, rescue_run))
    }

    fn output_run(&self, spec: &StepSpec, suffix: &str) -> Result<String, ConfigurationError> {
        if !spec.extend_run {
            return Ok(self.config.run_collection(&self.name, suffix));
        }
        self.last_output_run.clone().ok_or_else(|| {
            ConfigurationError::new(
                "CHAIN-001-EXTEND_RUN",
                "extend_run needs a previous main-chain step to extend",
            )
        })
    }

    fn make_node(&self, spec: &StepSpec, key: NodeKey, base: &str, plan: &NodePlan<'_>) -> ChainNode {
        let mut inputs = vec![plan.input.to_string()];
        if self.config.track_pipeline_definition {
            inputs.push(self.pipeline_path.clone());
        }

        let invocation = Invocation {
            node: base,
            input_repo: plan.input,
            pipeline_path: &self.pipeline_path,
            subsets: &spec.subsets,
            where_clause: plan.where_clause,
            chain: &self.chain,
            output_run: &plan.output_run,
            faults: plan.faults,
            skip_existing_in: plan.skip_existing_in.as_deref(),
            extend_run: plan.extend_run,
            clobber_outputs: spec.clobber_outputs,
            memory_ceiling: plan.memory_ceiling,
            expect_failure: plan.expect_failure,
        };
        let command = CommandRenderer::new(&self.config).render(&invocation);

        debug!(node = base, input = plan.input, run = %plan.output_run, faults = plan.faults.rules.len(), "node created");
        ChainNode {
            key,
            base: base.to_string(),
            inputs,
            command,
            expectation: ExitExpectation {
                expect_failure: plan.expect_failure,
                raise_on_partial_outputs: plan.faults.raise_on_partial_outputs(),
                partial_output_tasks: plan.faults.partial_output_tasks(),
            },
        }
    }
}

/// Default exit expectation for a node.
///
/// Raised partial outputs on the main chain must reach the scheduler as a
/// failure so that later main-chain nodes do not run.
fn planned_failure(faults: &FaultPlan, ceiling: Option<&MemorySize>, main_chain: bool) -> bool {
    if main_chain && faults.raise_on_partial_outputs() {
        return false;
    }
    faults.expects_failure(ceiling)
}

fn check_label(what: &str, value: &str) -> Result<(), RepochainError> {
    if label_re().is_match(value) {
        return Ok(());
    }
    Err(ConfigurationError::new(
        "CHAIN-001-LABEL",
        format!("Invalid {what} '{value}'"),
    )
    .with_fix_hint("Use only letters, digits, '_', '.' and '-'.")
    .into())
}
