//! End-to-end tests for chain construction.

#[cfg(test)]
mod tests {
    use crate::config::ChainConfig;
    use crate::core::{classify_exit, Artifact, ArtifactRole, RunOutcome};
    use crate::errors::RepochainError;
    use crate::pipeline::{
        BuildManifest, BuildRule, BuildScheduler, ChainBuilder, FaultPlan, FaultRule,
        MemoryEscalation, MemorySize, StepSpec,
    };
    use crate::testing::{
        assert_depends_on, assert_independent, assert_unique_names, count_fault_args,
        find_artifact, rc2_builder, rc2_definition, FailingScheduler, RecordingScheduler,
        BASE_REPO,
    };
    use pretty_assertions::assert_eq;

    fn names(artifacts: &[Artifact]) -> Vec<&str> {
        artifacts.iter().map(Artifact::name).collect()
    }

    fn escalated_plan() -> FaultPlan {
        FaultPlan::new()
            .with_rule(FaultRule::memory_exhaustion(
                "isolatedStarAssociation",
                "tract=9813",
                MemorySize::parse("2GB").unwrap(),
            ))
            .with_escalation(MemoryEscalation::parse("1GB", "4GB").unwrap())
    }

    #[test]
    fn test_single_extend_yields_one_triple_on_initial_input() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1").with_where("band='r'")).unwrap();
        let artifacts = builder.finish().unwrap();

        assert_eq!(
            names(&artifacts),
            vec!["RC2-step1.tgz", "RC2-step1.qgraph", "RC2-step1.log"]
        );
        for artifact in &artifacts {
            assert_eq!(artifact.inputs(), [BASE_REPO.to_string()]);
        }
        let roles: Vec<ArtifactRole> = artifacts.iter().map(Artifact::role).collect();
        assert_eq!(roles, ArtifactRole::ALL.to_vec());
    }

    #[test]
    fn test_two_step_chain() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1").with_where("band='r'")).unwrap();
        builder.extend(StepSpec::step("step2a").with_where("")).unwrap();
        let artifacts = builder.finish().unwrap();

        assert_eq!(artifacts.len(), 6);
        assert_unique_names(&artifacts);
        for artifact in artifacts.iter().filter(|a| a.node() == "RC2-step2a") {
            assert_eq!(artifact.inputs(), ["RC2-step1.tgz".to_string()]);
        }
        assert_depends_on(find_artifact(&artifacts, "RC2-step1.tgz"), BASE_REPO);

        let step2a = find_artifact(&artifacts, "RC2-step2a.tgz").command().unwrap();
        assert!(step2a.contains("tar -C RC2-step2a -xzf RC2-step1.tgz"));
        assert!(step2a.contains("--output-run RC2/step2a"));
        assert!(step2a.contains("-d \"\""));
    }

    #[test]
    fn test_consecutive_side_runs_are_independent() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let first = builder
            .add_side_run("side-a", StepSpec::subsets(["step2a"]))
            .unwrap();
        let second = builder
            .add_side_run("side-b", StepSpec::subsets(["step2a"]))
            .unwrap();

        assert_depends_on(&first, "RC2-step1.tgz");
        assert_depends_on(&second, "RC2-step1.tgz");
        assert_independent(&first, &second);
    }

    #[test]
    fn test_rescue_side_run_scenario() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let side = builder
            .add_side_run(
                "rescue-test",
                StepSpec::subsets(["isr"])
                    .with_where("instrument='X'")
                    .with_faults(FaultPlan::new().fail("isr", "exposure=1"))
                    .expect_failure(true),
            )
            .unwrap();
        let next = builder.extend(StepSpec::step("step2a")).unwrap();
        let artifacts = builder.finish().unwrap();

        assert_depends_on(&side, "RC2-step1.tgz");
        assert_eq!(count_fault_args(&side), 1);
        assert!(side
            .command()
            .unwrap()
            .contains("--mock-failure \"isr:ValueError:exposure=1\""));
        assert!(side.expectation().unwrap().expect_failure);

        assert_eq!(next.inputs(), ["RC2-step1.tgz".to_string()]);
        for artifact in &artifacts {
            assert!(!artifact.depends_on(side.name()), "{} depends on side run", artifact.name());
        }
        assert_eq!(artifacts.len(), 9);
    }

    #[test]
    fn test_multi_step_side_run() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let side = builder
            .add_side_run(
                "multi",
                StepSpec::subsets(["step2a", "step2b"])
                    .with_faults(FaultPlan::new().fail("finalizeCharacterization", "visit=18202")),
            )
            .unwrap();
        let command = side.command().unwrap();
        assert!(command.contains("-p pipelines/RC2.yaml#step2a,step2b"));
        assert!(command.contains("--output-run RC2/multi"));
    }

    #[test]
    fn test_memory_escalation_on_main_chain() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let head = builder
            .extend(
                StepSpec::step("step2a")
                    .with_where("skymap='ci_mw'")
                    .with_faults(escalated_plan()),
            )
            .unwrap();
        let after = builder.extend(StepSpec::step("step2b")).unwrap();
        let artifacts = builder.finish().unwrap();

        assert_eq!(head.name(), "RC2-step2a-try2.tgz");
        assert_eq!(after.inputs(), ["RC2-step2a-try2.tgz".to_string()]);
        assert_eq!(artifacts.len(), 12);
        assert_unique_names(&artifacts);

        let first = find_artifact(&artifacts, "RC2-step2a-try1.tgz");
        assert_eq!(first.inputs(), ["RC2-step1.tgz".to_string()]);
        let first_cmd = first.command().unwrap();
        assert!(first_cmd.contains("--memory-per-quantum 1GB"));
        assert!(first_cmd.contains("--output-run RC2/step2a/try1"));
        assert!(first_cmd.contains("|| true; }"));
        assert!(first.expectation().unwrap().expect_failure);

        let rescue = find_artifact(&artifacts, "RC2-step2a-try2.tgz");
        assert_eq!(rescue.inputs(), ["RC2-step2a-try1.tgz".to_string()]);
        assert!(!rescue.depends_on("RC2-step1.tgz"));
        let rescue_cmd = rescue.command().unwrap();
        assert!(rescue_cmd.contains("--memory-per-quantum 4GB"));
        assert!(rescue_cmd.contains("--skip-existing-in RC2/step2a/try1"));
        assert!(rescue_cmd.contains("--output-run RC2/step2a/try2"));
        assert!(rescue_cmd.contains("-d \"(skymap='ci_mw') AND (tract=9813)\""));
        assert!(!rescue_cmd.contains("|| true"));
        assert!(!rescue.expectation().unwrap().expect_failure);
    }

    #[test]
    fn test_memory_escalation_on_side_run_keeps_head() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let rescue = builder
            .add_side_run("oom", StepSpec::subsets(["step2a"]).with_faults(escalated_plan()))
            .unwrap();

        assert_eq!(rescue.name(), "RC2-oom-try2.tgz");
        assert_depends_on(&rescue, "RC2-oom-try1.tgz");
        assert_eq!(builder.head().name(), "RC2-step1.tgz");
        assert_eq!(builder.last_output_run(), Some("RC2/step1"));
    }

    #[test]
    fn test_grouped_escalations_stay_distinct() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        builder
            .extend(StepSpec::step("step2a").with_group("a").with_faults(escalated_plan()))
            .unwrap();
        builder
            .extend(StepSpec::step("step2a").with_group("b").with_faults(escalated_plan()))
            .unwrap();
        let artifacts = builder.finish().unwrap();

        assert_eq!(artifacts.len(), 15);
        assert_unique_names(&artifacts);
        assert_depends_on(
            find_artifact(&artifacts, "RC2-step2a-a-try2.tgz"),
            "RC2-step2a-a-try1.tgz",
        );
        assert_depends_on(
            find_artifact(&artifacts, "RC2-step2a-b-try1.tgz"),
            "RC2-step2a-a-try2.tgz",
        );
    }

    #[test]
    fn test_finish_twice_is_exhausted() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        assert!(builder.finish().is_ok());
        for _ in 0..2 {
            assert!(matches!(
                builder.finish(),
                Err(RepochainError::ExhaustedBuilder(_))
            ));
        }
    }

    #[test]
    fn test_distinct_groups_yield_unique_names() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        for tract in 0..8 {
            builder
                .extend(
                    StepSpec::step("step3")
                        .with_group(format!("tract{tract}"))
                        .with_where(format!("tract={tract}")),
                )
                .unwrap();
        }
        builder.extend(StepSpec::step("step5")).unwrap();
        builder.extend(StepSpec::full_pipeline()).unwrap();
        let artifacts = builder.finish().unwrap();

        assert_eq!(artifacts.len(), 33);
        assert_unique_names(&artifacts);
    }

    #[test]
    fn test_reused_group_fails_at_finish() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step3").with_group("tract0")).unwrap();
        builder.extend(StepSpec::step("step3").with_group("tract0")).unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(err, RepochainError::DuplicateArtifactName(_)));
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("CHAIN-002-DUPLICATE"));
    }

    #[test]
    fn test_naming_is_idempotent_across_builders() {
        let run = || {
            let mut builder = rc2_builder();
            builder.extend(StepSpec::step("step1").with_where("band='r'")).unwrap();
            builder
                .add_side_run(
                    "rescue-test",
                    StepSpec::subsets(["isr"]).with_faults(FaultPlan::new().fail("isr", "exposure=1")),
                )
                .unwrap();
            builder
                .extend(StepSpec::step("step2a").with_faults(escalated_plan()))
                .unwrap();
            builder.finish().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_partial_outputs_flags() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let raised = builder
            .add_side_run(
                "test-raise",
                StepSpec::subsets(["step2a"]).with_faults(
                    FaultPlan::new().with_rule(FaultRule::partial_outputs_raised(
                        "consolidateVisitSummary",
                        "visit=18202",
                    )),
                ),
            )
            .unwrap();
        let qualified = builder
            .add_side_run(
                "test-qualify",
                StepSpec::subsets(["step2a"]).with_faults(
                    FaultPlan::new().with_rule(FaultRule::partial_outputs_qualified(
                        "consolidateVisitSummary",
                        "visit=18202",
                    )),
                ),
            )
            .unwrap();

        let raised_cmd = raised.command().unwrap();
        assert!(raised_cmd.contains(" --raise-on-partial-outputs"));
        assert!(raised.expectation().unwrap().expect_failure);

        let qualified_cmd = qualified.command().unwrap();
        assert!(qualified_cmd.contains("--no-raise-on-partial-outputs"));
        assert!(!qualified_cmd.contains(" --raise-on-partial-outputs"));
        assert_eq!(classify_exit(&qualified, 0).unwrap(), RunOutcome::QualifiedSuccess);
    }

    #[test]
    fn test_unexpected_partial_outputs_halt() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        let raised = builder
            .extend(
                StepSpec::step("step2a")
                    .with_faults(
                        FaultPlan::new().with_rule(FaultRule::partial_outputs_raised(
                            "consolidateVisitSummary",
                            "",
                        )),
                    )
                    .expect_failure(false),
            )
            .unwrap();
        assert!(matches!(
            classify_exit(&raised, 1),
            Err(RepochainError::PartialOutputsReported(_))
        ));
    }

    #[test]
    fn test_commands_render_identically_for_same_head() {
        let mut a = rc2_builder();
        let mut b = ChainBuilder::from_definition(
            "RC2",
            "pipelines/RC2.yaml",
            rc2_definition(),
            Artifact::external(BASE_REPO),
            ChainConfig::default(),
        )
        .unwrap();
        let spec = StepSpec::step("step1").with_where("band='r'").skip_existing_in_last();
        assert_eq!(
            a.extend(spec.clone()).unwrap().command(),
            b.extend(spec).unwrap().command()
        );
    }

    #[test]
    fn test_paths_with_spaces_stay_single_arguments() {
        let mut builder = ChainBuilder::from_definition(
            "RC2",
            "/home/my pipelines/RC2.yaml",
            rc2_definition(),
            Artifact::external("base repo.tgz"),
            ChainConfig::default(),
        )
        .unwrap();
        let repo = builder.extend(StepSpec::step("step1")).unwrap();
        let command = repo.command().unwrap();

        assert_eq!(repo.inputs(), ["base repo.tgz".to_string()]);
        assert!(command.contains("-xzf \"base repo.tgz\" && "));
        assert!(command.contains("-p \"/home/my pipelines/RC2.yaml#step1\" -d "));
        assert!(!command.contains("-p /home/my pipelines"));
    }

    #[test]
    fn test_custom_templates_flow_into_commands() {
        let config = ChainConfig::default()
            .with_templates("u/ci/{name}", "u/ci/{name}/{suffix}")
            .with_defaults_collection("LSSTCam/defaults");
        let mut builder = ChainBuilder::from_definition(
            "RC2",
            "pipelines/RC2.yaml",
            rc2_definition(),
            Artifact::external(BASE_REPO),
            config,
        )
        .unwrap();
        let repo = builder.extend(StepSpec::step("step1").skip_existing_in_last()).unwrap();
        let command = repo.command().unwrap();
        assert_eq!(builder.chain_collection(), "u/ci/RC2");
        assert!(command.contains("--input LSSTCam/defaults"));
        assert!(command.contains("--output u/ci/RC2 --output-run u/ci/RC2/step1"));
        assert!(command.contains("--skip-existing-in u/ci/RC2"));
    }

    #[test]
    fn test_scheduler_receives_rules_in_dependency_order() {
        let mut builder = rc2_builder();
        builder.extend(StepSpec::step("step1")).unwrap();
        builder.add_side_run("side", StepSpec::subsets(["isr"])).unwrap();
        builder
            .extend(StepSpec::step("step2a").with_faults(escalated_plan()))
            .unwrap();
        let artifacts = builder.finish().unwrap();
        let rules = BuildRule::from_artifacts(&artifacts).unwrap();

        let mut scheduler = RecordingScheduler::new();
        scheduler.register_all(&rules).unwrap();
        assert_eq!(
            scheduler.repos(),
            vec![
                "RC2-step1.tgz",
                "RC2-side.tgz",
                "RC2-step2a-try1.tgz",
                "RC2-step2a-try2.tgz"
            ]
        );

        let mut seen: Vec<&str> = vec![BASE_REPO];
        for rule in scheduler.rules() {
            for input in &rule.inputs {
                assert!(seen.contains(&input.as_str()), "{input} registered late");
            }
            seen.push(rule.repo());
        }

        let mut failing = FailingScheduler::new("RC2-step2a-try1.tgz");
        assert!(failing.register_all(&rules).is_err());
        assert_eq!(failing.accepted(), 2);

        let manifest = BuildManifest::from_artifacts("RC2", &artifacts).unwrap();
        assert_eq!(manifest.rules, rules);
    }
}
