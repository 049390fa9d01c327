//! Test fixtures for chain testing.

use std::path::{Path, PathBuf};

use crate::config::ChainConfig;
use crate::core::Artifact;
use crate::definition::PipelineDefinition;
use crate::pipeline::ChainBuilder;

/// Name of the initial repository used by the fixtures.
pub const BASE_REPO: &str = "base-repo";

/// A cut-down mock data-release pipeline with five steps.
pub const RC2_PIPELINE: &str = r"
description: Mock RC2 data-release pipeline
instrument: lsst.obs.subaru.HyperSuprimeCam
tasks:
  isr: lsst.ip.isr.IsrTask
  calibrateImage: lsst.pipe.tasks.calibrateImage.CalibrateImageTask
  consolidateVisitSummary: lsst.pipe.tasks.postprocess.ConsolidateVisitSummaryTask
  isolatedStarAssociation: lsst.pipe.tasks.isolatedStarAssociation.IsolatedStarAssociationTask
  finalizeCharacterization: lsst.pipe.tasks.finalizeCharacterization.FinalizeCharacterizationTask
  makeDirectWarp: lsst.drp.tasks.make_direct_warp.MakeDirectWarpTask
  assembleCoadd: lsst.drp.tasks.assemble_cell_coadd.AssembleCellCoaddTask
  forcedPhotCcd: lsst.meas.base.forcedPhotCcd.ForcedPhotCcdTask
  consolidateForcedSourceTable: lsst.pipe.tasks.postprocess.ConsolidateForcedSourceTableTask
subsets:
  step1:
    subset: [isr, calibrateImage]
    description: Single-frame processing
  step2a: [consolidateVisitSummary, isolatedStarAssociation]
  step2b: [finalizeCharacterization]
  step3: [makeDirectWarp, assembleCoadd]
  step5: [forcedPhotCcd, consolidateForcedSourceTable]
";

/// Parses [`RC2_PIPELINE`].
#[must_use]
#[allow(clippy::expect_used)]
pub fn rc2_definition() -> PipelineDefinition {
    PipelineDefinition::from_yaml_str(RC2_PIPELINE).expect("fixture pipeline parses")
}

/// A fresh builder for `RC2` over [`BASE_REPO`] with default configuration.
#[must_use]
#[allow(clippy::expect_used)]
pub fn rc2_builder() -> ChainBuilder {
    ChainBuilder::from_definition(
        "RC2",
        "pipelines/RC2.yaml",
        rc2_definition(),
        Artifact::external(BASE_REPO),
        ChainConfig::default(),
    )
    .expect("fixture builder is valid")
}

/// Writes a pipeline document into `dir` and returns its path.
#[allow(clippy::expect_used)]
pub fn write_pipeline(dir: &Path, file_name: &str, yaml: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, yaml).expect("pipeline fixture is writable");
    path
}
