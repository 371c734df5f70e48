//! Fast-mode runs that fold through a fake RNAfold executable.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use aptamyx_common::PipelineConfig;
use aptamyx_molecules::pipeline::{
    AptamerPipeline, PipelineRequest, RunStatus, Stage, StageStatus,
};
use tempfile::TempDir;

/// Echoes the sequence, then an open structure of the same length.
const OPEN_CHAIN_RNAFOLD: &str = r#"#!/bin/sh
read seq
echo "$seq"
echo "$(echo "$seq" | sed 's/./\./g') ( -1.50)"
"#;

const HUNG_RNAFOLD: &str = "#!/bin/sh\nsleep 30\n";

fn install(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("RNAfold");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn pipeline(temp: &TempDir, rnafold: &Path, timeout_secs: u64) -> AptamerPipeline {
    let mut config = PipelineConfig::default();
    config.execution.temp_dir = temp.path().join("work");
    config.generation.seed = Some(9);
    config.folding.rnafold_bin = Some(rnafold.display().to_string());
    config.folding.timeout_secs = timeout_secs;
    config.scoring.n_trees = 10;
    AptamerPipeline::new(config).unwrap()
}

fn no_docking(temp: &TempDir) -> PipelineRequest {
    let mut request = PipelineRequest::new(temp.path().join("target.pdb"), 20, 5);
    request.docking = false;
    request
}

#[tokio::test]
async fn test_rnafold_structures_reach_the_table() {
    let temp = tempfile::tempdir().unwrap();
    let rnafold = install(temp.path(), OPEN_CHAIN_RNAFOLD);

    let pipeline = pipeline(&temp, &rnafold, 10);
    assert_eq!(pipeline.predictor().engine_name(), "RNAfold");
    let report = pipeline.run(&no_docking(&temp), None).await.unwrap();

    assert_eq!(report.table.len(), 5);
    for row in report.table.rows() {
        assert_eq!(row.structure, ".".repeat(20));
        assert_eq!(row.mfe, Some(-1.5));
        assert!(row.score.is_some());
    }
    assert_eq!(report.status, RunStatus::Complete);
}

#[tokio::test]
async fn test_hung_rnafold_becomes_sentinel_rows() {
    let temp = tempfile::tempdir().unwrap();
    let rnafold = install(temp.path(), HUNG_RNAFOLD);

    let started = Instant::now();
    let report = pipeline(&temp, &rnafold, 1)
        .run(&no_docking(&temp), None)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(15), "{:?}", started.elapsed());

    assert_eq!(report.table.len(), 5);
    for row in report.table.rows() {
        assert_eq!(row.structure, "");
        assert_eq!(row.mfe, None);
        let failure = row.failure.as_deref().unwrap_or_default();
        assert!(failure.contains("timed out"), "{failure}");
    }

    let status = |stage: Stage| {
        report
            .stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.status)
    };
    assert_eq!(status(Stage::Structure), Some(StageStatus::Degraded));
    // nothing folded, so there is no mfe to train on
    assert_eq!(status(Stage::Scoring), Some(StageStatus::Degraded));
    assert_eq!(report.status, RunStatus::Degraded);
}
