//! Detailed-mode runs against fake SimRNA executables.
//!
//! The fakes write their outputs under non-canonical names so the
//! artifact search has to fall through to its suffix patterns.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aptamyx_common::{AptamyxError, RefinementConfig, ToolFailure};
use aptamyx_molecules::fold::NearestNeighbourFolder;
use aptamyx_molecules::sequence::Sequence;
use aptamyx_molecules::structure::{ModelSource, StructurePredictor};
use tempfile::TempDir;

const FAKE_SIMRNA: &str = r#"#!/bin/sh
prefix=""
n=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) prefix="$2"; shift 2 ;;
    -n) n="$2"; shift 2 ;;
    *) shift ;;
  esac
done
dir=$(dirname "$prefix")
if [ "$n" = "0" ]; then
  echo "ATOM      1  P     G A   1       0.000   0.000   0.000  1.00  0.00           P" > "$dir/run-000001.pdb"
else
  echo "frame 1" > "$dir/sim.trafl"
fi
"#;

const FAKE_TRAFL2PDBS: &str = r#"#!/bin/sh
echo "ATOM      1  P     G A   1       1.000   2.000   3.000  1.00  0.00           P" > "converted_$3.pdb"
"#;

fn install(dir: &Path, name: &str, script: &str) {
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

struct Fixture {
    temp: TempDir,
    tools: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let tools = temp.path().join("SimRNA");
        std::fs::create_dir_all(tools.join("data")).unwrap();
        std::fs::write(tools.join("configSA.dat"), "NUMBER_OF_ITERATIONS 100\n").unwrap();
        Self { temp, tools }
    }

    fn predictor(&self, timeout_secs: u64) -> StructurePredictor {
        let refinement = RefinementConfig {
            simrna_dir: self.tools.clone(),
            iterations: 100,
            timeout_secs,
            ..RefinementConfig::default()
        };
        StructurePredictor::new(
            Arc::new(NearestNeighbourFolder::default()),
            refinement,
            self.temp.path().join("work"),
        )
    }
}

#[tokio::test]
async fn test_refinement_uses_suffix_fallbacks() {
    let fx = Fixture::new();
    install(&fx.tools, "SimRNA", FAKE_SIMRNA);
    install(&fx.tools, "SimRNA_trafl2pdbs", FAKE_TRAFL2PDBS);
    let predictor = fx.predictor(30);
    let seq = Sequence::parse("GGGGAAAACCCCATATATAT").unwrap();

    let outcome = predictor.predict_3d(&seq).await.unwrap();
    assert!(!outcome.is_degraded(), "{:?}", outcome.error());
    let model = outcome.into_value();
    assert_eq!(model.source, ModelSource::Refined);
    assert_eq!(model.model_path, predictor.model_path_for(&seq));
    let content = std::fs::read_to_string(&model.model_path).unwrap();
    assert!(content.contains("1.000   2.000   3.000"));

    let work = predictor.workdirs().path_for(&seq);
    let input = std::fs::read_to_string(work.join("input.seq")).unwrap();
    assert_eq!(input.trim(), "ggggaaaaccccauauauau");
    let ss = std::fs::read_to_string(work.join("input.ss")).unwrap();
    assert_eq!(ss.trim().len(), 20);
    assert!(work.join("data").exists());
}

#[tokio::test]
async fn test_failing_simrna_degrades_to_helix() {
    let fx = Fixture::new();
    install(&fx.tools, "SimRNA", "#!/bin/sh\necho 'potentials missing' >&2\nexit 3\n");
    let predictor = fx.predictor(30);
    let seq = Sequence::parse("ACGTACGTACGTACGTACGT").unwrap();

    let outcome = predictor.predict_3d(&seq).await.unwrap();
    match outcome.error() {
        Some(AptamyxError::Tool(ToolFailure::Failed { status, stderr, .. })) => {
            assert_eq!(*status, Some(3));
            assert!(stderr.contains("potentials missing"));
        }
        other => panic!("unexpected outcome error: {other:?}"),
    }
    let model = outcome.into_value();
    assert_eq!(model.source, ModelSource::SyntheticHelix);
    assert_eq!(model.structure.dot_bracket.len(), 20);
    assert!(std::fs::read_to_string(&model.model_path).unwrap().contains("HEADER"));
}

#[tokio::test]
async fn test_missing_trajectory_is_reported() {
    let fx = Fixture::new();
    // reference frame only, never a trajectory
    install(
        &fx.tools,
        "SimRNA",
        "#!/bin/sh\ntouch output-000001.pdb\n",
    );
    install(&fx.tools, "SimRNA_trafl2pdbs", FAKE_TRAFL2PDBS);
    let predictor = fx.predictor(30);
    let seq = Sequence::parse("TTTTTGGGGGAAAAACCCCC").unwrap();

    let outcome = predictor.predict_3d(&seq).await.unwrap();
    match outcome.error() {
        Some(AptamyxError::Tool(ToolFailure::MissingArtifact { phase, searched })) => {
            assert_eq!(phase, "trajectory");
            assert_eq!(searched.len(), 2);
        }
        other => panic!("unexpected outcome error: {other:?}"),
    }
    assert_eq!(outcome.value().source, ModelSource::SyntheticHelix);
}

#[tokio::test]
async fn test_hung_simrna_times_out() {
    let fx = Fixture::new();
    install(&fx.tools, "SimRNA", "#!/bin/sh\nsleep 30\n");
    let predictor = fx.predictor(1);
    let seq = Sequence::parse("CCCCCAAAAAGGGGGTTTTT").unwrap();

    let outcome = predictor.predict_3d(&seq).await.unwrap();
    assert!(matches!(
        outcome.error(),
        Some(AptamyxError::Tool(ToolFailure::TimedOut { .. }))
    ));
    assert_eq!(outcome.value().source, ModelSource::SyntheticHelix);
}

#[tokio::test]
async fn test_same_sequence_runs_serialise() {
    let fx = Fixture::new();
    install(&fx.tools, "SimRNA", FAKE_SIMRNA);
    install(&fx.tools, "SimRNA_trafl2pdbs", FAKE_TRAFL2PDBS);
    let predictor = fx.predictor(30);
    let seq = Sequence::parse("GCGCGCAAAAGCGCGCAAAA").unwrap();

    let (a, b) = tokio::join!(predictor.predict_3d(&seq), predictor.predict_3d(&seq));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(!a.is_degraded(), "{:?}", a.error());
    assert!(!b.is_degraded(), "{:?}", b.error());
    assert_eq!(a.value().model_path, b.value().model_path);
}
