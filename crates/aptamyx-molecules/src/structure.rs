//! Secondary-structure folding and 3-D model prediction.
//!
//! Fast mode folds a sequence with a [`FoldingEngine`]. Detailed mode also
//! builds a 3-D model by walking an ordered ladder of [`ModelStrategy`]s:
//! SimRNA refinement first, then a synthetic helix that cannot fail on a
//! well-formed sequence. The folded structure and MFE are returned whichever
//! rung produced the model.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use aptamyx_common::{AptamyxError, PipelineConfig, RefinementConfig, Result, StageOutcome};

use crate::fold::{FoldingEngine, NearestNeighbourFolder, RnaFoldCli, SecondaryStructure};
use crate::pdb::{self, HelixGeometry};
use crate::sequence::Sequence;
use crate::tool::{find_artifact, ArtifactPattern, ExternalTool};
use crate::workdir::{WorkDir, WorkDirRegistry};

/// Which ladder rung produced a 3-D model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Refined,
    SyntheticHelix,
}

#[derive(Debug, Clone)]
pub struct Structure3D {
    pub structure: SecondaryStructure,
    pub model_path: PathBuf,
    pub source: ModelSource,
}

/// Everything a strategy needs to build one model.
pub struct ModelJob<'a> {
    pub sequence: &'a Sequence,
    pub structure: &'a SecondaryStructure,
    pub work_dir: &'a WorkDir,
    /// Stable destination for the finished model.
    pub output: &'a Path,
}

/// One rung of the 3-D fallback ladder.
///
/// Returning `Err` means "try the next strategy".
#[async_trait]
pub trait ModelStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn source(&self) -> ModelSource;
    async fn build(&self, job: &ModelJob<'_>) -> Result<PathBuf>;
}

// ── SimRNA ───────────────────────────────────────────────────────────────────

/// Drives SimRNA through reference frame, refinement and trajectory
/// conversion inside the sequence's work directory.
pub struct SimRnaRefinement {
    config: RefinementConfig,
}

impl SimRnaRefinement {
    pub fn new(config: RefinementConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn tool_path(&self, tool: &str) -> PathBuf {
        absolute(self.config.resolve(tool)).await
    }

    async fn prepare_inputs(&self, job: &ModelJob<'_>, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        clear_stale_artifacts(dir).await?;

        let seq_file = dir.join("input.seq");
        let ss_file = dir.join("input.ss");
        let rna = job.sequence.to_rna().as_str().to_lowercase();
        fs::write(&seq_file, format!("{rna}\n")).await?;
        fs::write(&ss_file, format!("{}\n", job.structure.dot_bracket)).await?;

        self.link_data_dir(dir).await;
        Ok((seq_file, ss_file))
    }

    /// SimRNA resolves its potentials from `./data`.
    async fn link_data_dir(&self, dir: &Path) {
        let data = self.config.simrna_dir.join("data");
        let link = dir.join("data");
        let data_is_dir = fs::metadata(&data).await.is_ok_and(|m| m.is_dir());
        if fs::symlink_metadata(&link).await.is_ok() || !data_is_dir {
            return;
        }
        let target = absolute(data).await;
        #[cfg(unix)]
        if let Err(e) = fs::symlink(&target, &link).await {
            warn!(link = %link.display(), error = %e, "Failed to link SimRNA data directory");
        }
        #[cfg(not(unix))]
        debug!(data = %target.display(), "Data directory link not supported on this platform");
    }
}

/// Canonical form of `path`, or `path` itself when it cannot be resolved
/// (a bare command name looked up on `PATH`, for instance).
async fn absolute(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).await.unwrap_or(path)
}

async fn clear_stale_artifacts(dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".pdb") || name.ends_with(".trafl") {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl ModelStrategy for SimRnaRefinement {
    fn name(&self) -> &'static str {
        "simrna"
    }

    fn source(&self) -> ModelSource {
        ModelSource::Refined
    }

    async fn build(&self, job: &ModelJob<'_>) -> Result<PathBuf> {
        // tools run inside the work dir, so every path handed to them is absolute
        let dir = &fs::canonicalize(job.work_dir.path()).await?;
        let (seq_file, ss_file) = self.prepare_inputs(job, dir).await?;

        let simrna = ExternalTool::new(self.tool_path(&self.config.binary).await, self.timeout());
        let converter =
            ExternalTool::new(self.tool_path(&self.config.trafl2pdbs).await, self.timeout());
        let simrna_dir = absolute(self.config.simrna_dir.clone()).await;
        let config_file = simrna_dir.join(&self.config.config_file);
        let prefix = dir.join("output");
        let simrna_args = |iterations: String| -> Vec<OsString> {
            vec![
                "-s".into(),
                seq_file.clone().into_os_string(),
                "-S".into(),
                ss_file.clone().into_os_string(),
                "-c".into(),
                config_file.clone().into_os_string(),
                "-o".into(),
                prefix.clone().into_os_string(),
                "-n".into(),
                iterations.into(),
            ]
        };

        info!(sequence = %job.sequence, phase = "reference", "Generating reference frame");
        simrna.run(simrna_args("0".into()), Some(dir)).await?;
        let reference = find_artifact(
            "reference frame",
            &[
                ArtifactPattern::Exact(dir.join("output-000001.pdb")),
                ArtifactPattern::suffix(dir, "-000001.pdb"),
            ],
        )
        .await?;
        let files = job.work_dir.list_files().await;
        debug!(files = ?files, "Work directory after reference run");

        info!(
            sequence = %job.sequence,
            phase = "refinement",
            iterations = self.config.iterations,
            "Running refinement"
        );
        simrna
            .run(simrna_args(self.config.iterations.to_string()), Some(dir))
            .await?;
        let trajectory = find_artifact(
            "trajectory",
            &[
                ArtifactPattern::Exact(dir.join("output.trafl")),
                ArtifactPattern::suffix(dir, ".trafl"),
            ],
        )
        .await?;

        info!(
            sequence = %job.sequence,
            phase = "conversion",
            frame = self.config.frame,
            "Converting trajectory"
        );
        let frame = self.config.frame.to_string();
        converter
            .run(
                [
                    reference.as_os_str(),
                    trajectory.as_os_str(),
                    OsStr::new(&frame),
                ],
                Some(dir),
            )
            .await?;
        let stem = trajectory
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".into());
        let converted = find_artifact(
            "converted model",
            &[
                ArtifactPattern::Exact(dir.join(format!("{stem}_{frame}.pdb"))),
                ArtifactPattern::suffix(dir, format!("_{frame}.pdb")),
            ],
        )
        .await?;

        fs::copy(&converted, job.output).await?;
        Ok(job.output.to_path_buf())
    }
}

// ── Synthetic helix ──────────────────────────────────────────────────────────

pub struct SyntheticHelix {
    geometry: HelixGeometry,
}

impl SyntheticHelix {
    pub fn new(geometry: HelixGeometry) -> Self {
        Self { geometry }
    }
}

#[async_trait]
impl ModelStrategy for SyntheticHelix {
    fn name(&self) -> &'static str {
        "synthetic-helix"
    }

    fn source(&self) -> ModelSource {
        ModelSource::SyntheticHelix
    }

    async fn build(&self, job: &ModelJob<'_>) -> Result<PathBuf> {
        pdb::write_helix_model(job.sequence, &self.geometry, job.output).await
    }
}

// ── Predictor ────────────────────────────────────────────────────────────────

pub struct StructurePredictor {
    engine: Arc<dyn FoldingEngine>,
    workdirs: Arc<WorkDirRegistry>,
    output_dir: PathBuf,
    strategies: Vec<Box<dyn ModelStrategy>>,
}

impl StructurePredictor {
    /// Predictor using `engine` for folding and the default ladder
    /// (SimRNA, then synthetic helix) for 3-D models under `temp_dir`.
    pub fn new<P: AsRef<Path>>(
        engine: Arc<dyn FoldingEngine>,
        refinement: RefinementConfig,
        temp_dir: P,
    ) -> Self {
        let geometry = HelixGeometry {
            radius: refinement.helix_radius,
            rise_per_residue: refinement.rise_per_residue,
            residues_per_turn: refinement.residues_per_turn,
        };
        let strategies: Vec<Box<dyn ModelStrategy>> = vec![
            Box::new(SimRnaRefinement::new(refinement)),
            Box::new(SyntheticHelix::new(geometry)),
        ];
        Self::with_strategies(engine, strategies, temp_dir)
    }

    pub fn with_strategies<P: AsRef<Path>>(
        engine: Arc<dyn FoldingEngine>,
        strategies: Vec<Box<dyn ModelStrategy>>,
        temp_dir: P,
    ) -> Self {
        let output_dir = temp_dir.as_ref().to_path_buf();
        Self {
            engine,
            workdirs: Arc::new(WorkDirRegistry::new(&output_dir, "simrna")),
            output_dir,
            strategies,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let engine: Arc<dyn FoldingEngine> = match &config.folding.rnafold_bin {
            Some(bin) => Arc::new(RnaFoldCli::new(
                bin,
                Duration::from_secs(config.folding.timeout_secs),
            )),
            None => Arc::new(NearestNeighbourFolder::new(config.folding.max_interior_loop)),
        };
        Self::new(engine, config.refinement.clone(), &config.execution.temp_dir)
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn workdirs(&self) -> &Arc<WorkDirRegistry> {
        &self.workdirs
    }

    /// Stable location of the 3-D model for `sequence`.
    pub fn model_path_for(&self, sequence: &Sequence) -> PathBuf {
        self.output_dir
            .join(format!("aptamer_{}.pdb", sequence.content_key()))
    }

    /// Fast mode on raw text. Malformed input is an `Input` error.
    pub async fn fold(&self, raw: &str) -> Result<SecondaryStructure> {
        let sequence = Sequence::parse(raw)?;
        self.fold_sequence(&sequence).await
    }

    pub async fn fold_sequence(&self, sequence: &Sequence) -> Result<SecondaryStructure> {
        self.engine.fold(&sequence.to_rna()).await
    }

    /// Detailed mode: fold, then build a 3-D model.
    ///
    /// Returns `Degraded` when an earlier rung failed and a later one
    /// supplied the model. Only malformed input and a failure of every rung
    /// are errors.
    pub async fn predict_3d(&self, sequence: &Sequence) -> Result<StageOutcome<Structure3D>> {
        let structure = self.fold_sequence(sequence).await?;
        let work_dir = self.workdirs.acquire(sequence).await?;
        let _guard = work_dir.lock().await;

        let output = self.model_path_for(sequence);
        let job = ModelJob {
            sequence,
            structure: &structure,
            work_dir: &work_dir,
            output: &output,
        };

        let mut first_failure: Option<AptamyxError> = None;
        for strategy in &self.strategies {
            match strategy.build(&job).await {
                Ok(model_path) => {
                    let source = strategy.source();
                    info!(
                        sequence = %sequence,
                        strategy = strategy.name(),
                        model = %model_path.display(),
                        "3-D model ready"
                    );
                    let value = Structure3D {
                        structure,
                        model_path,
                        source,
                    };
                    return Ok(match first_failure {
                        None => StageOutcome::Ok(value),
                        Some(error) => StageOutcome::degraded(value, error),
                    });
                }
                Err(e) => {
                    warn!(
                        sequence = %sequence,
                        strategy = strategy.name(),
                        error = %e,
                        "3-D model strategy failed, trying next"
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }

        Err(first_failure.unwrap_or_else(|| {
            AptamyxError::Config("no 3-D model strategies configured".into())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::RnaSequence;
    use aptamyx_common::ToolFailure;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records every sequence it is asked to fold.
    #[derive(Default)]
    struct RecordingEngine {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FoldingEngine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }

        async fn fold(&self, rna: &RnaSequence) -> Result<SecondaryStructure> {
            self.seen.lock().unwrap().push(rna.as_str().to_string());
            Ok(SecondaryStructure {
                dot_bracket: ".".repeat(rna.len()),
                mfe: 0.0,
            })
        }
    }

    fn missing_simrna() -> RefinementConfig {
        RefinementConfig {
            simrna_dir: PathBuf::from("/nonexistent/SimRNA"),
            ..RefinementConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fold_replaces_every_thymine() {
        let engine = Arc::new(RecordingEngine::default());
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::new(engine.clone(), missing_simrna(), dir.path());

        predictor.fold("ATCG").await.unwrap();
        predictor.fold("tttttttttttttttt").await.unwrap();
        let seen = engine.seen.lock().unwrap();
        assert_eq!(seen[0], "AUCG");
        assert!(seen.iter().all(|s| !s.contains('T')));
    }

    #[tokio::test]
    async fn test_fold_rejects_malformed_input() {
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::new(
            Arc::new(NearestNeighbourFolder::default()),
            missing_simrna(),
            dir.path(),
        );
        assert!(matches!(predictor.fold("").await, Err(AptamyxError::Input(_))));
        assert!(matches!(predictor.fold("ACGTX").await, Err(AptamyxError::Input(_))));
    }

    #[tokio::test]
    async fn test_fold_is_deterministic() {
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::new(
            Arc::new(NearestNeighbourFolder::default()),
            missing_simrna(),
            dir.path(),
        );
        let a = predictor.fold("GGGAAATCCCGCGCATTAGCGC").await.unwrap();
        let b = predictor.fold("gggaaatcccgcgcattagcgc").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_simrna_falls_back_to_helix() {
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::new(
            Arc::new(NearestNeighbourFolder::default()),
            missing_simrna(),
            dir.path(),
        );
        let seq = Sequence::parse("GGGGAAAACCCCACGTACGT").unwrap();

        let outcome = predictor.predict_3d(&seq).await.unwrap();
        assert!(outcome.is_degraded());
        assert!(matches!(
            outcome.error(),
            Some(AptamyxError::Tool(ToolFailure::NotFound { .. }))
        ));

        let model = outcome.into_value();
        assert_eq!(model.source, ModelSource::SyntheticHelix);
        assert_eq!(model.structure.dot_bracket.len(), 20);
        assert_eq!(model.model_path, predictor.model_path_for(&seq));
        let content = std::fs::read_to_string(&model.model_path).unwrap();
        assert_eq!(pdb::summarize(&content).atoms, 20);
        assert!(predictor.workdirs().path_for(&seq).is_dir());
    }

    #[tokio::test]
    async fn test_clean_ladder_is_not_degraded() {
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::with_strategies(
            Arc::new(NearestNeighbourFolder::default()),
            vec![Box::new(SyntheticHelix::new(HelixGeometry::default()))],
            dir.path(),
        );
        let seq = Sequence::parse("ACGTACGTACGTACGTACGT").unwrap();
        let outcome = predictor.predict_3d(&seq).await.unwrap();
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_empty_ladder_is_an_error() {
        let dir = tempdir().unwrap();
        let predictor = StructurePredictor::with_strategies(
            Arc::new(NearestNeighbourFolder::default()),
            Vec::new(),
            dir.path(),
        );
        let seq = Sequence::parse("ACGTACGTACGTACGTACGT").unwrap();
        assert!(predictor.predict_3d(&seq).await.is_err());
    }
}
