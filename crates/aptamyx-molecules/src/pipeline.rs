//! End-to-end candidate pipeline.
//!
//! Orchestrates one job:
//!   1. Generate random candidates
//!   2. Fold each candidate (and build 3-D models in detailed mode)
//!   3. Estimate affinities against the target, if docking is enabled
//!   4. Inner-join affinities onto the table
//!   5. Score and rank
//!   6. Emit progress events via broadcast channel
//!
//! Only invalid requests and an empty generation halt a run. Every other
//! failure is isolated to its candidate or its stage, recorded in the
//! report, and the run continues with the best table available.

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use aptamyx_common::{AptamyxError, GenerationConfig, PipelineConfig, Result, StageOutcome};

use crate::docking::DockingEstimator;
use crate::generate::SequenceGenerator;
use crate::scoring::{CandidateScorer, ScoringTarget};
use crate::sequence::Sequence;
use crate::structure::StructurePredictor;
use crate::table::{CandidateRecord, CandidateTable, Column};

/// Work directories listed in the report in detailed mode.
const DIAGNOSTIC_CANDIDATES: usize = 3;

// ── Request ───────────────────────────────────────────────────────────────────

/// Parameters for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub target: PathBuf,
    pub length: usize,
    pub count: usize,
    pub docking: bool,
    pub detailed_3d: bool,
}

impl PipelineRequest {
    pub fn new(target: impl Into<PathBuf>, length: usize, count: usize) -> Self {
        Self {
            target: target.into(),
            length,
            count,
            docking: true,
            detailed_3d: false,
        }
    }

    /// Reject lengths and counts outside the configured policy.
    pub fn validate(&self, policy: &GenerationConfig) -> Result<()> {
        if !(policy.min_length..=policy.max_length).contains(&self.length) {
            return Err(AptamyxError::Input(format!(
                "sequence length {} outside {}..={}",
                self.length, policy.min_length, policy.max_length
            )));
        }
        if !(policy.min_count..=policy.max_count).contains(&self.count) {
            return Err(AptamyxError::Input(format!(
                "candidate count {} outside {}..={}",
                self.count, policy.min_count, policy.max_count
            )));
        }
        Ok(())
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generation,
    Structure,
    Docking,
    Merge,
    Scoring,
}

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineProgress {
    pub run_id: Uuid,
    pub stage: Stage,
    pub message: String,
    pub completed: usize,
    pub total: usize,
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    /// Ran, but substituted fallback values somewhere
    Degraded,
    /// Did not run to completion; its input passed through unchanged
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl StageReport {
    fn new(stage: Stage, status: StageStatus, message: Option<String>) -> Self {
        Self {
            stage,
            status,
            message,
        }
    }

    fn from_outcome<T>(stage: Stage, outcome: &StageOutcome<T>) -> Self {
        match outcome.error() {
            None => Self::new(stage, StageStatus::Ok, None),
            Some(e) => Self::new(stage, StageStatus::Degraded, Some(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Degraded,
}

/// Files left in one candidate's simulation work directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkDirDiagnostic {
    pub sequence: Sequence,
    pub path: PathBuf,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub stages: Vec<StageReport>,
    pub table: CandidateTable,
    pub diagnostics: Vec<WorkDirDiagnostic>,
}

impl PipelineReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn degraded_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Degraded | StageStatus::Failed))
    }
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

pub struct AptamerPipeline {
    config: PipelineConfig,
    predictor: Arc<StructurePredictor>,
    docking: DockingEstimator,
    scorer: CandidateScorer,
}

impl AptamerPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let predictor = Arc::new(StructurePredictor::from_config(&config));
        let docking = DockingEstimator::from_config(&config);
        let scorer = CandidateScorer::from_config(&config.scoring);
        Ok(Self::with_components(config, predictor, docking, scorer))
    }

    pub fn with_components(
        config: PipelineConfig,
        predictor: Arc<StructurePredictor>,
        docking: DockingEstimator,
        scorer: CandidateScorer,
    ) -> Self {
        Self {
            config,
            predictor,
            docking,
            scorer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn predictor(&self) -> &Arc<StructurePredictor> {
        &self.predictor
    }

    /// Run one job.
    ///
    /// Progress events are sent via `progress_tx` if provided.
    #[instrument(skip(self, progress_tx), fields(target = %request.target.display()))]
    pub async fn run(
        &self,
        request: &PipelineRequest,
        progress_tx: Option<broadcast::Sender<PipelineProgress>>,
    ) -> Result<PipelineReport> {
        request.validate(&self.config.generation)?;

        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let t0 = std::time::Instant::now();
        info!(
            run_id = %run_id,
            length = request.length,
            count = request.count,
            docking = request.docking,
            detailed_3d = request.detailed_3d,
            "Starting aptamer pipeline"
        );

        let emit = |stage: Stage, message: String, completed: usize, total: usize| {
            if let Some(ref tx) = progress_tx {
                let _ = tx.send(PipelineProgress {
                    run_id,
                    stage,
                    message,
                    completed,
                    total,
                });
            }
        };
        let mut stages = Vec::new();

        // ── 1. Generate ──────────────────────────────────────────────────────
        emit(Stage::Generation, "Generating candidate sequences".into(), 0, request.count);
        let sequences = SequenceGenerator::from_optional_seed(self.config.generation.seed)
            .generate(request.count, request.length);
        if sequences.is_empty() {
            return Err(AptamyxError::GenerationEmpty);
        }
        info!(n = sequences.len(), "Candidates generated");
        stages.push(StageReport::new(Stage::Generation, StageStatus::Ok, None));

        // ── 2. Structure ─────────────────────────────────────────────────────
        emit(
            Stage::Structure,
            format!("Predicting structures with {}", self.predictor.engine_name()),
            0,
            sequences.len(),
        );
        let (mut table, structure_report) = self
            .predict_structures(&sequences, request.detailed_3d, &emit)
            .await;
        stages.push(structure_report);

        // ── 3. Docking + 4. Merge ────────────────────────────────────────────
        if request.docking {
            emit(Stage::Docking, "Estimating binding affinities".into(), 0, table.len());
            let outcome = self.docking.estimate(table.rows(), &request.target).await;
            stages.push(StageReport::from_outcome(Stage::Docking, &outcome));

            match table.join_affinities(outcome.value()) {
                Ok(joined) => {
                    stages.push(StageReport::new(Stage::Merge, StageStatus::Ok, None));
                    table = joined;
                }
                Err(e) => {
                    warn!(error = %e, "Affinity merge failed, continuing with pre-docking table");
                    stages.push(StageReport::new(
                        Stage::Merge,
                        StageStatus::Failed,
                        Some(e.to_string()),
                    ));
                }
            }
        } else {
            info!("Docking disabled");
            stages.push(StageReport::new(Stage::Docking, StageStatus::Skipped, None));
        }

        // ── 5. Score ─────────────────────────────────────────────────────────
        let target = if table.has_column(Column::Affinity) {
            ScoringTarget::Affinity
        } else {
            ScoringTarget::Mfe
        };
        emit(
            Stage::Scoring,
            format!("Scoring candidates against {}", target.column().name()),
            0,
            table.len(),
        );
        let outcome = self.scorer.score_against(&table, target);
        stages.push(StageReport::from_outcome(Stage::Scoring, &outcome));
        let table = outcome.into_value();

        let diagnostics = if request.detailed_3d {
            self.diagnostics(&sequences).await
        } else {
            Vec::new()
        };

        let status = if stages
            .iter()
            .all(|s| matches!(s.status, StageStatus::Ok | StageStatus::Skipped))
        {
            RunStatus::Complete
        } else {
            RunStatus::Degraded
        };
        let duration_ms = t0.elapsed().as_millis() as u64;
        info!(run_id = %run_id, ?status, rows = table.len(), duration_ms, "Pipeline finished");
        emit(Stage::Scoring, format!("Finished: {:?}", status), table.len(), table.len());

        Ok(PipelineReport {
            run_id,
            started_at,
            duration_ms,
            status,
            stages,
            table,
            diagnostics,
        })
    }

    /// Fold every candidate concurrently. Each task owns one slot of the
    /// arena, so a failure only ever turns its own row into a sentinel.
    async fn predict_structures<F>(
        &self,
        sequences: &[Sequence],
        detailed: bool,
        emit: &F,
    ) -> (CandidateTable, StageReport)
    where
        F: Fn(Stage, String, usize, usize),
    {
        let total = sequences.len();
        let mut slots: Vec<Option<CandidateRecord>> = vec![None; total];
        let mut fallbacks = 0usize;

        let mut tasks = stream::iter(sequences.iter().enumerate())
            .map(|(idx, sequence)| async move {
                let outcome = self.predict_one(sequence, detailed).await;
                (idx, outcome)
            })
            .buffer_unordered(self.config.execution.workers.max(1));

        let mut completed = 0;
        while let Some((idx, (record, fell_back))) = tasks.next().await {
            completed += 1;
            if fell_back {
                fallbacks += 1;
            }
            emit(
                Stage::Structure,
                format!("Folded {}", record.sequence),
                completed,
                total,
            );
            slots[idx] = Some(record);
        }

        let rows: Vec<CandidateRecord> = slots
            .into_iter()
            .zip(sequences)
            .map(|(slot, sequence)| {
                slot.unwrap_or_else(|| CandidateRecord::failed(sequence.clone(), "not processed"))
            })
            .collect();
        let failed = rows.iter().filter(|r| r.is_failed()).count();

        let mut table = CandidateTable::new(rows);
        if detailed {
            table.add_column(Column::ModelPath);
        }

        let report = if failed == 0 && fallbacks == 0 {
            StageReport::new(Stage::Structure, StageStatus::Ok, None)
        } else {
            StageReport::new(
                Stage::Structure,
                StageStatus::Degraded,
                Some(format!(
                    "{failed} of {total} candidates failed to fold, {fallbacks} synthetic models"
                )),
            )
        };
        info!(total, failed, fallbacks, "Structure stage finished");
        (table, report)
    }

    /// Row for one candidate, plus whether a 3-D fallback was used.
    async fn predict_one(&self, sequence: &Sequence, detailed: bool) -> (CandidateRecord, bool) {
        let mut record = CandidateRecord::new(sequence.clone());
        if detailed {
            match self.predictor.predict_3d(sequence).await {
                Ok(outcome) => {
                    let fell_back = outcome.is_degraded();
                    let model = outcome.into_value();
                    record.structure = model.structure.dot_bracket;
                    record.mfe = Some(model.structure.mfe);
                    record.model_path = Some(model.model_path);
                    (record, fell_back)
                }
                Err(e) => {
                    warn!(sequence = %sequence, error = %e, "Structure prediction failed");
                    (CandidateRecord::failed(sequence.clone(), e.to_string()), false)
                }
            }
        } else {
            match self.predictor.fold_sequence(sequence).await {
                Ok(structure) => {
                    record.structure = structure.dot_bracket;
                    record.mfe = Some(structure.mfe);
                    (record, false)
                }
                Err(e) => {
                    warn!(sequence = %sequence, error = %e, "Folding failed");
                    (CandidateRecord::failed(sequence.clone(), e.to_string()), false)
                }
            }
        }
    }

    async fn diagnostics(&self, sequences: &[Sequence]) -> Vec<WorkDirDiagnostic> {
        let mut diagnostics = Vec::new();
        for sequence in sequences.iter().take(DIAGNOSTIC_CANDIDATES) {
            let Some(dir) = self.predictor.workdirs().get(sequence) else {
                continue;
            };
            diagnostics.push(WorkDirDiagnostic {
                sequence: sequence.clone(),
                path: dir.path().to_path_buf(),
                files: dir.list_files().await,
            });
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bounds() {
        let policy = GenerationConfig::default();
        assert!(PipelineRequest::new("t.pdb", 20, 5).validate(&policy).is_ok());
        assert!(PipelineRequest::new("t.pdb", 15, 100).validate(&policy).is_ok());
        for (length, count) in [(14, 5), (41, 5), (20, 4), (20, 101)] {
            let err = PipelineRequest::new("t.pdb", length, count)
                .validate(&policy)
                .unwrap_err();
            assert!(matches!(err, AptamyxError::Input(_)), "{length}/{count}");
        }
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.execution.temp_dir = dir.path().to_path_buf();
        let pipeline = AptamerPipeline::new(config).unwrap();

        let err = pipeline
            .run(&PipelineRequest::new("t.pdb", 50, 5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AptamyxError::Input(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_progress_events_cover_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.execution.temp_dir = dir.path().to_path_buf();
        config.generation.seed = Some(11);
        config.scoring.n_trees = 10;
        let pipeline = AptamerPipeline::new(config).unwrap();

        let (tx, mut rx) = broadcast::channel(256);
        let mut request = PipelineRequest::new(dir.path().join("missing.pdb"), 15, 5);
        request.docking = true;
        pipeline.run(&request, Some(tx)).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !seen.contains(&event.stage) {
                seen.push(event.stage);
            }
        }
        assert_eq!(
            seen,
            vec![Stage::Generation, Stage::Structure, Stage::Docking, Stage::Scoring]
        );
    }
}
