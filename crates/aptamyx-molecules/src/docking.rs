//! Binding-affinity estimation against a target structure.
//!
//! Two ladders:
//!   1. Target preparation. A missing or unusable target switches the whole
//!      batch to the placeholder affinity.
//!   2. Per candidate, an ordered list of [`AffinityStrategy`]s. The first
//!      one that returns a value wins; a candidate whose strategies all fail
//!      gets the placeholder. Siblings are unaffected.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use aptamyx_common::{
    AptamyxError, DockingConfig, DockingMethod, PipelineConfig, Result, StageOutcome, ToolFailure,
};

use crate::pdb;
use crate::sequence::Sequence;
use crate::table::CandidateRecord;
use crate::tool::{find_artifact, ArtifactPattern, ExternalTool};
use crate::workdir::WorkDirRegistry;

/// A target that passed preparation.
#[derive(Debug, Clone)]
pub struct PreparedTarget {
    pub source: PathBuf,
    /// Docking-ready receptor (`.pdbqt` for Vina, the source PDB otherwise)
    pub receptor: PathBuf,
    pub atoms: usize,
}

/// One way of turning a candidate into an affinity.
///
/// Returning `Err` means "try the next strategy".
#[async_trait]
pub trait AffinityStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn estimate(&self, candidate: &CandidateRecord, target: &PreparedTarget) -> Result<f64>;
}

// ── Strategies ────────────────────────────────────────────────────────────────

/// `-(4 + 8·GC)`: deterministic and always within [-12, -4].
pub struct CompositionEstimate;

impl CompositionEstimate {
    pub fn affinity(sequence: &Sequence) -> f64 {
        -(4.0 + 8.0 * sequence.gc_content())
    }
}

#[async_trait]
impl AffinityStrategy for CompositionEstimate {
    fn name(&self) -> &'static str {
        "composition"
    }

    async fn estimate(&self, candidate: &CandidateRecord, _target: &PreparedTarget) -> Result<f64> {
        Ok(Self::affinity(&candidate.sequence))
    }
}

/// Fixed constant, used as the last rung.
pub struct Placeholder(pub f64);

#[async_trait]
impl AffinityStrategy for Placeholder {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    async fn estimate(
        &self,
        _candidate: &CandidateRecord,
        _target: &PreparedTarget,
    ) -> Result<f64> {
        Ok(self.0)
    }
}

/// Ligand preparation plus AutoDock Vina, one work dir per sequence.
pub struct VinaDocking {
    config: DockingConfig,
    workdirs: Arc<WorkDirRegistry>,
    mode_row: Regex,
}

impl VinaDocking {
    pub fn new(config: DockingConfig, workdirs: Arc<WorkDirRegistry>) -> Self {
        Self {
            config,
            workdirs,
            mode_row: Regex::new(r"(?m)^\s*1\s+(-?\d+(?:\.\d+)?)\s").expect("static Vina pattern"),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Affinity of the best (first) binding mode in Vina's result table.
    pub fn parse_affinity(&self, stdout: &str) -> Result<f64> {
        let caps = self.mode_row.captures(stdout).ok_or_else(|| {
            AptamyxError::Tool(ToolFailure::Unparseable {
                executable: self.config.vina_bin.clone(),
                detail: "no mode 1 row in result table".into(),
            })
        })?;
        caps[1].parse::<f64>().map_err(|e| {
            AptamyxError::Tool(ToolFailure::Unparseable {
                executable: self.config.vina_bin.clone(),
                detail: format!("affinity '{}': {e}", &caps[1]),
            })
        })
    }
}

#[async_trait]
impl AffinityStrategy for VinaDocking {
    fn name(&self) -> &'static str {
        "vina"
    }

    async fn estimate(&self, candidate: &CandidateRecord, target: &PreparedTarget) -> Result<f64> {
        let model = candidate.model_path.as_ref().ok_or_else(|| {
            AptamyxError::Data(format!(
                "{} has no 3-D model to prepare as a ligand",
                candidate.sequence
            ))
        })?;

        let work_dir = self.workdirs.acquire(&candidate.sequence).await?;
        let _guard = work_dir.lock().await;
        let dir = tokio::fs::canonicalize(work_dir.path()).await?;
        let model = tokio::fs::canonicalize(model).await?;

        let ligand = dir.join("ligand.pdbqt");
        ExternalTool::new(&self.config.ligand_prep_bin, self.timeout())
            .run(
                [
                    "-l".into(),
                    model.into_os_string(),
                    "-o".into(),
                    ligand.clone().into_os_string(),
                ],
                Some(&dir),
            )
            .await?;
        let ligand = find_artifact("ligand", &[ArtifactPattern::Exact(ligand)]).await?;

        let [cx, cy, cz] = self.config.center;
        let [sx, sy, sz] = self.config.size;
        let args: Vec<OsString> = vec![
            "--receptor".into(),
            target.receptor.clone().into_os_string(),
            "--ligand".into(),
            ligand.into_os_string(),
            "--center_x".into(),
            cx.to_string().into(),
            "--center_y".into(),
            cy.to_string().into(),
            "--center_z".into(),
            cz.to_string().into(),
            "--size_x".into(),
            sx.to_string().into(),
            "--size_y".into(),
            sy.to_string().into(),
            "--size_z".into(),
            sz.to_string().into(),
            "--exhaustiveness".into(),
            self.config.exhaustiveness.to_string().into(),
            "--out".into(),
            dir.join("docked.pdbqt").into_os_string(),
        ];
        let output = ExternalTool::new(&self.config.vina_bin, self.timeout())
            .run(args, Some(&dir))
            .await?;

        let affinity = self.parse_affinity(&output.stdout)?;
        debug!(sequence = %candidate.sequence, affinity, "Vina finished");
        Ok(affinity)
    }
}

// ── Estimator ─────────────────────────────────────────────────────────────────

pub struct DockingEstimator {
    config: DockingConfig,
    workers: usize,
    strategies: Vec<Arc<dyn AffinityStrategy>>,
}

impl DockingEstimator {
    pub fn new<P: AsRef<Path>>(config: DockingConfig, temp_dir: P, workers: usize) -> Self {
        let strategies: Vec<Arc<dyn AffinityStrategy>> = match config.method {
            DockingMethod::Composition => vec![Arc::new(CompositionEstimate)],
            DockingMethod::Vina => {
                let workdirs = Arc::new(WorkDirRegistry::new(temp_dir, "dock"));
                vec![
                    Arc::new(VinaDocking::new(config.clone(), workdirs)),
                    Arc::new(Placeholder(config.placeholder_affinity)),
                ]
            }
        };
        Self::with_strategies(config, strategies, workers)
    }

    pub fn with_strategies(
        config: DockingConfig,
        strategies: Vec<Arc<dyn AffinityStrategy>>,
        workers: usize,
    ) -> Self {
        Self {
            config,
            workers: workers.max(1),
            strategies,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.docking.clone(),
            &config.execution.temp_dir,
            config.execution.workers,
        )
    }

    pub fn placeholder(&self) -> f64 {
        self.config.placeholder_affinity
    }

    /// Check the target and, for Vina, convert it to a receptor file.
    pub async fn prepare_target(&self, target: &Path) -> Result<PreparedTarget> {
        let summary = pdb::inspect_target(target).await?;
        debug!(
            target = %target.display(),
            atoms = summary.atoms,
            chains = ?summary.chains,
            "Target inspected"
        );

        let receptor = match self.config.method {
            DockingMethod::Composition => target.to_path_buf(),
            DockingMethod::Vina => {
                let receptor = target.with_extension("pdbqt");
                ExternalTool::new(
                    &self.config.receptor_prep_bin,
                    Duration::from_secs(self.config.timeout_secs),
                )
                .run(
                    [
                        "-r".into(),
                        target.as_os_str().to_os_string(),
                        "-o".into(),
                        receptor.clone().into_os_string(),
                    ],
                    None,
                )
                .await?;
                find_artifact("receptor", &[ArtifactPattern::Exact(receptor)]).await?
            }
        };

        Ok(PreparedTarget {
            source: target.to_path_buf(),
            receptor,
            atoms: summary.atoms,
        })
    }

    /// One affinity per distinct candidate sequence. Never fails.
    pub async fn estimate(
        &self,
        candidates: &[CandidateRecord],
        target: &Path,
    ) -> StageOutcome<HashMap<Sequence, f64>> {
        let mut unique: Vec<&CandidateRecord> = Vec::new();
        let mut seen = HashSet::new();
        for candidate in candidates {
            if seen.insert(&candidate.sequence) {
                unique.push(candidate);
            }
        }

        let prepared = match self.prepare_target(target).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(
                    target = %target.display(),
                    error = %e,
                    placeholder = self.placeholder(),
                    "Target unusable, assigning placeholder affinity to every candidate"
                );
                let affinities = unique
                    .iter()
                    .map(|c| (c.sequence.clone(), self.placeholder()))
                    .collect();
                return StageOutcome::degraded(affinities, e);
            }
        };
        info!(
            target = %prepared.source.display(),
            receptor = %prepared.receptor.display(),
            n = unique.len(),
            "Estimating affinities"
        );

        let results: Vec<(Sequence, f64, Option<AptamyxError>)> = stream::iter(unique)
            .map(|candidate| {
                let prepared = &prepared;
                async move {
                    let (affinity, failure) = self.estimate_one(candidate, prepared).await;
                    (candidate.sequence.clone(), affinity, failure)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut affinities = HashMap::with_capacity(results.len());
        let mut first_failure = None;
        let mut fell_back = 0usize;
        for (sequence, affinity, failure) in results {
            if let Some(e) = failure {
                fell_back += 1;
                first_failure.get_or_insert(e);
            }
            affinities.insert(sequence, affinity);
        }

        match first_failure {
            None => StageOutcome::Ok(affinities),
            Some(e) => {
                warn!(
                    fell_back,
                    total = affinities.len(),
                    "Some candidates used a fallback affinity"
                );
                StageOutcome::degraded(affinities, e)
            }
        }
    }

    /// Walk the strategy ladder for one candidate. The error, if any, is the
    /// first strategy failure seen before a value was produced.
    async fn estimate_one(
        &self,
        candidate: &CandidateRecord,
        target: &PreparedTarget,
    ) -> (f64, Option<AptamyxError>) {
        let mut first_failure = None;
        for strategy in &self.strategies {
            match strategy.estimate(candidate, target).await {
                Ok(affinity) => return (affinity, first_failure),
                Err(e) => {
                    warn!(
                        sequence = %candidate.sequence,
                        strategy = strategy.name(),
                        error = %e,
                        "Affinity strategy failed, trying next"
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }
        let error = first_failure.unwrap_or_else(|| {
            AptamyxError::Config("no affinity strategies configured".into())
        });
        (self.placeholder(), Some(error))
    }
}
