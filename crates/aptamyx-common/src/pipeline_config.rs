//! Pipeline configuration.
//!
//! Loaded from TOML (see `aptamyx.example.toml`). Every field has a default,
//! so an empty file or a missing section yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AptamyxError, Result};

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidate generation bounds
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Secondary-structure folding
    #[serde(default)]
    pub folding: FoldingConfig,

    /// External 3-D refinement (detailed mode)
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Docking / affinity estimation
    #[serde(default)]
    pub docking: DockingConfig,

    /// Tree-ensemble scorer hyperparameters
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Scratch space and task width
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations that could never produce a run.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        if g.min_length == 0 || g.min_length > g.max_length {
            return Err(AptamyxError::Config(format!(
                "invalid length bounds [{}, {}]",
                g.min_length, g.max_length
            )));
        }
        if g.min_count == 0 || g.min_count > g.max_count {
            return Err(AptamyxError::Config(format!(
                "invalid candidate count bounds [{}, {}]",
                g.min_count, g.max_count
            )));
        }
        if self.scoring.n_trees == 0 {
            return Err(AptamyxError::Config("scoring.n_trees must be positive".into()));
        }
        if self.execution.workers == 0 {
            return Err(AptamyxError::Config("execution.workers must be positive".into()));
        }
        if self.docking.placeholder_affinity >= 0.0 {
            return Err(AptamyxError::Config(format!(
                "docking.placeholder_affinity must be negative, got {}",
                self.docking.placeholder_affinity
            )));
        }
        Ok(())
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_min_count")]
    pub min_count: usize,

    #[serde(default = "default_max_count")]
    pub max_count: usize,

    #[serde(default = "default_length")]
    pub default_length: usize,

    #[serde(default = "default_count")]
    pub default_count: usize,

    /// Fixed RNG seed; `None` draws from OS entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_min_length() -> usize { 15 }
fn default_max_length() -> usize { 40 }
fn default_min_count() -> usize { 5 }
fn default_max_count() -> usize { 100 }
fn default_length() -> usize { 20 }
fn default_count() -> usize { 20 }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            min_count: default_min_count(),
            max_count: default_max_count(),
            default_length: default_length(),
            default_count: default_count(),
            seed: None,
        }
    }
}

// ── Folding ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldingConfig {
    /// Path to an RNAfold executable. When unset the built-in
    /// nearest-neighbour folder is used.
    #[serde(default)]
    pub rnafold_bin: Option<String>,

    /// Largest interior loop (unpaired bases on both sides) considered
    #[serde(default = "default_max_interior_loop")]
    pub max_interior_loop: usize,

    /// Per-sequence limit for an RNAfold run
    #[serde(default = "default_folding_timeout")]
    pub timeout_secs: u64,
}

fn default_max_interior_loop() -> usize { 30 }
fn default_folding_timeout() -> u64 { 60 }

impl Default for FoldingConfig {
    fn default() -> Self {
        Self {
            rnafold_bin: None,
            max_interior_loop: default_max_interior_loop(),
            timeout_secs: default_folding_timeout(),
        }
    }
}

// ── Refinement (SimRNA) ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// SimRNA installation directory (binaries, config file, `data/`)
    #[serde(default = "default_simrna_dir")]
    pub simrna_dir: PathBuf,

    #[serde(default = "default_simrna_bin")]
    pub binary: String,

    #[serde(default = "default_trafl2pdbs")]
    pub trafl2pdbs: String,

    #[serde(default = "default_simrna_config")]
    pub config_file: String,

    /// Iteration budget of the full refinement run
    #[serde(default = "default_iterations")]
    pub iterations: u64,

    /// Trajectory frame converted to the final model
    #[serde(default = "default_frame")]
    pub frame: u32,

    #[serde(default = "default_refinement_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_helix_radius")]
    pub helix_radius: f64,

    #[serde(default = "default_rise")]
    pub rise_per_residue: f64,

    #[serde(default = "default_residues_per_turn")]
    pub residues_per_turn: f64,
}

fn default_simrna_dir() -> PathBuf { PathBuf::from("SimRNA") }
fn default_simrna_bin() -> String { "SimRNA".to_string() }
fn default_trafl2pdbs() -> String { "SimRNA_trafl2pdbs".to_string() }
fn default_simrna_config() -> String { "configSA.dat".to_string() }
fn default_iterations() -> u64 { 10_000 }
fn default_frame() -> u32 { 1 }
fn default_refinement_timeout() -> u64 { 1800 }
fn default_helix_radius() -> f64 { 5.0 }
fn default_rise() -> f64 { 3.4 }
fn default_residues_per_turn() -> f64 { 10.0 }

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            simrna_dir: default_simrna_dir(),
            binary: default_simrna_bin(),
            trafl2pdbs: default_trafl2pdbs(),
            config_file: default_simrna_config(),
            iterations: default_iterations(),
            frame: default_frame(),
            timeout_secs: default_refinement_timeout(),
            helix_radius: default_helix_radius(),
            rise_per_residue: default_rise(),
            residues_per_turn: default_residues_per_turn(),
        }
    }
}

impl RefinementConfig {
    /// Resolve a tool name against `simrna_dir` unless it is already a path.
    pub fn resolve(&self, tool: &str) -> PathBuf {
        let candidate = Path::new(tool);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            candidate.to_path_buf()
        } else {
            self.simrna_dir.join(candidate)
        }
    }
}

// ── Docking ───────────────────────────────────────────────────────────────────

/// How per-candidate affinities are computed once the target is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockingMethod {
    /// Closed-form estimate from GC content
    Composition,
    /// AutoDock Vina against the prepared receptor
    Vina,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockingConfig {
    #[serde(default = "default_docking_method")]
    pub method: DockingMethod,

    #[serde(default = "default_receptor_prep")]
    pub receptor_prep_bin: String,

    #[serde(default = "default_ligand_prep")]
    pub ligand_prep_bin: String,

    #[serde(default = "default_vina")]
    pub vina_bin: String,

    #[serde(default)]
    pub center: [f64; 3],

    #[serde(default = "default_box_size")]
    pub size: [f64; 3],

    #[serde(default = "default_exhaustiveness")]
    pub exhaustiveness: u32,

    /// Substitute affinity when the target or the docking engine is unusable
    #[serde(default = "default_placeholder_affinity")]
    pub placeholder_affinity: f64,

    #[serde(default = "default_docking_timeout")]
    pub timeout_secs: u64,
}

fn default_docking_method() -> DockingMethod { DockingMethod::Composition }
fn default_receptor_prep() -> String { "prepare_receptor".to_string() }
fn default_ligand_prep() -> String { "prepare_ligand".to_string() }
fn default_vina() -> String { "vina".to_string() }
fn default_box_size() -> [f64; 3] { [20.0, 20.0, 20.0] }
fn default_exhaustiveness() -> u32 { 8 }
fn default_placeholder_affinity() -> f64 { -7.0 }
fn default_docking_timeout() -> u64 { 600 }

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            method: default_docking_method(),
            receptor_prep_bin: default_receptor_prep(),
            ligand_prep_bin: default_ligand_prep(),
            vina_bin: default_vina(),
            center: [0.0; 3],
            size: default_box_size(),
            exhaustiveness: default_exhaustiveness(),
            placeholder_affinity: default_placeholder_affinity(),
            timeout_secs: default_docking_timeout(),
        }
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,

    /// Unbounded when `None`
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,

    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,

    #[serde(default = "default_scoring_seed")]
    pub seed: u64,
}

fn default_n_trees() -> usize { 100 }
fn default_min_samples_split() -> usize { 2 }
fn default_min_samples_leaf() -> usize { 1 }
fn default_scoring_seed() -> u64 { 42 }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            n_trees: default_n_trees(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            seed: default_scoring_seed(),
        }
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Root for work directories and model files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Concurrent candidate tasks per stage
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_temp_dir() -> PathBuf { PathBuf::from("temp") }
fn default_workers() -> usize { 4 }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            workers: default_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config.generation.min_length, 15);
        assert_eq!(config.generation.max_length, 40);
        assert_eq!(config.refinement.iterations, 10_000);
        assert_eq!(config.docking.method, DockingMethod::Composition);
        assert_eq!(config.docking.placeholder_affinity, -7.0);
        assert_eq!(config.scoring.seed, 42);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [docking]
            method = "vina"
            exhaustiveness = 16

            [execution]
            workers = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.docking.method, DockingMethod::Vina);
        assert_eq!(config.docking.exhaustiveness, 16);
        assert_eq!(config.docking.vina_bin, "vina");
        assert_eq!(config.execution.workers, 2);
        assert_eq!(config.execution.temp_dir, PathBuf::from("temp"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [generation]
            min_length = 50
            max_length = 40
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, AptamyxError::Config(_)));
    }

    #[test]
    fn test_positive_placeholder_rejected() {
        let mut config = PipelineConfig::default();
        config.docking.placeholder_affinity = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_tool_against_simrna_dir() {
        let config = RefinementConfig {
            simrna_dir: PathBuf::from("/opt/simrna"),
            ..Default::default()
        };
        assert_eq!(config.resolve("SimRNA"), PathBuf::from("/opt/simrna/SimRNA"));
        assert_eq!(config.resolve("/usr/bin/SimRNA"), PathBuf::from("/usr/bin/SimRNA"));
    }
}
