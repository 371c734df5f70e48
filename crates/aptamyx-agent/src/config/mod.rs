//! Configuration loading for Aptamyx.
//! Reads aptamyx.toml from the current directory or the path in APTAMYX_CONFIG.
//! A missing default file means built-in defaults; a missing explicit file is an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use aptamyx_common::PipelineConfig;

pub const CONFIG_ENV: &str = "APTAMYX_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "aptamyx.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    /// JSON run report, written only when set
    #[serde(default)]
    pub report_path: Option<PathBuf>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_csv_path() -> PathBuf { PathBuf::from("aptamer_candidates.csv") }
fn default_top_n() -> usize { 5 }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            report_path: None,
            top_n: default_top_n(),
        }
    }
}

impl Config {
    /// Load configuration.
    /// Uses `explicit` if given, then APTAMYX_CONFIG, then aptamyx.toml.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        if !path.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            tracing::info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests;
