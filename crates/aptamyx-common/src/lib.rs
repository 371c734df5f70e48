//! Shared types, errors, and configuration used across the Aptamyx crates.

pub mod error;
pub mod outcome;
pub mod pipeline_config;

// Re-export commonly used types
pub use error::{AptamyxError, ErrorKind, Result, ToolFailure};
pub use outcome::StageOutcome;
pub use pipeline_config::{
    DockingConfig, DockingMethod, ExecutionConfig, FoldingConfig, GenerationConfig,
    PipelineConfig, RefinementConfig, ScoringConfig,
};
