use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why an external tool invocation did not yield a usable result.
///
/// Every variant is recoverable: callers react by moving to the next rung
/// of their fallback ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolFailure {
    NotFound {
        executable: String,
    },
    Failed {
        executable: String,
        status: Option<i32>,
        stderr: String,
    },
    TimedOut {
        executable: String,
        seconds: u64,
    },
    MissingArtifact {
        phase: String,
        searched: Vec<String>,
    },
    MissingTarget {
        path: PathBuf,
    },
    Unparseable {
        executable: String,
        detail: String,
    },
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { executable } => {
                write!(f, "executable '{executable}' could not be started")
            }
            Self::Failed {
                executable,
                status,
                stderr,
            } => write!(
                f,
                "'{}' exited with status {:?}: {}",
                executable,
                status,
                stderr.trim()
            ),
            Self::TimedOut {
                executable,
                seconds,
            } => write!(f, "'{executable}' timed out after {seconds}s"),
            Self::MissingArtifact { phase, searched } => write!(
                f,
                "{} artifact not found (searched: {})",
                phase,
                searched.join(", ")
            ),
            Self::MissingTarget { path } => {
                write!(f, "target structure {} does not exist", path.display())
            }
            Self::Unparseable { executable, detail } => {
                write!(f, "could not parse output of '{executable}': {detail}")
            }
        }
    }
}

/// Coarse error taxonomy used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed direct input. Never recovered.
    Input,
    /// External process or artifact problem. Recovered through fallbacks.
    ToolFailure,
    /// Schema or value problem entering the scorer or a table merge.
    Data,
    Internal,
}

#[derive(Debug, Error)]
pub enum AptamyxError {
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Tool failure: {0}")]
    Tool(ToolFailure),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Model fit failed: {0}")]
    ModelFit(String),

    #[error("Candidate generation produced no sequences")]
    GenerationEmpty,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ToolFailure> for AptamyxError {
    fn from(failure: ToolFailure) -> Self {
        AptamyxError::Tool(failure)
    }
}

impl AptamyxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) | Self::GenerationEmpty => ErrorKind::Input,
            Self::Tool(_) => ErrorKind::ToolFailure,
            Self::Data(_) | Self::ModelFit(_) | Self::Csv(_) => ErrorKind::Data,
            Self::Config(_) | Self::Io(_) | Self::Toml(_) | Self::Json(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True when a fallback is allowed to absorb this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Input)
    }
}

pub type Result<T> = std::result::Result<T, AptamyxError>;
