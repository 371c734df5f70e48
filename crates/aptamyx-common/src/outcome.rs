//! Stage results that distinguish real values from fallback substitutes.

use crate::error::AptamyxError;

/// Result of a pipeline stage that always produces a value.
///
/// `Degraded` carries the substitute value alongside the error that forced
/// the substitution, so callers never have to inspect sentinel values to
/// learn whether a result is real.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded { value: T, error: AptamyxError },
}

impl<T> StageOutcome<T> {
    pub fn degraded(value: T, error: impl Into<AptamyxError>) -> Self {
        StageOutcome::Degraded {
            value,
            error: error.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Ok(value) | StageOutcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Ok(value) | StageOutcome::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StageOutcome::Degraded { .. })
    }

    pub fn error(&self) -> Option<&AptamyxError> {
        match self {
            StageOutcome::Ok(_) => None,
            StageOutcome::Degraded { error, .. } => Some(error),
        }
    }

    pub fn into_parts(self) -> (T, Option<AptamyxError>) {
        match self {
            StageOutcome::Ok(value) => (value, None),
            StageOutcome::Degraded { value, error } => (value, Some(error)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            StageOutcome::Ok(value) => StageOutcome::Ok(f(value)),
            StageOutcome::Degraded { value, error } => StageOutcome::Degraded {
                value: f(value),
                error,
            },
        }
    }
}
