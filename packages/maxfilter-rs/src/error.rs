use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaxfilterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for '{field}': {value} ({reason})")]
    ParameterRange {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Conflicting parameters '{first}' and '{second}': {reason}")]
    ParameterConflict {
        first: String,
        second: String,
        reason: String,
    },

    #[error("Missing {role} input: '{path}' does not resolve to a readable file")]
    MissingInput { role: String, path: String },

    #[error(
        "Ill-conditioned SSS matrix in segment {segment}: condition number {condition:.1} >= {threshold:.0}"
    )]
    IllConditionedMatrix {
        segment: usize,
        condition: f64,
        threshold: f64,
    },

    #[error("Recording has already been processed with Maxwell filtering: {0}")]
    AlreadyProcessed(String),

    #[error("Filtering engine failed: {0}")]
    Engine(String),

    #[error("Filtering engine not found: {0}")]
    EngineNotFound(String),

    #[error("Failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Report generation failed: {0}")]
    Report(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MaxfilterError {
    pub(crate) fn range(
        field: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::ParameterRange {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(
        first: impl Into<String>,
        second: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ParameterConflict {
            first: first.into(),
            second: second.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Name of the offending parameter, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ParameterRange { field, .. } => Some(field),
            Self::ParameterConflict { first, .. } => Some(first),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaxfilterError>;
