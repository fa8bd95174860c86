use std::fmt;

use thiserror::Error;

/// Application-wide error types for Hauler.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Egress identity check failed or reported the denied country.
    #[error("Preflight failed: {0}")]
    PreflightError(String),

    /// HTTP request could not be built or sent.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response status code outside the success range.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Response body cannot be interpreted as the requested kind.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Transform script failed to compile or evaluate.
    #[error("Transform error: {0}")]
    TransformError(String),

    /// Transform script produced no output where one was required.
    #[error("Transform produced no output")]
    EmptyTransform,

    /// Canonical record does not match the configured JSON Schema.
    #[error("Schema validation error: {0}")]
    SchemaValidationError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A pipeline queue was closed while a peer still needed it.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Coarse grouping of [`AppError`] variants, used by [`ErrorPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Config,
    Transport,
    Parse,
    Transform,
    Store,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Transform => "transform",
            ErrorCategory::Store => "store",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "config" => Ok(ErrorCategory::Config),
            "transport" => Ok(ErrorCategory::Transport),
            "parse" => Ok(ErrorCategory::Parse),
            "transform" => Ok(ErrorCategory::Transform),
            "store" => Ok(ErrorCategory::Store),
            "internal" => Ok(ErrorCategory::Internal),
            _ => Err(format!("Unknown error category: {s}")),
        }
    }
}

impl AppError {
    /// Which part of the pipeline this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::ConfigError(_) | AppError::PreflightError(_) => ErrorCategory::Config,
            AppError::HttpError(_)
            | AppError::HttpStatus { .. }
            | AppError::NetworkError(_)
            | AppError::Timeout(_) => ErrorCategory::Transport,
            AppError::ParseError(_) | AppError::SerializationError(_) => ErrorCategory::Parse,
            AppError::TransformError(_) | AppError::EmptyTransform => ErrorCategory::Transform,
            AppError::SchemaValidationError(_) | AppError::DatabaseError(_) => {
                ErrorCategory::Store
            }
            AppError::ChannelClosed(_) | AppError::Generic(_) => ErrorCategory::Internal,
        }
    }
}

/// Outcome of classifying an error against an [`ErrorPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the whole run.
    Fatal,
    /// Log, drop the affected item, keep going.
    Reportable,
}

/// Decides which errors abort a run.
///
/// The default policy is strict: every error is fatal. Categories can be
/// demoted to [`Severity::Reportable`] one at a time; `Config` and
/// `Internal` errors stay fatal regardless.
#[derive(Debug, Clone, Default)]
pub struct ErrorPolicy {
    reportable: Vec<ErrorCategory>,
}

impl ErrorPolicy {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn with_reportable(mut self, category: ErrorCategory) -> Self {
        if !self.reportable.contains(&category) {
            self.reportable.push(category);
        }
        self
    }

    pub fn classify(&self, error: &AppError) -> Severity {
        match error.category() {
            ErrorCategory::Config | ErrorCategory::Internal => Severity::Fatal,
            category if self.reportable.contains(&category) => Severity::Reportable,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self, error: &AppError) -> bool {
        self.classify(error) == Severity::Fatal
    }
}
