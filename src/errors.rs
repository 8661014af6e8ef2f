use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Could not extract video identifier: {0}")]
    ExtractionFailed(String),

    #[error("Download method failed: {0}")]
    Strategy(String),

    #[error("All download methods failed: {}", .attempts.join("; "))]
    AllStrategiesFailed { attempts: Vec<String> },

    #[error("Metadata resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    /// Stable discriminant used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Json(_) => "json",
            AppError::Http(_) => "http",
            AppError::InvalidSource(_) => "invalid_source",
            AppError::ExtractionFailed(_) => "extraction_failed",
            AppError::Strategy(_) => "strategy_failed",
            AppError::AllStrategiesFailed { .. } => "all_strategies_failed",
            AppError::ResolutionFailed(_) => "resolution_failed",
            AppError::PersistenceFailed(_) => "persistence_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Cancelled(_) => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
