use thiserror::Error;

use crate::renderer::RenderError;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Cache entry is corrupt: {0}")]
    CorruptCache(String),

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("A scrape run is already in progress")]
    Busy,
}

impl From<tokio_cron_scheduler::JobSchedulerError> for ScraperError {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        ScraperError::Scheduler(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
