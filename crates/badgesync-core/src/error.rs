use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("step '{step}' failed: {detail}")]
    Step { step: &'static str, detail: String },

    #[error("interval must be between 5 and 120 minutes, got {0}")]
    InvalidInterval(u64),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
