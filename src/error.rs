#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend did not answer within {0:?}")]
    BackendTimeout(std::time::Duration),

    #[error("Telegram error: {0}")]
    Telegram(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<zeromq::ZmqError> for AppError {
    fn from(e: zeromq::ZmqError) -> Self {
        AppError::Transport(e.to_string())
    }
}

/// Failure of a single chat delivery call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by the chat API")]
    RateLimited,

    #[error("message is not modified")]
    NotModified,

    #[error("{0}")]
    Other(String),
}

impl DeliveryError {
    /// Timeouts and rate limiting clear up by themselves; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Timeout | DeliveryError::RateLimited)
    }
}
