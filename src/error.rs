use elasticsearch::Error as ElasticsearchError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] ElasticsearchError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Tokio join error: {0}")]
    Join(#[from] JoinError),

    #[error("Channel send error")]
    SendError,

    #[error("Channel receive error")]
    RecvError,

    #[error("Search backend responded with status {status}: {context}")]
    Backend { status: u16, context: String },

    #[error("Multi-search returned {actual} responses for {expected} queries")]
    ResponseCountMismatch { expected: usize, actual: usize },

    #[error("Storage grid error: {0}")]
    Grid(String),

    #[error("User '{user}' does not have upload permission on collection '{collection}'")]
    PermissionDenied { user: String, collection: String },

    #[error("Archive {index} of {total} failed to transfer: {message}")]
    ArchiveTransfer {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("Upload cancelled after {completed} of {total} archives")]
    Cancelled { completed: usize, total: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl<T> From<crossbeam_channel::SendError<T>> for AppError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        AppError::SendError
    }
}

impl From<crossbeam_channel::RecvError> for AppError {
    fn from(_: crossbeam_channel::RecvError) -> Self {
        AppError::RecvError
    }
}
