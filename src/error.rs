use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Store IO error: {0}")]
    StoreIo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
