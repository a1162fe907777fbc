use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Invalid path")]
    InvalidPath,

    #[error("Invalid thumbnail size: {requested} (allowed: {allowed:?})")]
    InvalidSize { requested: u32, allowed: Vec<u32> },

    #[error("Not found")]
    NotFound,

    #[error("Task error: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}
