use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Invalid transform options: {0}")]
    InvalidOptions(String),

    #[error("Transform cancelled")]
    Cancelled,

    #[error("Transform task failed: {0}")]
    Task(String),
}

pub type TransformResult<T> = Result<T, TransformError>;
