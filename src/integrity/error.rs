use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Integrity tag mismatch: expected {expected}, got {actual}")]
    TagMismatch { expected: String, actual: String },

    #[error("Malformed integrity tag: {0}")]
    MalformedTag(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
