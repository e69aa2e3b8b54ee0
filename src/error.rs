use derive_more::derive::Display;
use reqwest::StatusCode;

use crate::prompt::ClassifyError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Display)]
pub enum AppError {
    /// A precondition failed before any processing started (missing input
    /// file, missing API key, unreadable catalog).
    #[display("setup error: {_0}")]
    Setup(String),
    #[display("bad request: {_0}")]
    BadRequest(String),
    RequestTimeout,
    TooManyRequests,
    /// The run was cancelled by an operator signal. Progress past the last
    /// successful checkpoint is discarded.
    Interrupted,
    #[display("checkpoint error: {_0}")]
    Checkpoint(String),
    Classify(ClassifyError),
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return AppError::RequestTimeout;
        }
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl From<ClassifyError> for AppError {
    fn from(error: ClassifyError) -> Self {
        AppError::Classify(error)
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::Internal(error.into())
    }
}

impl From<csv::Error> for AppError {
    fn from(error: csv::Error) -> Self {
        AppError::Internal(error.into())
    }
}
