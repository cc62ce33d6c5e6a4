use crate::credits::Credits;

/// Errors surfaced by every engine operation. Callers get the kind and a
/// display message, never storage internals.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("insufficient credits: need {needed}, available {available}")]
    InsufficientCredits { needed: Credits, available: Credits },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("already acted: {0}")]
    AlreadyActed(String),
    #[error("invalid resolution: {0:?}")]
    InvalidResolution(String),
    #[error("storage failure: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<sled::Error> for EngineError {
    fn from(e: sled::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for EngineError {
    fn from(e: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(e: minicbor::decode::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
