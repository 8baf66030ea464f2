use thiserror::Error;

/// The error-kind taxonomy from `SPEC_FULL.md` §7, as returned by
/// `Dispatcher::dispatch`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An active `StreamTicket` already exists for this (owner, conversation_id).
    #[error("conflict: ticket already active for this conversation")]
    Conflict,

    /// Bus publish failed on the request subject.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// Chat request failed admission validation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unhandled internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable token for an `{"error": ...}` frame, as used
    /// by both transport edges (`SPEC_FULL.md` §8's seed scenarios).
    pub fn token(&self) -> &'static str {
        match self {
            Error::Conflict => "conflict",
            Error::Unavailable(_) => "unavailable",
            Error::BadRequest(_) => "bad_request",
            Error::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
