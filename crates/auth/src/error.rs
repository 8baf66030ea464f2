use std::fmt;

/// Every variant maps to the single `Unauthenticated` error kind at the
/// component boundary (`SPEC_FULL.md` §7); kept distinct internally so
/// failures can be logged precisely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Missing,
    Malformed(String),
    Expired,
    BadAlgorithm,
    WrongType(String),
    Revoked,
    CacheUnavailable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing token"),
            Self::Malformed(reason) => write!(f, "malformed token: {reason}"),
            Self::Expired => write!(f, "token expired"),
            Self::BadAlgorithm => write!(f, "unexpected signing algorithm"),
            Self::WrongType(typ) => write!(f, "unexpected token type: {typ}"),
            Self::Revoked => write!(f, "token revoked"),
            Self::CacheUnavailable(reason) => {
                write!(f, "revocation check unavailable: {reason}")
            },
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
