use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced to callers of control actions. None of these are
/// retried; the caller decides what to tell the operator.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to start control program {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("control program timed out after {0:?}")]
    Timeout(Duration),
    #[error("control program i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Failures of a single named lookup, such as the log of one session.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("failed to read {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credentials file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed credentials entry on line {0}")]
    MalformedLine(usize),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

impl From<argon2::password_hash::Error> for CredentialError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::Hash(err.to_string())
    }
}
