use std::fmt;

use reqwest::StatusCode;

/// Which part of a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Auth,
    Fetch,
    Map,
    Write,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Auth => "auth",
            Stage::Fetch => "fetch",
            Stage::Map => "map",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("login returned HTTP {0}")]
    Status(StatusCode),
    #[error("credentials rejected: {message}")]
    Rejected { message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("status request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("status request returned HTTP {0}")]
    Status(StatusCode),
    #[error("session rejected by the portal: {0}")]
    SessionRejected(String),
    #[error("malformed status response: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("required field `{field}` is missing")]
    MissingField { field: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("write request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("store rejected the batch with HTTP {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Any failure that ends one cycle early.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

impl CycleError {
    pub fn stage(&self) -> Stage {
        match self {
            CycleError::Auth(_) => Stage::Auth,
            CycleError::Fetch(_) => Stage::Fetch,
            CycleError::Mapping(_) => Stage::Map,
            CycleError::Write(_) => Stage::Write,
        }
    }
}
