//! Listener-level errors. Per-frame decode errors stay `GpsError`.

use std::io;
use std::time::Duration;

use gps_core::GpsError;
use thiserror::Error;

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),
    #[error("{0} consecutive undecodable frames")]
    TooManyErrors(u32),
    #[error(transparent)]
    Protocol(GpsError),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Io(_) => "io",
            SessionError::IdleTimeout(_) => "idle_timeout",
            SessionError::TooManyErrors(_) => "too_many_errors",
            SessionError::Protocol(e) => e.kind(),
        }
    }
}

impl From<GpsError> for SessionError {
    fn from(e: GpsError) -> Self {
        match e {
            GpsError::Io(io) => SessionError::Io(io),
            other => SessionError::Protocol(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("no ports configured")]
    NoPorts,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to hand a record to a downstream collaborator.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}
