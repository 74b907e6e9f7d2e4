//! Error types shared by the controller, the session worker and probes.

use std::time::Duration;

use thiserror::Error;

/// Why `ScanController::start` did not accept a scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("target must not be empty")]
    EmptyTarget,

    #[error("port specification must not be empty")]
    EmptyPorts,

    #[error("a scan is already running")]
    AlreadyRunning,
}

/// Failure reported by a `ScanProbe`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid ports: {0}")]
    InvalidPorts(String),

    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that ends a session with `scan_error`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("scan worker panicked: {0}")]
    Panicked(String),
}
