//! Library crate for live-scan-rs: a single-flight scan controller that streams
//! classified ports and hosts to subscribers while the scan runs.
pub mod advisor;
pub mod controller;
pub mod error;
pub mod fingerprint;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod session;
pub mod sink;
pub mod targets;
pub mod types;
