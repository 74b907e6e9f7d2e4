//! The worker that drives one scan from `starting` to its terminal event.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advisor;
use crate::error::SessionError;
use crate::probe::{ProbeMode, ProbedHost, ProbedPort, ScanProbe};
use crate::sink::EventSink;
use crate::types::{
    HostResult, PortEvent, PortResult, PortState, ScanEvent, ScanRequest, ScanStatus, Tier,
};

/// Knobs applied to every session a controller starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for the whole probe call. `None` waits forever.
    pub probe_timeout: Option<Duration>,
    /// Pause after each `port_data` event.
    pub emit_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_timeout: None,
            emit_delay: Duration::from_millis(100),
        }
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
}

pub struct ScanSession {
    request: ScanRequest,
    probe: Arc<dyn ScanProbe>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    config: SessionConfig,
}

#[derive(Default)]
struct Tally {
    hosts: usize,
    ports: usize,
}

impl ScanSession {
    pub fn new(
        request: ScanRequest,
        probe: Arc<dyn ScanProbe>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
        config: SessionConfig,
    ) -> Self {
        Self {
            request,
            probe,
            sink,
            cancel,
            config,
        }
    }

    /// Run to the end. Always emits `starting` first and exactly one terminal event last;
    /// errors are reported on the sink and never returned. A panic in the probe or the
    /// worker is reported as `scan_error` too.
    pub async fn run(self) {
        self.sink.emit(ScanEvent::Status(ScanStatus::Starting)).await;
        let result = AssertUnwindSafe(self.execute())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(SessionError::Panicked(panic_message(payload))));
        match result {
            Ok(outcome) => {
                debug!(?outcome, "session finished");
                self.sink.emit(ScanEvent::Status(ScanStatus::Completed)).await;
            }
            Err(e) => {
                warn!(error = %e, "scan failed");
                self.sink.emit(ScanEvent::Error(e.to_string())).await;
            }
        }
    }

    async fn execute(&self) -> Result<SessionOutcome, SessionError> {
        let mode = ProbeMode::for_tier(self.request.tier);
        info!(scan_target = %self.request.target, ports = %self.request.ports, ?mode, "probing");

        let probe = self
            .probe
            .probe(&self.request.target, &self.request.ports, mode, &self.cancel);
        let report = match self.config.probe_timeout {
            Some(limit) => time::timeout(limit, probe)
                .await
                .map_err(|_| SessionError::Timeout(limit))??,
            None => probe.await?,
        };

        let mut tally = Tally::default();
        for host in &report.hosts {
            if self.cancel.is_cancelled() {
                info!(hosts = tally.hosts, ports = tally.ports, "scan cancelled");
                return Ok(SessionOutcome::Cancelled);
            }
            tally.ports += self.emit_host(host).await;
            tally.hosts += 1;
        }

        info!(hosts = tally.hosts, ports = tally.ports, "scan completed");
        Ok(SessionOutcome::Completed)
    }

    /// Emit every port of `host` one by one, then the assembled host. Returns the port count.
    async fn emit_host(&self, probed: &ProbedHost) -> usize {
        let mut host = HostResult {
            host: probed.host.clone(),
            state: probed.state,
            ports: Vec::new(),
        };

        for port in probed.ports() {
            let result = classify(port, self.request.tier);
            host.ports.push(result.clone());
            self.sink
                .emit(ScanEvent::Port(PortEvent {
                    host: host.host.clone(),
                    port: result,
                }))
                .await;
            if !self.config.emit_delay.is_zero() {
                time::sleep(self.config.emit_delay).await;
            }
        }

        let count = host.ports.len();
        self.sink.emit(ScanEvent::Host(host)).await;
        count
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Build the public result for one probed port, attaching the advisory its tier allows.
pub fn classify(port: &ProbedPort, tier: Tier) -> PortResult {
    let advisory = match (port.state, tier) {
        (PortState::Open, Tier::Free) => advisor::basic_advisory(port.port),
        (PortState::Open, Tier::Pro) if port.has_fingerprint() => {
            Some(advisor::advanced_advisory(port))
        }
        _ => None,
    };
    PortResult {
        port: port.port,
        state: port.state,
        service: port.service.clone(),
        tier,
        version: port.version_info(),
        advisory,
    }
}
