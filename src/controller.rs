//! Process-wide entry point: one scan slot, start/stop routing and the tier flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::error::StartError;
use crate::probe::ScanProbe;
use crate::session::{ScanSession, SessionConfig};
use crate::sink::EventSink;
use crate::types::{ScanRequest, Tier};

/// Identifier handed back for an accepted scan.
pub type ScanId = u64;

#[derive(Debug, Clone)]
struct ActiveScan {
    id: ScanId,
    request: ScanRequest,
    cancel: CancellationToken,
    started_at: String,
}

/// Public view of the running scan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveScanInfo {
    pub id: ScanId,
    pub target: String,
    pub ports: String,
    pub tier: Tier,
    pub started_at: String,
    pub stopping: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: String, // "idle" | "running"
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ActiveScanInfo>,
}

/// Cheap to clone; every clone shares the same slot.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

struct Inner {
    probe: Arc<dyn ScanProbe>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    pro: AtomicBool,
    next_id: AtomicU64,
    slot: watch::Sender<Option<ActiveScan>>,
}

/// Frees the slot when the worker task ends, however it ends.
struct SlotGuard {
    id: ScanId,
    slot: watch::Sender<Option<ActiveScan>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.slot.send_if_modified(|slot| match slot {
            Some(active) if active.id == id => {
                *slot = None;
                true
            }
            _ => false,
        });
    }
}

impl ScanController {
    pub fn new(
        probe: Arc<dyn ScanProbe>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
        tier: Tier,
    ) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                probe,
                sink,
                config,
                pro: AtomicBool::new(tier.is_pro()),
                next_id: AtomicU64::new(1),
                slot,
            }),
        }
    }

    /// Start a scan in the background unless one is already running.
    ///
    /// Must be called from within a Tokio runtime. The tier in effect right now is
    /// captured for the whole session.
    pub fn start(&self, target: &str, ports: &str) -> Result<ScanId, StartError> {
        let target = target.trim();
        let ports = ports.trim();
        if target.is_empty() {
            return Err(StartError::EmptyTarget);
        }
        if ports.is_empty() {
            return Err(StartError::EmptyPorts);
        }

        let request = ScanRequest {
            target: target.to_string(),
            ports: ports.to_string(),
            tier: self.tier(),
        };
        let cancel = CancellationToken::new();

        // Ids are only handed out to accepted scans, under the slot lock.
        let mut accepted = None;
        self.inner.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            *slot = Some(ActiveScan {
                id,
                request: request.clone(),
                cancel: cancel.clone(),
                started_at: now_rfc3339(),
            });
            accepted = Some(id);
            true
        });
        let Some(id) = accepted else {
            info!(scan_target = %target, "scan rejected, another scan is running");
            return Err(StartError::AlreadyRunning);
        };

        let guard = SlotGuard {
            id,
            slot: self.inner.slot.clone(),
        };
        let span = info_span!("scan", id, scan_target = %request.target, tier = %request.tier);
        let session = ScanSession::new(
            request,
            self.inner.probe.clone(),
            self.inner.sink.clone(),
            cancel,
            self.inner.config.clone(),
        );
        tokio::spawn(
            async move {
                let _guard = guard;
                session.run().await;
            }
            .instrument(span),
        );

        info!(id, scan_target = %target, ports = %ports, "scan accepted");
        Ok(id)
    }

    /// Ask the running scan to stop at its next host boundary. Returns whether a scan was
    /// running.
    pub fn stop(&self) -> bool {
        let slot = self.inner.slot.borrow();
        match slot.as_ref() {
            Some(active) => {
                info!(id = active.id, "stop requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Tier used by scans started from now on.
    pub fn set_tier(&self, is_pro: bool) {
        self.inner.pro.store(is_pro, Ordering::SeqCst);
        info!(tier = %Tier::from_pro(is_pro), "tier updated");
    }

    pub fn tier(&self) -> Tier {
        Tier::from_pro(self.inner.pro.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot.borrow().is_some()
    }

    pub fn status(&self) -> ControllerStatus {
        let scan = self.inner.slot.borrow().as_ref().map(|a| ActiveScanInfo {
            id: a.id,
            target: a.request.target.clone(),
            ports: a.request.ports.clone(),
            tier: a.request.tier,
            started_at: a.started_at.clone(),
            stopping: a.cancel.is_cancelled(),
        });
        ControllerStatus {
            state: if scan.is_some() { "running" } else { "idle" }.into(),
            tier: self.tier(),
            scan,
        }
    }

    /// Resolves once no scan occupies the slot.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.slot.subscribe();
        let _ = rx.wait_for(|slot| slot.is_none()).await;
    }
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
