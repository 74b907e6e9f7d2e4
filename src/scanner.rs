use crate::error::ProbeError;
use crate::fingerprint;
use crate::ports;
use crate::probe::{ProbeMode, ProbeReport, ProbedHost, ProbedPort, ScanProbe};
use crate::targets;
use crate::types::{HostState, PortState};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ConnectProbeConfig {
    /// Max concurrent TCP connect attempts.
    pub concurrency: usize,
    /// Per-socket connect timeout.
    pub connect_timeout: Duration,
    /// Per-step timeout for banner reads, HTTP requests and TLS handshakes.
    pub interrogation_timeout: Duration,
    /// Also report closed and filtered ports.
    pub report_closed: bool,
}

impl Default for ConnectProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 1000,
            connect_timeout: Duration::from_millis(400),
            interrogation_timeout: Duration::from_millis(1500),
            report_closed: false,
        }
    }
}

/// Built-in probe: asynchronous TCP connects with a concurrency limit.
///
/// - Hosts are scanned one after another in target order; the ports of one host run
///   concurrently, bounded by a `Semaphore`.
/// - `tokio::time::timeout` bounds connect time per socket.
/// - In `ServiceVersion` mode open ports are handed to [`fingerprint::interrogate`].
/// - Ports are reported in port-spec order regardless of completion order.
#[derive(Debug, Clone, Default)]
pub struct ConnectProbe {
    config: ConnectProbeConfig,
}

impl ConnectProbe {
    pub fn new(config: ConnectProbeConfig) -> Self {
        Self { config }
    }

    async fn probe_host(
        &self,
        ip: IpAddr,
        port_list: &[u16],
        mode: ProbeMode,
        sem: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<ProbedHost, ProbeError> {
        let mut set = JoinSet::new();
        for (idx, &port) in port_list.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ProbeError::Failed("connect pool closed".into()))?;
            let connect_timeout = self.config.connect_timeout;
            let interrogation_timeout = self.config.interrogation_timeout;

            set.spawn(async move {
                let _permit = permit; // keep permit until task completes
                let addr = SocketAddr::new(ip, port);
                let service = ports::service_name(port);
                let probed = match time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(stream)) => {
                        let open = ProbedPort::new(port, PortState::Open, service);
                        match mode {
                            ProbeMode::Connect => open,
                            ProbeMode::ServiceVersion => {
                                fingerprint::interrogate(open, ip, stream, interrogation_timeout)
                                    .await
                            }
                        }
                    }
                    Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                        ProbedPort::new(port, PortState::Closed, service)
                    }
                    // Timed out, unreachable or otherwise silent.
                    _ => ProbedPort::new(port, PortState::Filtered, service),
                };
                (idx, probed)
            });
        }

        let mut slots: Vec<Option<ProbedPort>> = vec![None; port_list.len()];
        while let Some(res) = set.join_next().await {
            match res {
                Ok((idx, probed)) => slots[idx] = Some(probed),
                Err(e) => warn!(%ip, error = %e, "port task failed"),
            }
        }

        let responded = slots
            .iter()
            .flatten()
            .any(|p| matches!(p.state, PortState::Open | PortState::Closed));
        let reported: Vec<ProbedPort> = slots
            .into_iter()
            .flatten()
            .filter(|p| self.config.report_closed || p.state == PortState::Open)
            .collect();
        let state = if responded {
            HostState::Up
        } else {
            HostState::Unknown
        };
        debug!(%ip, ?state, reported = reported.len(), "host probed");
        Ok(ProbedHost::tcp(ip.to_string(), state, reported))
    }
}

#[async_trait]
impl ScanProbe for ConnectProbe {
    async fn probe(
        &self,
        target: &str,
        port_spec: &str,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, ProbeError> {
        let hosts = targets::resolve_targets(target)
            .await
            .map_err(|e| ProbeError::InvalidTarget(format!("{e:#}")))?;
        let port_list = ports::parse_port_spec(port_spec)
            .map_err(|e| ProbeError::InvalidPorts(format!("{e:#}")))?;

        let sem = Arc::new(Semaphore::new(self.config.concurrency.clamp(1, 5_000)));
        let mut report = ProbeReport::default();
        for ip in hosts {
            if cancel.is_cancelled() {
                debug!("probe cancelled");
                break;
            }
            report
                .hosts
                .push(self.probe_host(ip, &port_list, mode, &sem, cancel).await?);
        }
        Ok(report)
    }
}
