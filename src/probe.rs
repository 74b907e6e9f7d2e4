//! Boundary to whatever actually touches the network.
//!
//! A probe performs one complete pass over a target and returns hosts -> protocols -> ports
//! with whatever service metadata its mode allows. The session worker treats it as a single
//! opaque call.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;
use crate::types::{HostState, PortState, Tier};

/// How deep the probe should look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Plain connect scan, service names from the well-known port table only.
    Connect,
    /// Connect scan plus service/version interrogation of open ports.
    ServiceVersion,
}

impl ProbeMode {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => ProbeMode::Connect,
            Tier::Pro => ProbeMode::ServiceVersion,
        }
    }
}

/// Output of one named check run against a port (e.g. `ssl-cert`, `banner`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub id: String,
    pub output: String,
}

impl ScriptOutput {
    pub fn new(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedPort {
    pub port: u16,
    pub state: PortState,
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub scripts: Vec<ScriptOutput>,
}

impl ProbedPort {
    pub fn new(port: u16, state: PortState, service: impl Into<String>) -> Self {
        Self {
            port,
            state,
            service: service.into(),
            product: None,
            version: None,
            scripts: Vec::new(),
        }
    }

    pub fn with_version(mut self, product: Option<&str>, version: &str) -> Self {
        self.product = product.map(str::to_string);
        self.version = Some(version.to_string());
        self
    }

    pub fn with_script(mut self, id: &str, output: &str) -> Self {
        self.scripts.push(ScriptOutput::new(id, output));
        self
    }

    /// Product and version joined for display, e.g. `OpenSSH 8.9p1`.
    pub fn version_info(&self) -> Option<String> {
        match (self.product.as_deref(), self.version.as_deref()) {
            (Some(p), Some(v)) => Some(format!("{p} {v}")),
            (None, Some(v)) => Some(v.to_string()),
            (Some(p), None) => Some(p.to_string()),
            (None, None) => None,
        }
    }

    /// True if version interrogation produced anything for this port.
    pub fn has_fingerprint(&self) -> bool {
        self.version.is_some() || !self.scripts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedProtocol {
    pub name: String,
    pub ports: Vec<ProbedPort>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedHost {
    pub host: String,
    pub state: HostState,
    pub protocols: Vec<ProbedProtocol>,
}

impl ProbedHost {
    /// Host with a single `tcp` protocol block.
    pub fn tcp(host: impl Into<String>, state: HostState, ports: Vec<ProbedPort>) -> Self {
        Self {
            host: host.into(),
            state,
            protocols: vec![ProbedProtocol {
                name: "tcp".into(),
                ports,
            }],
        }
    }

    /// Every reported port across protocols, in report order.
    pub fn ports(&self) -> impl Iterator<Item = &ProbedPort> {
        self.protocols.iter().flat_map(|p| p.ports.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub hosts: Vec<ProbedHost>,
}

/// One full probing pass. Implementations may return early with partial results once
/// `cancel` fires.
#[async_trait]
pub trait ScanProbe: Send + Sync {
    async fn probe(
        &self,
        target: &str,
        ports: &str,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_follows_tier() {
        assert_eq!(ProbeMode::for_tier(Tier::Free), ProbeMode::Connect);
        assert_eq!(ProbeMode::for_tier(Tier::Pro), ProbeMode::ServiceVersion);
    }

    #[test]
    fn version_info_joins_product() {
        let p = ProbedPort::new(22, PortState::Open, "ssh").with_version(Some("OpenSSH"), "8.9p1");
        assert_eq!(p.version_info().as_deref(), Some("OpenSSH 8.9p1"));
        assert!(p.has_fingerprint());
        assert!(!ProbedPort::new(80, PortState::Open, "http").has_fingerprint());
    }
}
