use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Feature tier controlling probe depth and advisory detail.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl Tier {
    pub fn from_pro(is_pro: bool) -> Self {
        if is_pro {
            Tier::Pro
        } else {
            Tier::Free
        }
    }

    pub fn is_pro(self) -> bool {
        self == Tier::Pro
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

/// What one session was asked to scan. The tier is captured when the session starts
/// and never re-read from the controller afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub target: String,
    pub ports: String,
    pub tier: Tier,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    Down,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryLevel {
    Basic,
    Advanced,
}

/// Vulnerability notes and remediation hints derived for one open port.
///
/// Basic advisories carry a canned `description`; advanced ones carry the probe's
/// check results in `details`, in the order the checks ran, and, when known, the
/// detected product/version as `description`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilityAdvisory {
    pub level: AdvisoryLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<CheckResult>,
    pub recommendations: Vec<String>,
}

/// Output of one named check. A check may appear more than once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub check: String,
    pub output: String,
}

/// One classified port, emitted as soon as it is known.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub state: PortState,
    pub service: String,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<VulnerabilityAdvisory>,
}

/// A host with every port reported for it, in probe order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host: String,
    pub state: HostState,
    pub ports: Vec<PortResult>,
}

/// `port_data` payload: the port plus the host it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortEvent {
    pub host: String,
    #[serde(flatten)]
    pub port: PortResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Starting,
    Completed,
}

/// Everything a session can push to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Status(ScanStatus),
    Port(PortEvent),
    Host(HostResult),
    Error(String),
}

impl ScanEvent {
    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::Status(_) => "scan_status",
            ScanEvent::Port(_) => "port_data",
            ScanEvent::Host(_) => "host_data",
            ScanEvent::Error(_) => "scan_error",
        }
    }

    /// JSON payload carried under the event name.
    pub fn payload(&self) -> Value {
        match self {
            ScanEvent::Status(status) => json!({ "status": status }),
            ScanEvent::Port(port) => serde_json::to_value(port).unwrap_or(Value::Null),
            ScanEvent::Host(host) => serde_json::to_value(host).unwrap_or(Value::Null),
            ScanEvent::Error(error) => json!({ "error": error }),
        }
    }

    /// `completed` status or `scan_error`: nothing follows these within a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Status(ScanStatus::Completed) | ScanEvent::Error(_)
        )
    }
}
