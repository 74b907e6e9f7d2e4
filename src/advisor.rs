//! Advisory text and remediation hints for open ports.
//!
//! Free sessions get a canned note for a handful of notorious ports. Pro sessions get
//! advice derived from what version interrogation actually found.

use crate::probe::ProbedPort;
use crate::types::{AdvisoryLevel, CheckResult, VulnerabilityAdvisory};

struct CommonRisk {
    port: u16,
    description: &'static str,
    recommendations: &'static [&'static str],
}

const GENERIC_ADVICE: &str = "Restrict access to trusted networks with a firewall";

const COMMON_RISKS: &[CommonRisk] = &[
    CommonRisk {
        port: 21,
        description: "FTP - Cleartext credentials, anonymous login and bounce attacks",
        recommendations: &["Disable anonymous login", "Replace FTP with SFTP or FTPS"],
    },
    CommonRisk {
        port: 22,
        description: "SSH - Brute force attempts and weak key exchange algorithms",
        recommendations: &["Disable password authentication", "Use key-based authentication"],
    },
    CommonRisk {
        port: 23,
        description: "Telnet - Unencrypted sessions expose credentials and commands",
        recommendations: &["Disable Telnet and use SSH instead"],
    },
    CommonRisk {
        port: 25,
        description: "SMTP - Open relay abuse and user enumeration",
        recommendations: &["Disable open relaying", "Require STARTTLS and authentication"],
    },
    CommonRisk {
        port: 80,
        description: "HTTP - Web vulnerabilities (XSS, SQL injection, outdated server software)",
        recommendations: &["Redirect all traffic to HTTPS", "Keep the web server patched"],
    },
    CommonRisk {
        port: 443,
        description: "HTTPS - Weak TLS configuration and expired or self-signed certificates",
        recommendations: &["Disable TLS 1.0/1.1 and weak ciphers", "Renew certificates before expiry"],
    },
    CommonRisk {
        port: 3306,
        description: "MySQL - Database exposed to the network, weak or default credentials",
        recommendations: &["Bind MySQL to localhost", "Enforce strong database passwords"],
    },
    CommonRisk {
        port: 3389,
        description: "RDP - Remote desktop brute force and BlueKeep-class exploits",
        recommendations: &["Require Network Level Authentication", "Expose RDP only through a VPN"],
    },
];

/// Canned advisory for well-known risky ports; `None` for anything not in the table.
pub fn basic_advisory(port: u16) -> Option<VulnerabilityAdvisory> {
    let risk = COMMON_RISKS.iter().find(|r| r.port == port)?;
    let mut recommendations: Vec<String> =
        risk.recommendations.iter().map(|r| r.to_string()).collect();
    recommendations.push(GENERIC_ADVICE.to_string());
    Some(VulnerabilityAdvisory {
        level: AdvisoryLevel::Basic,
        description: Some(risk.description.to_string()),
        details: Vec::new(),
        recommendations,
    })
}

/// Advisory built from version and check output of one port.
///
/// Recommendations come in a fixed order: the version update first (if a version was
/// detected), then one entry per check reporting "vulnerable", in check order.
pub fn advanced_advisory(port: &ProbedPort) -> VulnerabilityAdvisory {
    let mut recommendations = Vec::new();
    if let Some(version) = port.version.as_deref() {
        let name = port
            .product
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(port.service.as_str());
        recommendations.push(format!("Update {name} from version {version}"));
    }

    let mut details = Vec::with_capacity(port.scripts.len());
    for script in &port.scripts {
        if script.output.to_lowercase().contains("vulnerable") {
            recommendations.push(format!("Address {} finding", script.id));
        }
        details.push(CheckResult {
            check: script.id.clone(),
            output: script.output.clone(),
        });
    }

    VulnerabilityAdvisory {
        level: AdvisoryLevel::Advanced,
        description: port.version_info(),
        details,
        recommendations,
    }
}
