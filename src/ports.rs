use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Parse a port specification into a deduplicated list of TCP ports (1..=65535).
///
/// Supported syntax, items separated by commas and/or whitespace:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - open-ended ranges: `-1024` (from 1), `60000-` (to 65535)
///
/// Order of first appearance is preserved.
pub fn parse_port_spec(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for item in s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|i| !i.is_empty())
    {
        if let Some((a, b)) = item.split_once('-') {
            let start = match a.trim() {
                "" => 1,
                a => parse_port_str(a).with_context(|| format!("invalid start in range: {item}"))?,
            };
            let end = match b.trim() {
                "" => u16::MAX,
                b => parse_port_str(b).with_context(|| format!("invalid end in range: {item}"))?,
            };
            if start > end {
                bail!("invalid range {start}-{end} (start > end)");
            }
            for p in start..=end {
                if seen.insert(p) {
                    out.push(p);
                }
            }
            continue;
        }

        let p = parse_port_str(item).with_context(|| format!("invalid port value: {item}"))?;
        if seen.insert(p) {
            out.push(p);
        }
    }

    if out.is_empty() {
        bail!("no ports given");
    }
    Ok(out)
}

/// Likely service name for a well-known TCP port, or `""` when unknown.
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        69 => "tftp",
        80 => "http",
        88 => "kerberos",
        110 => "pop3",
        111 => "rpcbind",
        119 => "nntp",
        123 => "ntp",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        179 => "bgp",
        389 => "ldap",
        443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        514 => "shell",
        515 => "printer",
        587 => "submission",
        631 => "ipp",
        636 => "ldaps",
        873 => "rsync",
        993 => "imaps",
        995 => "pop3s",
        1080 => "socks",
        1433 => "ms-sql-s",
        1521 => "oracle",
        1723 => "pptp",
        1883 => "mqtt",
        2049 => "nfs",
        2375 => "docker",
        3000 => "ppp",
        3128 => "squid-http",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5000 => "upnp",
        5432 => "postgresql",
        5672 => "amqp",
        5900 => "vnc",
        5985 => "wsman",
        6379 => "redis",
        8000 => "http-alt",
        8008 => "http",
        8080 => "http-proxy",
        8443 => "https-alt",
        8888 => "sun-answerbook",
        9000 => "cslistener",
        9092 => "kafka",
        9200 => "elasticsearch",
        11211 => "memcache",
        27017 => "mongod",
        _ => "",
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
