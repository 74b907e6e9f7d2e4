use anyhow::{anyhow, bail, Context, Result};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

/// Upper bound on the number of hosts one target specification may expand to (a /16).
pub const MAX_HOSTS: usize = 65_536;

/// Expand a target specification into concrete addresses, resolving hostnames via DNS.
///
/// Items are separated by commas and/or whitespace. Each item may be:
/// - an IPv4 or IPv6 address: `192.0.2.10`
/// - a CIDR block: `192.168.1.0/24`
/// - an IPv4 range, short or full: `10.0.0.5-20`, `10.0.0.5-10.0.1.3`
/// - a hostname: `scanme.example.org`
///
/// Duplicates are removed; order of first appearance is preserved.
pub async fn resolve_targets(spec: &str) -> Result<Vec<IpAddr>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for item in spec
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|i| !i.is_empty())
    {
        let ips = match parse_literal(item)? {
            Some(ips) => ips,
            None => vec![resolve_hostname(item).await?],
        };
        for ip in ips {
            if seen.insert(ip) {
                out.push(ip);
            }
        }
        if out.len() > MAX_HOSTS {
            bail!("target expands to more than {MAX_HOSTS} hosts");
        }
    }

    if out.is_empty() {
        bail!("no targets given");
    }
    Ok(out)
}

/// Parse an address, CIDR or IPv4 range without touching the network.
///
/// Returns `Ok(None)` when the item is not an address literal and should be treated as a
/// hostname.
pub fn parse_literal(item: &str) -> Result<Option<Vec<IpAddr>>> {
    if let Ok(ip) = item.parse::<IpAddr>() {
        return Ok(Some(vec![ip]));
    }

    if item.contains('/') {
        let net = item
            .parse::<IpNet>()
            .map_err(|e| anyhow!("invalid CIDR {item}: {e}"))?;
        return expand_cidr_to_ips(net).map(Some);
    }

    if let Some((a, b)) = item.split_once('-') {
        if let Ok(start) = a.parse::<Ipv4Addr>() {
            return expand_ipv4_range(start, b)
                .with_context(|| format!("invalid range {item}"))
                .map(Some);
        }
    }

    Ok(None)
}

/// Expand a CIDR into individual addresses suitable for host scanning.
///
/// For IPv4 blocks larger than /31, excludes the network and broadcast addresses.
/// IPv6 is only accepted as a single /128 host.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Result<Vec<IpAddr>> {
    match cidr {
        IpNet::V4(n4) => {
            let size = 1u64 << (32 - u32::from(n4.prefix_len()));
            if size > MAX_HOSTS as u64 {
                bail!("{cidr} is larger than {MAX_HOSTS} hosts");
            }
            Ok(expand_ipv4net_hosts(n4).into_iter().map(IpAddr::V4).collect())
        }
        IpNet::V6(n6) if n6.prefix_len() == 128 => Ok(vec![IpAddr::V6(n6.addr())]),
        IpNet::V6(_) => bail!("IPv6 ranges are not supported: {cidr}"),
    }
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}

fn expand_ipv4_range(start: Ipv4Addr, end: &str) -> Result<Vec<IpAddr>> {
    let end = match end.parse::<Ipv4Addr>() {
        Ok(full) => full,
        Err(_) => {
            let last: u8 = end
                .parse()
                .map_err(|_| anyhow!("invalid range end: {end}"))?;
            let o = start.octets();
            Ipv4Addr::new(o[0], o[1], o[2], last)
        }
    };
    let (a, b) = (u32::from(start), u32::from(end));
    if a > b {
        bail!("start {start} is after end {end}");
    }
    if (b - a) as usize >= MAX_HOSTS {
        bail!("range is larger than {MAX_HOSTS} hosts");
    }
    Ok((a..=b).map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect())
}

async fn resolve_hostname(name: &str) -> Result<IpAddr> {
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((name, 0))
        .await
        .with_context(|| format!("could not resolve {name}"))?
        .map(|sa| sa.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| anyhow!("{name} has no addresses"))
}
