//! Service and version interrogation of open ports (Pro probes only).
//!
//! Every technique here is best effort: anything that times out or does not parse just
//! leaves the port as it was.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

use crate::probe::{ProbedPort, ScriptOutput};

/// Ports where a TLS handshake is attempted instead of a plaintext banner read.
pub const TLS_PORTS: &[u16] = &[443, 465, 636, 993, 995, 8443];

/// Ports that get a `HEAD /` request.
pub const HTTP_PORTS: &[u16] = &[80, 3000, 5000, 8000, 8008, 8080, 8888, 9000];

/// Fill in product/version and check outputs for one open port, consuming the already
/// connected stream.
pub async fn interrogate(
    mut port: ProbedPort,
    ip: IpAddr,
    mut stream: TcpStream,
    timeout: Duration,
) -> ProbedPort {
    if TLS_PORTS.contains(&port.port) {
        drop(stream);
        match peer_certificate(SocketAddr::new(ip, port.port), timeout).await {
            Some(der) => port.scripts.extend(describe_certificate(&der)),
            None => debug!(%ip, port = port.port, "no TLS certificate"),
        }
        return port;
    }

    if HTTP_PORTS.contains(&port.port) {
        if let Some(response) = http_head(&mut stream, ip, timeout).await {
            if let Some(server) = server_header(&response) {
                match parse_product_version(server) {
                    Some((product, version)) => {
                        port.product = Some(product);
                        port.version = Some(version);
                    }
                    None => port.product = Some(server.to_string()),
                }
                port.scripts.push(ScriptOutput::new("http-server-header", server));
            }
        }
        return port;
    }

    if let Some(banner) = read_banner(&mut stream, timeout).await {
        if let Some((product, version)) =
            parse_ssh_banner(&banner).or_else(|| parse_product_version(&banner))
        {
            port.product = Some(product);
            port.version = Some(version);
        }
        port.scripts.push(ScriptOutput::new("banner", banner));
    }
    port
}

/// Try to read up to 256 bytes from the stream and return the first line as lossy UTF-8.
async fn read_banner(stream: &mut TcpStream, timeout: Duration) -> Option<String> {
    let mut buf = vec![0u8; 256];
    match time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            let s = String::from_utf8_lossy(&buf);
            let line = s.lines().next().unwrap_or("").trim();
            (!line.is_empty()).then(|| line.to_string())
        }
        _ => None,
    }
}

async fn http_head(stream: &mut TcpStream, ip: IpAddr, timeout: Duration) -> Option<String> {
    let request = format!("HEAD / HTTP/1.0\r\nHost: {ip}\r\nUser-Agent: live-scan-rs\r\n\r\n");
    time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .ok()?
        .ok()?;
    let mut buf = vec![0u8; 2048];
    let n = time::timeout(timeout, stream.read(&mut buf)).await.ok()?.ok()?;
    if n == 0 {
        return None;
    }
    buf.truncate(n);
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Value of the `Server:` header in a raw HTTP response head.
pub fn server_header(response: &str) -> Option<&str> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("server")
            .then(|| value.trim())
            .filter(|v| !v.is_empty())
    })
}

/// `SSH-2.0-OpenSSH_8.9p1 Ubuntu-3` -> (`OpenSSH`, `8.9p1`).
pub fn parse_ssh_banner(banner: &str) -> Option<(String, String)> {
    let rest = banner.strip_prefix("SSH-")?;
    let (_proto, software) = rest.split_once('-')?;
    let software = software.split_whitespace().next()?;
    let (product, version) = software.split_once('_')?;
    Some((product.to_string(), version.to_string()))
}

/// Find a `Product/1.2`, `Product_1.2` or `Product 1.2` pair anywhere in `text`.
pub fn parse_product_version(text: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ';' | ','))
        .filter(|t| !t.is_empty())
        .collect();

    let starts_alpha = |t: &str| t.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let starts_digit = |t: &str| t.chars().next().is_some_and(|c| c.is_ascii_digit());

    for token in &tokens {
        if let Some((product, version)) = token.split_once(|c: char| c == '/' || c == '_') {
            if starts_alpha(product) && starts_digit(version) {
                return Some((product.to_string(), version.to_string()));
            }
        }
    }
    tokens.windows(2).find_map(|pair| {
        let (product, version) = (pair[0], pair[1]);
        (starts_alpha(product) && starts_digit(version) && version.contains('.'))
            .then(|| (product.to_string(), version.to_string()))
    })
}

async fn peer_certificate(addr: SocketAddr, timeout: Duration) -> Option<Vec<u8>> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .ok()?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let stream = time::timeout(timeout, TcpStream::connect(addr))
        .await
        .ok()?
        .ok()?;
    let tls = time::timeout(timeout, connector.connect(&addr.ip().to_string(), stream))
        .await
        .ok()?
        .ok()?;
    let cert = tls.get_ref().peer_certificate().ok()??;
    cert.to_der().ok()
}

/// Turn a DER certificate into `ssl-cert` output, plus `ssl-cert-expiry` when the
/// certificate is outside its validity window.
pub fn describe_certificate(der: &[u8]) -> Vec<ScriptOutput> {
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(der) else {
        return Vec::new();
    };
    let validity = cert.validity();
    let mut out = vec![ScriptOutput::new(
        "ssl-cert",
        format!(
            "Subject: {}; Issuer: {}; Not valid before: {}; Not valid after: {}",
            cert.subject(),
            cert.issuer(),
            validity.not_before,
            validity.not_after
        ),
    )];
    if !validity.is_valid() {
        out.push(ScriptOutput::new(
            "ssl-cert-expiry",
            format!(
                "VULNERABLE: certificate not valid now (valid {} to {})",
                validity.not_before, validity.not_after
            ),
        ));
    }
    out
}
