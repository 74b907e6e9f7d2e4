use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use live_scan_rs::controller::ScanController;
use live_scan_rs::scanner::{ConnectProbe, ConnectProbeConfig};
use live_scan_rs::server::{self, AppState};
use live_scan_rs::session::SessionConfig;
use live_scan_rs::sink::BroadcastSink;
use live_scan_rs::types::Tier;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// live-scan-rs — TCP reconnaissance service streaming results to subscribers as they are found.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "live-scan-rs",
    version,
    about = "TCP reconnaissance service streaming ports, hosts and advisories to subscribers as they are found.",
    long_about = None
)]
struct Cli {
    /// Address the HTTP API listens on.
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: String,

    /// Start in the Pro tier (service/version interrogation, advanced advisories).
    #[arg(long, default_value_t = false)]
    pro: bool,

    /// Max concurrent TCP connect attempts.
    #[arg(long, default_value_t = 1000)]
    concurrency: usize,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 400)]
    timeout_ms: u64,

    /// Give up on a scan whose probe runs longer than this many seconds.
    #[arg(long = "probe-timeout-secs")]
    probe_timeout_secs: Option<u64>,

    /// Pause between port events in milliseconds.
    #[arg(long = "emit-delay-ms", default_value_t = 100)]
    emit_delay_ms: u64,

    /// Report closed and filtered ports too, not only open ones.
    #[arg(long = "report-closed", default_value_t = false)]
    report_closed: bool,

    /// Directory with a static web UI to serve outside /api (optional).
    #[arg(long = "static-dir")]
    static_dir: Option<PathBuf>,

    /// Events buffered per subscriber before the slowest ones start losing events.
    #[arg(long = "broadcast-capacity", default_value_t = 1024)]
    broadcast_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        bind = %cli.bind,
        pro = cli.pro,
        concurrency = cli.concurrency,
        timeout_ms = cli.timeout_ms,
        probe_timeout_secs = ?cli.probe_timeout_secs,
        emit_delay_ms = cli.emit_delay_ms,
        report_closed = cli.report_closed,
        "live-scan-rs configuration"
    );

    let probe = ConnectProbe::new(ConnectProbeConfig {
        concurrency: cli.concurrency,
        connect_timeout: Duration::from_millis(cli.timeout_ms),
        report_closed: cli.report_closed,
        ..ConnectProbeConfig::default()
    });
    let events = BroadcastSink::new(cli.broadcast_capacity);
    let session = SessionConfig {
        probe_timeout: cli.probe_timeout_secs.map(Duration::from_secs),
        emit_delay: Duration::from_millis(cli.emit_delay_ms),
    };
    let controller = ScanController::new(
        Arc::new(probe),
        Arc::new(events.clone()),
        session,
        Tier::from_pro(cli.pro),
    );

    let state = AppState {
        controller: controller.clone(),
        events,
    };

    tokio::select! {
        res = server::serve(&cli.bind, state, cli.static_dir.clone()) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            if controller.stop() {
                // The probe only notices cancellation between hosts.
                if tokio::time::timeout(Duration::from_secs(5), controller.wait_idle()).await.is_err() {
                    warn!("scan still running at exit");
                }
            }
        }
    }

    Ok(())
}
