use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use live_scan_rs::controller::ScanController;
use live_scan_rs::error::{ProbeError, StartError};
use live_scan_rs::probe::{ProbeMode, ProbeReport, ProbedHost, ProbedPort, ScanProbe};
use live_scan_rs::session::SessionConfig;
use live_scan_rs::sink::{ChannelSink, EventSink};
use live_scan_rs::types::{
    AdvisoryLevel, HostState, PortResult, PortState, ScanEvent, ScanStatus, Tier,
};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Outcome {
    Report(ProbeReport),
    Fail(&'static str),
    Panic(&'static str),
    Hang,
}

/// Probe returning a fixed outcome, optionally held back until `gate` is notified.
struct FakeProbe {
    outcome: Outcome,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    modes: Mutex<Vec<ProbeMode>>,
}

impl FakeProbe {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            gate: None,
            calls: AtomicUsize::new(0),
            modes: Mutex::new(Vec::new()),
        }
    }

    fn gated(outcome: Outcome, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(outcome)
        }
    }
}

#[async_trait]
impl ScanProbe for FakeProbe {
    async fn probe(
        &self,
        _target: &str,
        _ports: &str,
        mode: ProbeMode,
        _cancel: &CancellationToken,
    ) -> Result<ProbeReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.outcome {
            Outcome::Report(r) => Ok(r.clone()),
            Outcome::Fail(msg) => Err(ProbeError::Failed(msg.to_string())),
            Outcome::Panic(msg) => panic!("{msg}"),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Forwards to a channel and stops the scan right after the first `host_data`.
struct StopAfterFirstHost {
    inner: ChannelSink,
    controller: OnceLock<ScanController>,
}

#[async_trait]
impl EventSink for StopAfterFirstHost {
    async fn emit(&self, event: ScanEvent) {
        let is_host = matches!(event, ScanEvent::Host(_));
        self.inner.emit(event).await;
        if is_host {
            if let Some(controller) = self.controller.get() {
                controller.stop();
            }
        }
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        probe_timeout: None,
        emit_delay: Duration::ZERO,
    }
}

fn controller_with(probe: Arc<FakeProbe>, tier: Tier) -> (ScanController, mpsc::Receiver<ScanEvent>) {
    let (sink, rx) = ChannelSink::new(64);
    let controller = ScanController::new(probe, Arc::new(sink), fast_config(), tier);
    (controller, rx)
}

/// Read events up to and including the terminal one.
async fn collect(rx: &mut mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut out = Vec::new();
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("terminal event within 5s")
            .expect("sink open");
        let done = ev.is_terminal();
        out.push(ev);
        if done {
            return out;
        }
    }
}

fn ports_of(events: &[ScanEvent]) -> Vec<(String, PortResult)> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Port(p) => Some((p.host.clone(), p.port.clone())),
            _ => None,
        })
        .collect()
}

fn two_host_report() -> ProbeReport {
    ProbeReport {
        hosts: vec![
            ProbedHost::tcp(
                "192.0.2.1",
                HostState::Up,
                vec![
                    ProbedPort::new(22, PortState::Open, "ssh"),
                    ProbedPort::new(80, PortState::Open, "http"),
                ],
            ),
            ProbedHost::tcp(
                "192.0.2.2",
                HostState::Up,
                vec![ProbedPort::new(3306, PortState::Open, "mysql")],
            ),
        ],
    }
}

#[tokio::test]
async fn free_scan_streams_ports_then_host_then_completed() {
    let report = ProbeReport {
        hosts: vec![ProbedHost::tcp(
            "192.0.2.10",
            HostState::Up,
            vec![
                ProbedPort::new(80, PortState::Open, "http"),
                ProbedPort::new(443, PortState::Closed, ""),
            ],
        )],
    };
    let probe = Arc::new(FakeProbe::new(Outcome::Report(report)));
    let (controller, mut rx) = controller_with(probe.clone(), Tier::Free);

    controller.start("192.0.2.10", "1-100").expect("accepted");
    let events = collect(&mut rx).await;

    assert_eq!(events.len(), 5);
    assert_eq!(events[0], ScanEvent::Status(ScanStatus::Starting));

    let ScanEvent::Port(http) = &events[1] else { panic!("expected port_data, got {:?}", events[1]) };
    assert_eq!(http.host, "192.0.2.10");
    assert_eq!(http.port.port, 80);
    assert_eq!(http.port.state, PortState::Open);
    assert_eq!(http.port.service, "http");
    let advisory = http.port.advisory.as_ref().expect("basic advisory");
    assert_eq!(advisory.level, AdvisoryLevel::Basic);
    assert!(advisory
        .description
        .as_deref()
        .unwrap()
        .starts_with("HTTP - Web vulnerabilities"));

    let ScanEvent::Port(https) = &events[2] else { panic!("expected port_data") };
    assert_eq!(https.port.port, 443);
    assert_eq!(https.port.state, PortState::Closed);
    assert_eq!(https.port.service, "");
    let payload = events[2].payload();
    assert!(payload.get("advisory").is_none());
    assert!(payload.get("version").is_none());

    let ScanEvent::Host(host) = &events[3] else { panic!("expected host_data") };
    assert_eq!(host.host, "192.0.2.10");
    assert_eq!(host.ports.len(), 2);

    assert_eq!(events[4], ScanEvent::Status(ScanStatus::Completed));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*probe.modes.lock().unwrap(), vec![ProbeMode::Connect]);
}

#[tokio::test]
async fn probe_failure_emits_one_error_and_frees_the_slot() {
    let probe = Arc::new(FakeProbe::new(Outcome::Fail("no route to host")));
    let (controller, mut rx) = controller_with(probe, Tier::Free);

    controller.start("192.0.2.10", "1-100").expect("accepted");
    let events = collect(&mut rx).await;
    assert_eq!(
        events,
        vec![
            ScanEvent::Status(ScanStatus::Starting),
            ScanEvent::Error("no route to host".into()),
        ]
    );

    controller.wait_idle().await;
    assert!(!controller.is_running());
    controller.start("192.0.2.10", "1-100").expect("slot freed after error");
    let again = collect(&mut rx).await;
    assert_eq!(again.last(), Some(&ScanEvent::Error("no route to host".into())));
}

#[tokio::test]
async fn panicking_backend_still_ends_with_scan_error() {
    let probe = Arc::new(FakeProbe::new(Outcome::Panic("backend blew up")));
    let (controller, mut rx) = controller_with(probe.clone(), Tier::Free);

    controller.start("192.0.2.10", "1-100").expect("accepted");
    let events = collect(&mut rx).await;
    assert_eq!(
        events,
        vec![
            ScanEvent::Status(ScanStatus::Starting),
            ScanEvent::Error("scan worker panicked: backend blew up".into()),
        ]
    );

    controller.wait_idle().await;
    assert!(!controller.is_running());
    controller.start("192.0.2.10", "1-100").expect("slot freed after panic");
    let again = collect(&mut rx).await;
    assert!(matches!(again.last(), Some(ScanEvent::Error(_))));
    assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_starts_do_not_consume_scan_ids() {
    let gate = Arc::new(Notify::new());
    let probe = Arc::new(FakeProbe::gated(Outcome::Report(ProbeReport::default()), gate.clone()));
    let (controller, mut rx) = controller_with(probe, Tier::Free);

    let first = controller.start("192.0.2.10", "80").expect("accepted");
    for _ in 0..3 {
        assert_eq!(
            controller.start("192.0.2.11", "80"),
            Err(StartError::AlreadyRunning)
        );
    }
    gate.notify_one();
    collect(&mut rx).await;
    controller.wait_idle().await;

    let second = controller.start("192.0.2.11", "80").expect("accepted");
    assert_eq!(second, first + 1);
    gate.notify_one();
    collect(&mut rx).await;
}

#[tokio::test]
async fn paced_ports_reach_the_sink_before_their_host() {
    let delay = Duration::from_millis(200);
    let report = ProbeReport {
        hosts: vec![ProbedHost::tcp(
            "192.0.2.10",
            HostState::Up,
            vec![
                ProbedPort::new(22, PortState::Open, "ssh"),
                ProbedPort::new(80, PortState::Open, "http"),
            ],
        )],
    };
    let probe = Arc::new(FakeProbe::new(Outcome::Report(report)));
    let (sink, mut rx) = ChannelSink::new(64);
    let config = SessionConfig {
        probe_timeout: None,
        emit_delay: delay,
    };
    let controller = ScanController::new(probe, Arc::new(sink), config, Tier::Free);

    controller.start("192.0.2.10", "22,80").expect("accepted");
    assert_eq!(
        rx.recv().await,
        Some(ScanEvent::Status(ScanStatus::Starting))
    );
    let first = rx.recv().await.expect("first port_data");
    let started = tokio::time::Instant::now();
    assert!(matches!(first, ScanEvent::Port(ref p) if p.port.port == 22));

    // The worker is sleeping after the first port; nothing else is queued yet.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err(),
        "event arrived during the pacing delay"
    );

    let rest = collect(&mut rx).await;
    assert!(matches!(rest[0], ScanEvent::Port(ref p) if p.port.port == 80));
    assert!(matches!(rest[1], ScanEvent::Host(ref h) if h.ports.len() == 2));
    assert_eq!(rest[2], ScanEvent::Status(ScanStatus::Completed));
    // One pause after each of the two ports before host_data.
    assert!(started.elapsed() >= delay + delay / 2, "{:?}", started.elapsed());
}

#[tokio::test]
async fn second_start_is_rejected_without_side_effects() {
    let gate = Arc::new(Notify::new());
    let probe = Arc::new(FakeProbe::gated(Outcome::Report(two_host_report()), gate.clone()));
    let (controller, mut rx) = controller_with(probe.clone(), Tier::Free);

    let first = controller.start("192.0.2.0/30", "1-1000").expect("accepted");
    assert_eq!(
        controller.start("198.51.100.7", "22"),
        Err(StartError::AlreadyRunning)
    );
    assert_eq!(controller.status().scan.map(|s| s.id), Some(first));

    gate.notify_one();
    let events = collect(&mut rx).await;
    let starts = events
        .iter()
        .filter(|e| **e == ScanEvent::Status(ScanStatus::Starting))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(ports_of(&events).len(), 3);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    controller.wait_idle().await;
    assert!(rx.try_recv().is_err(), "rejected start produced events");
    assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_before_iteration_yields_an_empty_completed_scan() {
    let gate = Arc::new(Notify::new());
    let probe = Arc::new(FakeProbe::gated(Outcome::Report(two_host_report()), gate.clone()));
    let (controller, mut rx) = controller_with(probe, Tier::Free);

    controller.start("192.0.2.0/30", "1-1000").expect("accepted");
    assert!(controller.stop());
    assert!(controller.status().scan.unwrap().stopping);
    gate.notify_one();

    let events = collect(&mut rx).await;
    assert_eq!(
        events,
        vec![
            ScanEvent::Status(ScanStatus::Starting),
            ScanEvent::Status(ScanStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn stop_between_hosts_keeps_first_host_and_drops_second() {
    let probe = Arc::new(FakeProbe::new(Outcome::Report(two_host_report())));
    let (inner, mut rx) = ChannelSink::new(64);
    let sink = Arc::new(StopAfterFirstHost {
        inner,
        controller: OnceLock::new(),
    });
    let controller = ScanController::new(probe, sink.clone(), fast_config(), Tier::Free);
    let _ = sink.controller.set(controller.clone());

    controller.start("192.0.2.0/30", "1-1000").expect("accepted");
    let events = collect(&mut rx).await;

    let hosts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::Host(h) => Some(h.host.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(hosts, vec!["192.0.2.1"]);
    assert!(ports_of(&events).iter().all(|(h, _)| h == "192.0.2.1"));
    assert_eq!(events.last(), Some(&ScanEvent::Status(ScanStatus::Completed)));
}

#[tokio::test]
async fn host_data_repeats_port_data_in_order() {
    let probe = Arc::new(FakeProbe::new(Outcome::Report(two_host_report())));
    let (controller, mut rx) = controller_with(probe, Tier::Free);

    controller.start("192.0.2.0/30", "1-1000").expect("accepted");
    let events = collect(&mut rx).await;
    let streamed = ports_of(&events);

    for ev in &events {
        if let ScanEvent::Host(host) = ev {
            let individually: Vec<PortResult> = streamed
                .iter()
                .filter(|(h, _)| *h == host.host)
                .map(|(_, p)| p.clone())
                .collect();
            assert_eq!(host.ports, individually);
        }
    }

    // Every port of a host is emitted before that host.
    let first_host_idx = events
        .iter()
        .position(|e| matches!(e, ScanEvent::Host(_)))
        .unwrap();
    assert!(matches!(events[first_host_idx - 1], ScanEvent::Port(ref p) if p.port.port == 80));
}

#[tokio::test]
async fn tier_is_snapshotted_at_start() {
    let report = ProbeReport {
        hosts: vec![ProbedHost::tcp(
            "192.0.2.10",
            HostState::Up,
            vec![
                ProbedPort::new(22, PortState::Open, "ssh").with_version(Some("OpenSSH"), "8.9p1"),
                ProbedPort::new(80, PortState::Open, "http"),
            ],
        )],
    };
    let gate = Arc::new(Notify::new());
    let probe = Arc::new(FakeProbe::gated(Outcome::Report(report), gate.clone()));
    let (controller, mut rx) = controller_with(probe.clone(), Tier::Free);

    controller.start("192.0.2.10", "22,80").expect("accepted");
    controller.set_tier(true);
    gate.notify_one();
    let free_run = collect(&mut rx).await;
    for (_, port) in ports_of(&free_run) {
        assert_eq!(port.tier, Tier::Free);
        if let Some(adv) = port.advisory {
            assert_eq!(adv.level, AdvisoryLevel::Basic);
        }
    }

    controller.wait_idle().await;
    assert_eq!(controller.tier(), Tier::Pro);
    controller.start("192.0.2.10", "22,80").expect("accepted");
    gate.notify_one();
    let pro_run = collect(&mut rx).await;
    let pro_ports = ports_of(&pro_run);
    assert!(pro_ports.iter().all(|(_, p)| p.tier == Tier::Pro));

    let ssh = &pro_ports[0].1;
    let adv = ssh.advisory.as_ref().expect("advanced advisory for versioned port");
    assert_eq!(adv.level, AdvisoryLevel::Advanced);
    assert_eq!(adv.recommendations, vec!["Update OpenSSH from version 8.9p1".to_string()]);
    assert_eq!(ssh.version.as_deref(), Some("OpenSSH 8.9p1"));
    // No fingerprint data, so no advisory at all (never a basic one).
    assert!(pro_ports[1].1.advisory.is_none());

    assert_eq!(
        *probe.modes.lock().unwrap(),
        vec![ProbeMode::Connect, ProbeMode::ServiceVersion]
    );
}

#[tokio::test]
async fn hung_probe_times_out_into_scan_error() {
    let probe = Arc::new(FakeProbe::new(Outcome::Hang));
    let (sink, mut rx) = ChannelSink::new(8);
    let config = SessionConfig {
        probe_timeout: Some(Duration::from_millis(50)),
        emit_delay: Duration::ZERO,
    };
    let controller = ScanController::new(probe, Arc::new(sink), config, Tier::Free);

    controller.start("192.0.2.10", "1-100").expect("accepted");
    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 2);
    let ScanEvent::Error(msg) = &events[1] else { panic!("expected scan_error") };
    assert!(msg.starts_with("probe timed out"), "{msg}");

    controller.wait_idle().await;
    assert!(!controller.is_running());
}

#[tokio::test]
async fn empty_arguments_are_rejected_up_front() {
    let probe = Arc::new(FakeProbe::new(Outcome::Report(ProbeReport::default())));
    let (controller, mut rx) = controller_with(probe.clone(), Tier::Free);

    assert_eq!(controller.start("  ", "1-100"), Err(StartError::EmptyTarget));
    assert_eq!(controller.start("192.0.2.10", ""), Err(StartError::EmptyPorts));
    assert!(!controller.is_running());
    assert!(!controller.stop());
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn status_reports_running_scan() {
    let gate = Arc::new(Notify::new());
    let probe = Arc::new(FakeProbe::gated(Outcome::Report(ProbeReport::default()), gate.clone()));
    let (controller, mut rx) = controller_with(probe, Tier::Pro);

    assert_eq!(controller.status().state, "idle");
    let id = controller.start("192.0.2.10", "80").expect("accepted");
    let status = controller.status();
    assert_eq!(status.state, "running");
    let scan = status.scan.expect("active scan");
    assert_eq!(scan.id, id);
    assert_eq!(scan.target, "192.0.2.10");
    assert_eq!(scan.tier, Tier::Pro);
    assert!(!scan.stopping);

    gate.notify_one();
    let events = collect(&mut rx).await;
    assert_eq!(events.last(), Some(&ScanEvent::Status(ScanStatus::Completed)));
    controller.wait_idle().await;
    assert_eq!(controller.status().state, "idle");
}
