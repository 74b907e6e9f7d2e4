use ipnet::Ipv4Net;
use live_scan_rs::targets::{expand_cidr_to_ips, resolve_targets};
use std::net::{IpAddr, Ipv4Addr};

#[test]
fn expand_excludes_network_and_broadcast() {
    let net = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 30).unwrap();
    let ips = expand_cidr_to_ips(ipnet::IpNet::V4(net)).unwrap();
    assert_eq!(
        ips,
        vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ]
    );
}

#[tokio::test]
async fn mixed_list_dedups_in_order() {
    let ips = resolve_targets("192.0.2.10, 192.0.2.9-11 127.0.0.1")
        .await
        .expect("literal targets");
    let expected: Vec<IpAddr> = ["192.0.2.10", "192.0.2.9", "192.0.2.11", "127.0.0.1"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    assert_eq!(ips, expected);
}

#[tokio::test]
async fn localhost_resolves() {
    let ips = resolve_targets("localhost").await.expect("localhost resolves");
    assert_eq!(ips.len(), 1);
    assert!(ips[0].is_loopback());
}

#[tokio::test]
async fn garbage_target_is_an_error() {
    assert!(resolve_targets("300.1.2.3/24").await.is_err());
    assert!(resolve_targets(" ,, ").await.is_err());
}
