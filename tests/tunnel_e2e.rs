//! End-to-end coverage of the scenarios that need a real tunnel (interface +
//! socket + dispatcher + receiver) wired together.
//! Opening a virtual interface needs a TUN/TAP device and elevated
//! privileges; when that's unavailable (no root, no `/dev/net/tun`, CI
//! sandbox, …) these tests skip themselves rather than failing the suite.

use std::net::Ipv4Addr;
use std::time::Duration;

use resilinet::iface::{OpenParams, VirtualInterfaceAdapter};
use resilinet::tunnel::Tunnel;
use resilinet::{codec, receiver};

async fn try_open(adapter: &std::sync::Arc<VirtualInterfaceAdapter>, name: &str) -> bool {
    adapter
        .open(
            name,
            OpenParams {
                mac: [0x02, 0, 0, 0, 0, 0],
                mtu: 1500,
                enable_arp: true,
                local_ip: Ipv4Addr::new(10, 200, 0, 1),
            },
        )
        .await
        .is_ok()
}

/// An encrypted frame sent on one tunnel's socket is picked up
/// by the peer's receiver loop, decrypted, and submitted to its backing
/// interface, exercising `poll`/`recv_from`/`codec::decrypt`/`submit`
/// exactly as the receiver pool performs them. The dispatcher's own input
/// (host traffic on a real TUN device) isn't reachable from a test without
/// crafting raw IP packets the kernel forwards back, so the dispatcher
/// itself is covered separately by its unit-level neighbors (`codec`,
/// `registry`, `socket`) rather than re-driven here.
#[tokio::test]
async fn encrypted_frame_is_delivered_to_peer_interface() {
    let adapter = VirtualInterfaceAdapter::new();
    if !try_open(&adapter, "vnddtst1").await {
        eprintln!("skipping: cannot open a TUN device in this environment");
        return;
    }

    let key = codec::Key::from_password("SECRET__").unwrap();
    let peer = resilinet::socket::DatagramSocket::bind(Ipv4Addr::LOCALHOST, 0)
        .await
        .unwrap();
    let tunnel_b = std::sync::Arc::new(
        Tunnel::new(
            "vnddtst1".to_string(),
            Ipv4Addr::LOCALHOST,
            0,
            *peer.local_addr().ip(),
            peer.local_addr().port(),
            Some(key.clone()),
        )
        .await
        .unwrap(),
    );

    let _receiver_b = tokio::spawn(receiver::run(tunnel_b.clone(), adapter.clone()));

    let frame = vec![0xAAu8; 60];
    let encrypted = codec::encrypt(&frame, Some(&key)).unwrap();
    peer.send_to(
        &encrypted,
        *tunnel_b.socket.local_addr().ip(),
        tunnel_b.socket.local_addr().port(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let counters = adapter.counters("vnddtst1").unwrap();
    assert_eq!(counters.rx_packets, 1);
    assert_eq!(counters.rx_bytes, 60);

    let _ = adapter.remove("vnddtst1");
}

/// Removing a tunnel under steady traffic returns promptly and stops
/// delivering frames afterward.
#[tokio::test]
async fn remove_during_traffic_is_prompt_and_final() {
    let adapter = VirtualInterfaceAdapter::new();
    if !try_open(&adapter, "vnddtst2").await {
        eprintln!("skipping: cannot open a TUN device in this environment");
        return;
    }

    let tunnel = std::sync::Arc::new(
        Tunnel::new(
            "vnddtst2".to_string(),
            Ipv4Addr::LOCALHOST,
            0,
            Ipv4Addr::LOCALHOST,
            0,
            None,
        )
        .await
        .unwrap(),
    );
    let receiver_handle = tokio::spawn(receiver::run(tunnel.clone(), adapter.clone()));

    tunnel.mark_remove_pending();
    let started = std::time::Instant::now();
    let _ = tunnel.activity_lock.lock().await;
    assert!(started.elapsed() < Duration::from_millis(5_200));

    let _ = receiver_handle.await;
    let _ = adapter.remove("vnddtst2");
}
