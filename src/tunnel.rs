//! Tunnel: one peer binding, local endpoint, remote endpoint, optional
//! key, socket, lifecycle flags.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex as AsyncMutex;

use crate::codec::Key;
use crate::error::EngineResult;
use crate::socket::DatagramSocket;

/// A single tunnel binding a virtual interface name to a remote UDP peer.
pub struct Tunnel {
    pub name: String,
    pub local_endpoint: SocketAddrV4,
    pub remote_endpoint: SocketAddrV4,
    pub key: Option<Key>,
    pub socket: DatagramSocket,
    /// Single-writer flag: the supervisor sets it, the receiver reads it at
    /// the top of its loop.
    remove_pending: AtomicBool,
    /// Held by the receiver for the entire lifetime of its loop; the
    /// supervisor re-acquires it on teardown to learn the receiver has
    /// exited (a guard held for a task's whole lifetime rather than a
    /// literal recursive mutex; see DESIGN.md).
    pub activity_lock: AsyncMutex<()>,
}

impl Tunnel {
    /// Binds the local socket and constructs a passive tunnel resource. The
    /// tunnel does not start any task itself; the supervisor does.
    pub async fn new(
        name: String,
        local_ip: Ipv4Addr,
        local_port: u16,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        key: Option<Key>,
    ) -> EngineResult<Self> {
        let socket = DatagramSocket::bind(local_ip, local_port).await?;
        let local_endpoint = socket.local_addr();
        Ok(Self {
            name,
            local_endpoint,
            remote_endpoint: SocketAddrV4::new(remote_ip, remote_port),
            key,
            socket,
            remove_pending: AtomicBool::new(false),
            activity_lock: AsyncMutex::new(()),
        })
    }

    pub fn mark_remove_pending(&self) {
        self.remove_pending.store(true, Ordering::SeqCst);
    }

    pub fn is_remove_pending(&self) -> bool {
        self.remove_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_tunnel_binds_and_is_not_pending_removal() {
        let t = Tunnel::new(
            "vndd0".to_string(),
            Ipv4Addr::LOCALHOST,
            0,
            Ipv4Addr::LOCALHOST,
            9,
            None,
        )
        .await
        .unwrap();
        assert!(!t.is_remove_pending());
        assert_ne!(t.local_endpoint.port(), 0);
    }

    #[tokio::test]
    async fn mark_remove_pending_is_observed() {
        let t = Tunnel::new(
            "vndd0".to_string(),
            Ipv4Addr::LOCALHOST,
            0,
            Ipv4Addr::LOCALHOST,
            9,
            None,
        )
        .await
        .unwrap();
        t.mark_remove_pending();
        assert!(t.is_remove_pending());
    }
}
