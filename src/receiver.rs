//! Receiver pool: one inbound task per tunnel, reading datagrams off the
//! tunnel's socket and injecting frames back into the virtual interface.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec;
use crate::iface::VirtualInterfaceAdapter;
use crate::socket::{PollStatus, MAX_DATAGRAM};
use crate::tunnel::Tunnel;

/// How long a receiver waits for a readable socket before re-checking
/// `remove_pending`; bounds cancellation latency.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs one tunnel's inbound loop. Holds `tunnel.activity_lock` for its
/// entire lifetime so the supervisor can join by re-acquiring the same
/// lock once this function returns.
pub async fn run(tunnel: Arc<Tunnel>, adapter: Arc<VirtualInterfaceAdapter>) {
    let _guard = tunnel.activity_lock.lock().await;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        if tunnel.is_remove_pending() {
            debug!(interface = %tunnel.name, "remove pending, receiver exiting");
            return;
        }

        match tunnel.socket.poll(POLL_TIMEOUT).await {
            Ok(PollStatus::Timeout) => continue,
            Ok(PollStatus::Ready) => {}
            Err(e) => {
                warn!(interface = %tunnel.name, error = %e, "receive error, receiver exiting");
                return;
            }
        }

        let (n, _src_ip, _src_port) = match tunnel.socket.recv_from(&mut buf).await {
            Ok(v) if v.0 > 0 => v,
            Ok(_) => {
                warn!(interface = %tunnel.name, "empty datagram, receiver exiting");
                return;
            }
            Err(e) => {
                warn!(interface = %tunnel.name, error = %e, "recv_from failed, receiver exiting");
                return;
            }
        };

        let payload = match codec::decrypt(&buf[..n], tunnel.key.as_ref()) {
            Ok(p) => p,
            Err(e) => {
                warn!(interface = %tunnel.name, error = %e, "codec error, dropping inbound datagram");
                continue;
            }
        };

        if let Err(e) = adapter.submit(&tunnel.name, &payload).await {
            warn!(interface = %tunnel.name, error = %e, "submit failed, dropping inbound frame");
        } else {
            info!(interface = %tunnel.name, bytes = payload.len(), "delivered inbound frame");
        }
    }
}
