//! Dispatcher: the single outbound task that reads every frame the host
//! emits on any managed interface and fans it out to the matching tunnel.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec;
use crate::iface::VirtualInterfaceAdapter;
use crate::registry::TunnelRegistry;

/// Runs the dispatcher loop until the adapter and registry are dropped (in
/// practice: forever, until the process exits; there is no per-iteration
/// cancellation point other than process exit).
pub async fn run(adapter: Arc<VirtualInterfaceAdapter>, registry: Arc<TunnelRegistry>) {
    loop {
        // The only suspension point per iteration.
        let (name, payload) = adapter.read().await;

        let tunnel = match registry.lookup_by_name(&name) {
            Some(t) => t,
            None => {
                // Expected race with concurrent removal; drop silently.
                continue;
            }
        };

        let encrypted = match codec::encrypt(&payload, tunnel.key.as_ref()) {
            Ok(buf) => buf,
            Err(e) => {
                warn!(interface = %name, error = %e, "frame codec error, dropping outbound packet");
                continue;
            }
        };

        match tunnel
            .socket
            .send_to(
                &encrypted,
                *tunnel.remote_endpoint.ip(),
                tunnel.remote_endpoint.port(),
            )
            .await
        {
            Ok(n) if n == encrypted.len() => {
                debug!(interface = %name, bytes = n, peer = %tunnel.remote_endpoint, "dispatched frame");
            }
            Ok(n) => {
                warn!(interface = %name, sent = n, expected = encrypted.len(), "short send, dropping packet");
            }
            Err(e) => {
                warn!(interface = %name, error = %e, "send error, dropping packet");
            }
        }
    }
}
