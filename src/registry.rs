//! Tunnel registry: maps interface name → tunnel, and
//! (remote-ip, remote-port) → interface name, kept consistent under a
//! single lock.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::tunnel::Tunnel;

#[derive(Default)]
struct Indices {
    by_name: HashMap<String, Arc<Tunnel>>,
    by_peer: HashMap<SocketAddrV4, String>,
}

/// One process-wide instance, created at daemon start and destroyed at
/// shutdown.
pub struct TunnelRegistry {
    inner: Mutex<Indices>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Indices::default()),
        }
    }

    /// Inserts `tunnel` under `name`. Fails with `DuplicateName` or
    /// `DuplicatePeer` without taking any partial effect; the caller is
    /// expected to close the tunnel's socket on failure.
    pub fn insert(&self, name: String, tunnel: Arc<Tunnel>) -> EngineResult<()> {
        let mut idx = self.inner.lock();
        if idx.by_name.contains_key(&name) {
            return Err(EngineError::DuplicateName(name));
        }
        if idx.by_peer.contains_key(&tunnel.remote_endpoint) {
            return Err(EngineError::DuplicatePeer(tunnel.remote_endpoint));
        }
        idx.by_peer.insert(tunnel.remote_endpoint, name.clone());
        idx.by_name.insert(name, tunnel);
        Ok(())
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Tunnel>> {
        self.inner.lock().by_name.get(name).cloned()
    }

    /// Preserved as an invariant-bearing secondary index and available for
    /// diagnostics; not consulted by the hot data path.
    pub fn lookup_by_peer(&self, peer: SocketAddrV4) -> Option<String> {
        self.inner.lock().by_peer.get(&peer).cloned()
    }

    /// Marks `name`'s tunnel for removal and removes both index entries.
    /// Does **not** itself wait for the receiver to exit; callers that
    /// need to block until the receiver has left its loop should hold onto
    /// the returned tunnel and await its `activity_lock` themselves (the
    /// supervisor does this; see `Supervisor::remove_tunnel`). Idempotent:
    /// a second call for the same name returns `NotFound`.
    pub fn remove(&self, name: &str) -> EngineResult<Arc<Tunnel>> {
        let mut idx = self.inner.lock();
        let tunnel = idx
            .by_name
            .remove(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        idx.by_peer.remove(&tunnel.remote_endpoint);
        tunnel.mark_remove_pending();
        Ok(tunnel)
    }

    /// Invokes `f` for every registered tunnel under the registry lock. `f`
    /// must not perform I/O; iteration happens entirely under the lock.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Arc<Tunnel>)) {
        let idx = self.inner.lock();
        for (name, tunnel) in idx.by_name.iter() {
            f(name, tunnel);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn tunnel(name: &str, remote_port: u16) -> Arc<Tunnel> {
        Arc::new(
            Tunnel::new(
                name.to_string(),
                Ipv4Addr::LOCALHOST,
                0,
                Ipv4Addr::LOCALHOST,
                remote_port,
                None,
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let reg = TunnelRegistry::new();
        reg.insert("a".to_string(), tunnel("a", 9001).await).unwrap();
        let err = reg
            .insert("a".to_string(), tunnel("a", 9002).await)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_peer_is_rejected_and_original_remains() {
        let reg = TunnelRegistry::new();
        reg.insert("a".to_string(), tunnel("a", 9001).await).unwrap();
        let err = reg
            .insert("b".to_string(), tunnel("b", 9001).await)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicatePeer(_)));
        assert!(reg.lookup_by_name("a").is_some());
        assert!(reg.lookup_by_name("b").is_none());
    }

    #[tokio::test]
    async fn secondary_index_matches_primary() {
        let reg = TunnelRegistry::new();
        let t = tunnel("a", 9001).await;
        let remote = t.remote_endpoint;
        reg.insert("a".to_string(), t).unwrap();
        assert_eq!(reg.lookup_by_peer(remote).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let reg = TunnelRegistry::new();
        reg.insert("a".to_string(), tunnel("a", 9001).await).unwrap();
        let removed = reg.remove("a").unwrap();
        assert!(removed.is_remove_pending());
        assert!(reg.lookup_by_name("a").is_none());
        let err = reg.remove("a").unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
