//! Virtual interface adapter.
//!
//! Exposes named, TAP-like Ethernet devices to the OS and to the rest of the
//! engine. Each interface is backed by a real OS TUN/TAP device opened via
//! the `tun` crate. On top of the OS device this module layers the
//! bookkeeping a kernel network device doesn't get for free: an
//! administrative state machine, per-interface counters, and a single
//! bounded outbound queue shared by every managed interface.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tracing::{debug, warn};
use tun::AsyncDevice;

use crate::error::{EngineError, EngineResult};

/// Ethernet frame size ceiling (14-byte header included).
pub const MAX_FRAME: usize = 1514;
/// Bounded capacity of the shared outbound queue.
pub const CDEV_PKTQ_LEN: usize = 1000;
/// Smallest MTU `change_mtu`/`open` accepts.
pub const MIN_MTU: u32 = 68;
/// Largest MTU `change_mtu`/`open` accepts.
pub const MAX_MTU: u32 = 1500;
/// Interface names are at most 15 characters plus a NUL terminator.
pub const IFNAMSIZ: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfState {
    Up,
    Down,
    Removed,
}

/// Monotone per-interface traffic counters, readable concurrently.
#[derive(Default)]
pub struct Counters {
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A frame waiting in the shared outbound queue, tagged with the interface
/// that originated it.
struct QueuedFrame {
    name: String,
    payload: Vec<u8>,
}

/// The shared outbound queue: a bounded FIFO plus a fallible allocation path.
/// A push that cannot afford the copy reports `PoolExhausted`; a push that
/// fits in memory but finds the ring already at `CDEV_PKTQ_LEN` reports
/// `Congested`; the two are tracked as separate conditions.
struct PacketQueue {
    capacity: usize,
    inner: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    fn push(&self, name: &str, payload: &[u8]) -> EngineResult<()> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(payload.len())
            .map_err(|_| EngineError::PoolExhausted)?;
        buf.extend_from_slice(payload);

        let mut q = self.inner.lock();
        if q.len() >= self.capacity {
            return Err(EngineError::Congested);
        }
        q.push_back(QueuedFrame {
            name: name.to_string(),
            payload: buf,
        });
        drop(q);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> (String, Vec<u8>) {
        loop {
            if let Some(f) = self.inner.lock().pop_front() {
                return (f.name, f.payload);
            }
            self.notify.notified().await;
        }
    }

    fn try_pop(&self) -> EngineResult<(String, Vec<u8>)> {
        self.inner
            .lock()
            .pop_front()
            .map(|f| (f.name, f.payload))
            .ok_or(EngineError::WouldBlock)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

struct Interface {
    name: String,
    #[allow(dead_code)]
    mac: [u8; 6],
    mtu: AtomicU32,
    #[allow(dead_code)]
    enable_arp: bool,
    state: Mutex<IfState>,
    counters: Counters,
    writer: tokio::sync::Mutex<WriteHalf<AsyncDevice>>,
}

/// Parameters carried by an `ADD_IF` request.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub mac: [u8; 6],
    pub mtu: u32,
    pub enable_arp: bool,
    /// Address assigned to the backing OS device so it is usable without
    /// external `ip`/`ifconfig` configuration; not part of the control
    /// protocol's wire fields but required to bring a real TUN/TAP device
    /// up at all.
    pub local_ip: Ipv4Addr,
}

/// The virtual interface adapter: owns every managed interface and the
/// single shared outbound queue the dispatcher drains.
pub struct VirtualInterfaceAdapter {
    interfaces: Mutex<HashMap<String, Arc<Interface>>>,
    queue: PacketQueue,
}

impl VirtualInterfaceAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            interfaces: Mutex::new(HashMap::new()),
            queue: PacketQueue::new(CDEV_PKTQ_LEN),
        })
    }

    /// Truncates an interface name to the wire format's 15 usable
    /// characters (the 16th byte is the NUL terminator).
    pub fn normalize_name(name: &str) -> String {
        name.chars().take(IFNAMSIZ - 1).collect()
    }

    /// `ADD_IF`: creates and brings up a new managed interface.
    pub async fn open(self: &Arc<Self>, name: &str, params: OpenParams) -> EngineResult<()> {
        if !(MIN_MTU..=MAX_MTU).contains(&params.mtu) {
            return Err(EngineError::InvalidArgument(format!(
                "mtu {} outside [{}, {}]",
                params.mtu, MIN_MTU, MAX_MTU
            )));
        }
        let name = Self::normalize_name(name);
        {
            let interfaces = self.interfaces.lock();
            if interfaces.contains_key(&name) {
                return Err(EngineError::DuplicateName(name));
            }
        }

        let mut config = tun::Configuration::default();
        config
            .address(params.local_ip)
            .destination(params.local_ip)
            .netmask((255, 255, 255, 0))
            .mtu(params.mtu as i32)
            .name(&name)
            .up();
        #[cfg(target_os = "linux")]
        config.platform(|p| {
            p.packet_information(false);
        });

        let dev = tun::create_as_async(&config)
            .map_err(|e| EngineError::InvalidArgument(format!("failed to open {}: {}", name, e)))?;
        let (reader, writer) = tokio::io::split(dev);

        let iface = Arc::new(Interface {
            name: name.clone(),
            mac: params.mac,
            mtu: AtomicU32::new(params.mtu),
            enable_arp: params.enable_arp,
            state: Mutex::new(IfState::Up),
            counters: Counters::default(),
            writer: tokio::sync::Mutex::new(writer),
        });

        self.interfaces.lock().insert(name.clone(), iface);
        self.spawn_host_reader(name, reader);
        Ok(())
    }

    /// Background task: reads Ethernet frames the host emits on `name` and
    /// feeds them into the shared outbound queue (the host IP stack → virtual
    /// interface → frame queue data path).
    fn spawn_host_reader(self: &Arc<Self>, name: String, mut reader: ReadHalf<AsyncDevice>) {
        let adapter = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_FRAME];
            loop {
                let is_up = {
                    let interfaces = adapter.interfaces.lock();
                    match interfaces.get(&name) {
                        Some(iface) => *iface.state.lock() == IfState::Up,
                        None => return,
                    }
                };
                if !is_up {
                    // Still drain the device to avoid blocking the kernel,
                    // but drop whatever comes through while administratively down.
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => adapter.bump_tx_dropped(&name, n),
                    }
                    continue;
                }

                match reader.read(&mut buf).await {
                    Ok(0) => return,
                    Ok(n) => {
                        if let Err(e) = adapter.queue.push(&name, &buf[..n]) {
                            warn!(interface = %name, error = %e, "outbound frame dropped");
                            adapter.bump_tx_dropped(&name, n);
                        }
                    }
                    Err(e) => {
                        warn!(interface = %name, error = %e, "tun read error, host reader exiting");
                        return;
                    }
                }
            }
        });
    }

    fn bump_tx_dropped(&self, name: &str, bytes: usize) {
        if let Some(iface) = self.interfaces.lock().get(name) {
            iface.counters.tx_dropped.fetch_add(1, Ordering::Relaxed);
            let _ = bytes;
        }
    }

    /// `stop`: administratively brings an interface down. RX and TX are
    /// disabled; queued frames already accepted are delivered normally.
    pub fn stop(&self, name: &str) -> EngineResult<()> {
        let interfaces = self.interfaces.lock();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?;
        *iface.state.lock() = IfState::Down;
        Ok(())
    }

    /// `remove` (`REMOVE_IF`): unregisters and frees an interface.
    pub fn remove(&self, name: &str) -> EngineResult<()> {
        let mut interfaces = self.interfaces.lock();
        let iface = interfaces
            .remove(name)
            .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?;
        *iface.state.lock() = IfState::Removed;
        Ok(())
    }

    /// `change_mtu`: atomic under the interface's own counter; readers
    /// observe either the old or the new value, never a torn one.
    pub fn change_mtu(&self, name: &str, new_mtu: u32) -> EngineResult<()> {
        if !(MIN_MTU..=MAX_MTU).contains(&new_mtu) {
            return Err(EngineError::InvalidArgument(format!(
                "mtu {} outside [{}, {}]",
                new_mtu, MIN_MTU, MAX_MTU
            )));
        }
        let interfaces = self.interfaces.lock();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?;
        iface.mtu.store(new_mtu, Ordering::SeqCst);
        Ok(())
    }

    pub fn mtu(&self, name: &str) -> EngineResult<u32> {
        let interfaces = self.interfaces.lock();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?;
        Ok(iface.mtu.load(Ordering::SeqCst))
    }

    pub fn counters(&self, name: &str) -> EngineResult<CounterSnapshot> {
        let interfaces = self.interfaces.lock();
        let iface = interfaces
            .get(name)
            .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?;
        Ok(iface.counters.snapshot())
    }

    /// `read()`: blocks until the host has transmitted a frame on some
    /// managed interface, returning its origin and payload. This is the
    /// dispatcher's sole suspension point per iteration.
    pub async fn read(&self) -> (String, Vec<u8>) {
        let (name, payload) = self.queue.pop().await;
        if let Some(iface) = self.interfaces.lock().get(&name) {
            iface.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
            iface
                .counters
                .tx_bytes
                .fetch_add(payload.len() as u64, Ordering::Relaxed);
        }
        (name, payload)
    }

    /// Non-blocking counterpart to `read`, returning `WouldBlock` when the
    /// outbound queue is empty.
    pub fn try_read(&self) -> EngineResult<(String, Vec<u8>)> {
        let (name, payload) = self.queue.try_pop()?;
        if let Some(iface) = self.interfaces.lock().get(&name) {
            iface.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
            iface
                .counters
                .tx_bytes
                .fetch_add(payload.len() as u64, Ordering::Relaxed);
        }
        Ok((name, payload))
    }

    /// `submit` (`ANNOUNCE`): delivers `payload` to the host as a received
    /// Ethernet frame on interface `name`.
    pub async fn submit(&self, name: &str, payload: &[u8]) -> EngineResult<()> {
        let payload = if payload.len() > MAX_FRAME {
            warn!(interface = %name, len = payload.len(), "announce payload truncated to MAX_FRAME");
            &payload[..MAX_FRAME]
        } else {
            payload
        };

        let iface = {
            let interfaces = self.interfaces.lock();
            interfaces
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::NoSuchInterface(name.to_string()))?
        };

        if *iface.state.lock() != IfState::Up {
            iface.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::InterfaceDown(name.to_string()));
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(payload.len())
            .map_err(|_| EngineError::OutOfMemory)?;
        buf.extend_from_slice(payload);

        let mut writer = iface.writer.lock().await;
        match writer.write_all(&buf).await {
            Ok(()) => {
                iface.counters.rx_packets.fetch_add(1, Ordering::Relaxed);
                iface
                    .counters
                    .rx_bytes
                    .fetch_add(buf.len() as u64, Ordering::Relaxed);
                debug!(interface = %name, bytes = buf.len(), "submitted frame to host");
                Ok(())
            }
            Err(e) => {
                iface.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::ReceiveError(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_normalization_truncates_at_ifnamsiz_minus_one() {
        let short = VirtualInterfaceAdapter::normalize_name("vndd0");
        assert_eq!(short, "vndd0");
        let long = VirtualInterfaceAdapter::normalize_name("a234567890123456");
        assert_eq!(long.len(), IFNAMSIZ - 1);
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let q = PacketQueue::new(4);
        for i in 0..4 {
            q.push("eth0", &[i as u8]).unwrap();
        }
        assert_eq!(q.len(), 4);
        let err = q.push("eth0", &[9]).unwrap_err();
        assert!(matches!(err, EngineError::Congested));
    }

    #[test]
    fn try_pop_on_empty_queue_would_block() {
        let q = PacketQueue::new(4);
        let err = q.try_pop().unwrap_err();
        assert!(matches!(err, EngineError::WouldBlock));
    }

    #[test]
    fn mtu_boundaries() {
        assert!((MIN_MTU..=MAX_MTU).contains(&68));
        assert!(!(MIN_MTU..=MAX_MTU).contains(&67));
        assert!((MIN_MTU..=MAX_MTU).contains(&1500));
        assert!(!(MIN_MTU..=MAX_MTU).contains(&1501));
    }
}
