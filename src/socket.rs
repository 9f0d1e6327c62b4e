//! Datagram socket: a bound UDP endpoint with poll/sendto/recvfrom.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{EngineError, EngineResult};

/// Largest datagram this engine will read or write.
pub const MAX_DATAGRAM: usize = 2048;

/// Outcome of a bounded wait for readability.
#[derive(Debug, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Timeout,
}

/// A bound, unconnected UDP/IPv4 socket.
pub struct DatagramSocket {
    inner: UdpSocket,
    local_addr: SocketAddrV4,
}

impl DatagramSocket {
    /// Binds a new socket to `(ip, port)`. `port == 0` asks the kernel for
    /// an ephemeral port, which is then reflected in `local_addr()`, the
    /// same "bind with SO_REUSEADDR, recover actual port via getsockname"
    /// contract `udp_socket_t::bind` implements.
    pub async fn bind(ip: Ipv4Addr, port: u16) -> EngineResult<Self> {
        let std_sock = std::net::UdpSocket::bind((ip, port))
            .map_err(|e| EngineError::BindError(SocketAddrV4::new(ip, port), e))?;
        std_sock
            .set_nonblocking(true)
            .map_err(EngineError::InvalidSocket)?;
        let local_addr = match std_sock.local_addr() {
            Ok(std::net::SocketAddr::V4(a)) => a,
            _ => SocketAddrV4::new(ip, port),
        };
        let inner =
            UdpSocket::from_std(std_sock).map_err(EngineError::InvalidSocket)?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Sends `buf` to `(ip, port)`, returning the number of bytes sent.
    pub async fn send_to(&self, buf: &[u8], ip: Ipv4Addr, port: u16) -> EngineResult<usize> {
        self.inner
            .send_to(buf, (ip, port))
            .await
            .map_err(EngineError::SendError)
    }

    /// Receives into `buf`, returning the byte count and the sender's
    /// address. Datagrams larger than `buf` are truncated by the kernel.
    pub async fn recv_from(&self, buf: &mut [u8]) -> EngineResult<(usize, Ipv4Addr, u16)> {
        let (n, src) = self
            .inner
            .recv_from(buf)
            .await
            .map_err(EngineError::ReceiveError)?;
        match src {
            std::net::SocketAddr::V4(a) => Ok((n, *a.ip(), a.port())),
            std::net::SocketAddr::V6(_) => Err(EngineError::ReceiveError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unexpected IPv6 source address",
            ))),
        }
    }

    /// Waits up to `timeout` for the socket to become readable.
    pub async fn poll(&self, timeout: Duration) -> EngineResult<PollStatus> {
        match tokio::time::timeout(timeout, self.inner.readable()).await {
            Ok(Ok(())) => Ok(PollStatus::Ready),
            Ok(Err(e)) => Err(EngineError::ReceiveError(e)),
            Err(_) => Ok(PollStatus::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_ephemeral_port_is_reflected() {
        let sock = DatagramSocket::bind(Ipv4Addr::LOCALHOST, 0).await.unwrap();
        assert_ne!(sock.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let a = DatagramSocket::bind(Ipv4Addr::LOCALHOST, 0).await.unwrap();
        let b = DatagramSocket::bind(Ipv4Addr::LOCALHOST, 0).await.unwrap();

        let msg = b"hello";
        a.send_to(msg, *b.local_addr().ip(), b.local_addr().port())
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, ip, port) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], msg);
        assert_eq!(ip, *a.local_addr().ip());
        assert_eq!(port, a.local_addr().port());
    }

    #[tokio::test]
    async fn poll_times_out_when_idle() {
        let sock = DatagramSocket::bind(Ipv4Addr::LOCALHOST, 0).await.unwrap();
        let status = sock.poll(Duration::from_millis(20)).await.unwrap();
        assert_eq!(status, PollStatus::Timeout);
    }
}
