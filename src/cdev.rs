//! Virtual-interface control protocol: fixed-layout binary requests a real
//! character device would receive over a file descriptor. This module gives
//! those request shapes an explicit, independently testable Rust form so
//! both the daemon and the one-shot interface utility
//! (`src/bin/vndd_ctl.rs`) speak one protocol.

use std::net::Ipv4Addr;

use crate::error::{EngineError, EngineResult};
use crate::iface::{OpenParams, VirtualInterfaceAdapter, IFNAMSIZ, MAX_FRAME};

/// 4-byte request tag every control message must carry.
pub const MAGIC_COOKIE: [u8; 4] = *b"CDEV";

pub const CMD_ADD_IF: u32 = 1;
pub const CMD_ANNOUNCE_TO_IF: u32 = 2;
pub const CMD_REMOVE_IF: u32 = 3;

/// A decoded control-protocol request.
#[derive(Debug, Clone)]
pub enum Request {
    AddIf {
        name: String,
        mac: [u8; 6],
        mtu: u32,
        enable_arp: bool,
    },
    RemoveIf {
        name: String,
    },
    Announce {
        name: String,
        payload: Vec<u8>,
    },
}

/// Parses the 8-byte header (`cmd_code: u32`, `magic: "CDEV"`) shared by
/// every request and returns the command code and the remaining body.
fn split_header(buf: &[u8]) -> EngineResult<(u32, &[u8])> {
    if buf.len() < 8 {
        return Err(EngineError::InvalidArgument(
            "request shorter than the 8-byte header".to_string(),
        ));
    }
    let cmd_code = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let magic = &buf[4..8];
    if magic != MAGIC_COOKIE {
        return Err(EngineError::InvalidArgument(
            "request missing or invalid magic cookie".to_string(),
        ));
    }
    Ok((cmd_code, &buf[8..]))
}

fn read_name(buf: &[u8]) -> EngineResult<String> {
    if buf.len() < IFNAMSIZ {
        return Err(EngineError::InvalidArgument(
            "request body shorter than the interface name field".to_string(),
        ));
    }
    let raw = &buf[..IFNAMSIZ];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
    String::from_utf8(raw[..end].to_vec())
        .map_err(|_| EngineError::InvalidArgument("interface name is not valid UTF-8".to_string()))
}

impl Request {
    /// Decodes a wire-format request. Requests without the magic cookie are
    /// rejected with `InvalidArgument` regardless of command code.
    pub fn decode(buf: &[u8]) -> EngineResult<Self> {
        let (cmd_code, body) = split_header(buf)?;
        match cmd_code {
            CMD_ADD_IF => {
                let name = read_name(body)?;
                if body.len() < IFNAMSIZ + 6 + 4 + 4 {
                    return Err(EngineError::InvalidArgument(
                        "ADD_IF body shorter than mac+mtu+enable_arp fields".to_string(),
                    ));
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&body[IFNAMSIZ..IFNAMSIZ + 6]);
                let mtu_off = IFNAMSIZ + 6;
                let mtu = u32::from_be_bytes([
                    body[mtu_off],
                    body[mtu_off + 1],
                    body[mtu_off + 2],
                    body[mtu_off + 3],
                ]);
                let arp_off = mtu_off + 4;
                let enable_arp = u32::from_be_bytes([
                    body[arp_off],
                    body[arp_off + 1],
                    body[arp_off + 2],
                    body[arp_off + 3],
                ]) != 0;
                Ok(Request::AddIf {
                    name,
                    mac,
                    mtu,
                    enable_arp,
                })
            }
            CMD_REMOVE_IF => {
                let name = read_name(body)?;
                Ok(Request::RemoveIf { name })
            }
            CMD_ANNOUNCE_TO_IF => {
                // layout: pkt_len (u32 be) || name[16] || payload[pkt_len]
                if body.len() < 4 + IFNAMSIZ {
                    return Err(EngineError::InvalidArgument(
                        "ANNOUNCE body shorter than pkt_len+name fields".to_string(),
                    ));
                }
                let pkt_len =
                    u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
                let name = read_name(&body[4..])?;
                let payload_start = 4 + IFNAMSIZ;
                let available = body.len().saturating_sub(payload_start);
                let take = pkt_len.min(available).min(MAX_FRAME);
                let payload = body[payload_start..payload_start + take].to_vec();
                Ok(Request::Announce { name, payload })
            }
            other => Err(EngineError::InvalidArgument(format!(
                "unrecognized command code {}",
                other
            ))),
        }
    }

    /// Encodes this request back into its wire form, for the one-shot CLI
    /// utility and for tests.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut name_field = [0u8; IFNAMSIZ];
        match self {
            Request::AddIf {
                name,
                mac,
                mtu,
                enable_arp,
            } => {
                buf.extend_from_slice(&CMD_ADD_IF.to_be_bytes());
                buf.extend_from_slice(&MAGIC_COOKIE);
                write_name(&mut name_field, name);
                buf.extend_from_slice(&name_field);
                buf.extend_from_slice(mac);
                buf.extend_from_slice(&mtu.to_be_bytes());
                buf.extend_from_slice(&(*enable_arp as u32).to_be_bytes());
            }
            Request::RemoveIf { name } => {
                buf.extend_from_slice(&CMD_REMOVE_IF.to_be_bytes());
                buf.extend_from_slice(&MAGIC_COOKIE);
                write_name(&mut name_field, name);
                buf.extend_from_slice(&name_field);
            }
            Request::Announce { name, payload } => {
                buf.extend_from_slice(&CMD_ANNOUNCE_TO_IF.to_be_bytes());
                buf.extend_from_slice(&MAGIC_COOKIE);
                buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                write_name(&mut name_field, name);
                buf.extend_from_slice(&name_field);
                buf.extend_from_slice(payload);
            }
        }
        buf
    }
}

fn write_name(field: &mut [u8; IFNAMSIZ], name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(IFNAMSIZ - 1);
    field[..n].copy_from_slice(&bytes[..n]);
}

/// Dispatches a decoded request against a live adapter. Used by both the
/// daemon (to service requests arriving over its own control path, if any)
/// and the one-shot `vndd_ctl` utility against an in-process adapter in
/// tests.
pub async fn dispatch(adapter: &std::sync::Arc<VirtualInterfaceAdapter>, req: Request) -> EngineResult<()> {
    match req {
        Request::AddIf {
            name,
            mac,
            mtu,
            enable_arp,
        } => {
            adapter
                .open(
                    &name,
                    OpenParams {
                        mac,
                        mtu,
                        enable_arp,
                        local_ip: Ipv4Addr::new(10, 0, 0, 1),
                    },
                )
                .await
        }
        Request::RemoveIf { name } => adapter.remove(&name),
        Request::Announce { name, payload } => adapter.submit(&name, &payload).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_magic_cookie() {
        let mut buf = vec![0u8; 8 + IFNAMSIZ + 6 + 4 + 4];
        buf[0..4].copy_from_slice(&CMD_ADD_IF.to_be_bytes());
        buf[4..8].copy_from_slice(b"XXXX");
        let err = Request::decode(&buf).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn round_trips_add_if() {
        let req = Request::AddIf {
            name: "vndd0".to_string(),
            mac: [0x02, 0, 0, 0, 0, 0],
            mtu: 1500,
            enable_arp: true,
        };
        let encoded = req.encode();
        let decoded = Request::decode(&encoded).unwrap();
        match decoded {
            Request::AddIf {
                name, mac, mtu, ..
            } => {
                assert_eq!(name, "vndd0");
                assert_eq!(mac, [0x02, 0, 0, 0, 0, 0]);
                assert_eq!(mtu, 1500);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn announce_truncates_oversized_payload() {
        let big = vec![0xAAu8; MAX_FRAME + 200];
        let req = Request::Announce {
            name: "vndd0".to_string(),
            payload: big,
        };
        let encoded = req.encode();
        let decoded = Request::decode(&encoded).unwrap();
        match decoded {
            Request::Announce { payload, .. } => assert_eq!(payload.len(), MAX_FRAME),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn short_buffer_is_invalid_argument() {
        let err = Request::decode(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
