//! One-shot interface management utility: talks directly to the virtual
//! interface adapter, independently of the tunnel daemon process. It builds
//! its own `VirtualInterfaceAdapter`, encodes a `cdev::Request` from its CLI
//! arguments, and dispatches it against that adapter, bringing up or tearing
//! down a real OS TUN device without requiring the daemon to be running.
//!
//! CLI surface: `{add|remove} <ifname> [mac <MAC>] [mtu <N>] [cdev <path>]`.
//! The trailing `key value` pairs are unordered and optional rather than a
//! conventional `--flag` syntax, so this parses them by hand instead of
//! through clap.

use std::net::Ipv4Addr;
use std::process::ExitCode;

use resilinet::cdev::{self, Request};
use resilinet::iface::VirtualInterfaceAdapter;
use tracing::error;

const DEFAULT_MAC: &str = "02:00:00:00:00:00";
const DEFAULT_MTU: u32 = 1500;
#[allow(dead_code)]
const DEFAULT_CDEV: &str = "/dev/vnddmgr";

enum CtlCommand {
    Add {
        ifname: String,
        mac: String,
        mtu: u32,
        #[allow(dead_code)]
        cdev: String,
    },
    Remove {
        ifname: String,
        #[allow(dead_code)]
        cdev: String,
    },
}

fn usage_error(msg: impl Into<String>) -> String {
    format!(
        "{}\nusage: vndd_ctl {{add|remove}} <ifname> [mac <MAC>] [mtu <N>] [cdev <path>]",
        msg.into()
    )
}

/// Parses `{add|remove} <ifname> [mac <MAC>] [mtu <N>] [cdev <path>]` by
/// hand: the trailing `key value` pairs have no fixed order and no `--`
/// prefix, which a declarative flag parser isn't shaped for.
fn parse_args(args: &[String]) -> Result<CtlCommand, String> {
    let mut it = args.iter();
    let verb = it.next().ok_or_else(|| usage_error("missing command"))?;
    let ifname = it
        .next()
        .ok_or_else(|| usage_error("missing interface name"))?
        .clone();

    let mut mac = DEFAULT_MAC.to_string();
    let mut mtu = DEFAULT_MTU;
    let mut cdev = DEFAULT_CDEV.to_string();

    let rest: Vec<&String> = it.collect();
    let mut i = 0;
    while i < rest.len() {
        let key = rest[i].as_str();
        let value = rest
            .get(i + 1)
            .ok_or_else(|| usage_error(format!("`{}` requires a value", key)))?;
        match key {
            "mac" => mac = value.to_string(),
            "mtu" => {
                mtu = value
                    .parse()
                    .map_err(|_| usage_error(format!("invalid mtu: {}", value)))?
            }
            "cdev" => cdev = value.to_string(),
            other => return Err(usage_error(format!("unrecognized option: {}", other))),
        }
        i += 2;
    }

    match verb.as_str() {
        "add" => Ok(CtlCommand::Add {
            ifname,
            mac,
            mtu,
            cdev,
        }),
        "remove" => Ok(CtlCommand::Remove { ifname, cdev }),
        other => Err(usage_error(format!("unrecognized command: {}", other))),
    }
}

fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(format!("invalid MAC address: {}", s));
    }
    let mut mac = [0u8; 6];
    for (i, p) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(p, 16).map_err(|_| format!("invalid MAC address: {}", s))?;
    }
    Ok(mac)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&argv) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let adapter = VirtualInterfaceAdapter::new();

    let request = match command {
        CtlCommand::Add {
            ifname, mac, mtu, ..
        } => {
            let mac = match parse_mac(&mac) {
                Ok(mac) => mac,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::FAILURE;
                }
            };
            Request::AddIf {
                name: ifname,
                mac,
                mtu,
                enable_arp: true,
            }
        }
        CtlCommand::Remove { ifname, .. } => Request::RemoveIf { name: ifname },
    };

    // Round-trip through the wire encoding even though the adapter is
    // local: this keeps the utility exercising the same bytes a real
    // out-of-process control channel would carry.
    let encoded = request.encode();
    let decoded = match Request::decode(&encoded) {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to encode control request");
            return ExitCode::FAILURE;
        }
    };

    // `AddIf` needs a local address to bring the backing OS device up with;
    // `vndd_config.cc` takes this from its own config file, defaulted here.
    let result = match decoded {
        Request::AddIf {
            name,
            mac,
            mtu,
            enable_arp,
        } => {
            adapter
                .open(
                    &name,
                    resilinet::iface::OpenParams {
                        mac,
                        mtu,
                        enable_arp,
                        local_ip: Ipv4Addr::new(10, 0, 0, 1),
                    },
                )
                .await
        }
        other => cdev::dispatch(&adapter, other).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "operation failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_defaults() {
        let args: Vec<String> = vec!["add".into(), "vndd0".into()];
        match parse_args(&args).unwrap() {
            CtlCommand::Add {
                ifname, mac, mtu, ..
            } => {
                assert_eq!(ifname, "vndd0");
                assert_eq!(mac, DEFAULT_MAC);
                assert_eq!(mtu, DEFAULT_MTU);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_add_with_overrides_in_any_order() {
        let args: Vec<String> = vec![
            "add".into(),
            "vndd0".into(),
            "mtu".into(),
            "1400".into(),
            "mac".into(),
            "aa:bb:cc:dd:ee:ff".into(),
        ];
        match parse_args(&args).unwrap() {
            CtlCommand::Add {
                ifname, mac, mtu, ..
            } => {
                assert_eq!(ifname, "vndd0");
                assert_eq!(mac, "aa:bb:cc:dd:ee:ff");
                assert_eq!(mtu, 1400);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_remove() {
        let args: Vec<String> = vec!["remove".into(), "vndd0".into()];
        match parse_args(&args).unwrap() {
            CtlCommand::Remove { ifname, .. } => assert_eq!(ifname, "vndd0"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        let args: Vec<String> = vec!["frobnicate".into(), "vndd0".into()];
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn rejects_missing_ifname() {
        let args: Vec<String> = vec!["add".into()];
        assert!(parse_args(&args).is_err());
    }

    #[test]
    fn rejects_dangling_key() {
        let args: Vec<String> = vec!["add".into(), "vndd0".into(), "mtu".into()];
        assert!(parse_args(&args).is_err());
    }
}
