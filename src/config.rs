//! CLI surface of the tunnel daemon:
//! `-tunnel <ifname> <src_ip> <src_port> <dst_ip> <dst_port> [-pwd <password>]`
//! (repeatable), `-cdev <path>`, `-daemonize`.
//!
//! The repeated `-tunnel` group carries a variable number of trailing
//! tokens (an optional `-pwd <password>` pair). clap can collect a
//! multi-value occurrence, but only by enabling `allow_hyphen_values`, and
//! that disables the one thing a group boundary needs: a following
//! recognized flag (the next `-tunnel`, or `-daemonize`) stops looking like
//! a flag and gets swallowed as more values of the current occurrence
//! instead. So grouping is done by hand here, before clap ever sees the
//! `-tunnel` tokens at all; clap is left to do what it's good at, the
//! ordinary single-value/flag args (`-cdev`, `-daemonize`, `-pid-file`).

use std::net::Ipv4Addr;

use clap::{Arg, ArgAction, Command};

use crate::error::{EngineError, EngineResult};
use crate::pidlock::DEFAULT_PID_FILE;
use crate::supervisor::TunnelSpec;

pub struct DaemonConfig {
    pub tunnels: Vec<TunnelSpec>,
    pub cdev_path: String,
    pub daemonize: bool,
    pub pid_file: String,
}

/// The daemon's single-dash wire flags, including `-tunnel` itself, which
/// is what a group boundary scans for (see `split_tunnel_groups`).
const TOP_LEVEL_FLAGS: &[&str] = &["-tunnel", "-cdev", "-daemonize", "-pid-file"];

/// Flags clap ends up seeing, in their single-dash wire form. clap's long
/// flags are `--`-prefixed internally; argv is rewritten to that form before
/// parsing (see `normalize_argv`) so the CLI surface stays single-dash.
/// `-tunnel` is deliberately absent: it never reaches clap, see module docs.
const LONG_FLAGS: &[&str] = &["cdev", "daemonize", "pid-file"];

/// Splits `args` (everything after the program name) into each `-tunnel`'s
/// own token group and the remaining tokens clap will parse. A group runs
/// from just after `-tunnel` up to, but not including, the next top-level
/// flag (or the end of argv) -- so a trailing `-pwd <password>` is kept
/// inside its group, but a following `-tunnel`/`-daemonize`/... is not.
fn split_tunnel_groups(args: &[String]) -> (Vec<Vec<String>>, Vec<String>) {
    let mut groups = Vec::new();
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "-tunnel" {
            i += 1;
            let mut group = Vec::new();
            while i < args.len() && !TOP_LEVEL_FLAGS.contains(&args[i].as_str()) {
                group.push(args[i].clone());
                i += 1;
            }
            groups.push(group);
        } else {
            rest.push(args[i].clone());
            i += 1;
        }
    }
    (groups, rest)
}

/// Rewrites leading single-dash long options (`-cdev`, `-daemonize`, ...) to
/// clap's expected `--` form. Tokens that aren't one of `LONG_FLAGS`, such
/// as a `-pwd` value (already pulled out by `split_tunnel_groups` before
/// this runs) or any positional, pass through unchanged.
fn normalize_argv<I, T>(args: I) -> Vec<std::ffi::OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString>,
{
    args.into_iter()
        .map(|a| {
            let a = a.into();
            match a.to_str() {
                Some(s) if s.len() > 1 && s.starts_with('-') && !s.starts_with("--") => {
                    if LONG_FLAGS.contains(&&s[1..]) {
                        std::ffi::OsString::from(format!("-{}", s))
                    } else {
                        a
                    }
                }
                _ => a,
            }
        })
        .collect()
}

fn command() -> Command {
    Command::new("resilinet")
        .about("Userspace layer-2 VPN tunnel engine")
        .arg(
            Arg::new("cdev")
                .long("cdev")
                .num_args(1)
                .default_value("/dev/vnddmgr")
                .value_name("path"),
        )
        .arg(
            Arg::new("daemonize")
                .long("daemonize")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pid-file")
                .long("pid-file")
                .num_args(1)
                .default_value(DEFAULT_PID_FILE)
                .value_name("path"),
        )
}

/// Parses one `-tunnel`'s raw token group:
/// `ifname src_ip src_port dst_ip dst_port [-pwd password]`.
fn parse_tunnel_group(tokens: &[&str]) -> EngineResult<TunnelSpec> {
    if tokens.len() < 5 {
        return Err(EngineError::InvalidArgument(format!(
            "-tunnel requires at least 5 values, got {}",
            tokens.len()
        )));
    }
    let name = tokens[0].to_string();
    let local_ip: Ipv4Addr = tokens[1]
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid src_ip: {}", tokens[1])))?;
    let local_port: u16 = tokens[2]
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid src_port: {}", tokens[2])))?;
    let remote_ip: Ipv4Addr = tokens[3]
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid dst_ip: {}", tokens[3])))?;
    let remote_port: u16 = tokens[4]
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid dst_port: {}", tokens[4])))?;

    let password = match tokens.get(5..) {
        Some([flag, pwd]) if *flag == "-pwd" => Some(pwd.to_string()),
        Some([pwd]) => Some(pwd.to_string()),
        Some([]) | None => None,
        Some(_) => {
            return Err(EngineError::InvalidArgument(
                "too many trailing values after -tunnel's 5 required fields".to_string(),
            ))
        }
    };

    Ok(TunnelSpec {
        name,
        local_ip,
        local_port,
        remote_ip,
        remote_port,
        password,
    })
}

/// Parses `args` (normally `std::env::args()`, program name included) into a
/// `DaemonConfig`. Returns `InvalidArgument` on malformed input; the caller
/// maps that to exit code 1.
pub fn parse<I, T>(args: I) -> EngineResult<DaemonConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let raw: Vec<String> = args
        .into_iter()
        .map(|a| a.into().to_string_lossy().into_owned())
        .collect();

    let (program, body) = match raw.split_first() {
        Some((prog, rest)) => (prog.clone(), rest),
        None => ("resilinet".to_string(), &[][..]),
    };

    let (tunnel_groups, rest_args) = split_tunnel_groups(body);

    let mut clap_argv = vec![program];
    clap_argv.extend(rest_args);

    let matches = command()
        .try_get_matches_from(normalize_argv(clap_argv))
        .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

    let mut tunnels = Vec::new();
    for group in &tunnel_groups {
        let tokens: Vec<&str> = group.iter().map(|s| s.as_str()).collect();
        tunnels.push(parse_tunnel_group(&tokens)?);
    }

    if tunnels.is_empty() {
        return Err(EngineError::InvalidArgument(
            "at least one -tunnel is required".to_string(),
        ));
    }

    Ok(DaemonConfig {
        tunnels,
        cdev_path: matches.get_one::<String>("cdev").cloned().unwrap_or_default(),
        daemonize: matches.get_flag("daemonize"),
        pid_file: matches.get_one::<String>("pid-file").cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_tunnel_without_password() {
        let cfg = parse(["resilinet", "-tunnel", "vndd0", "127.0.0.1", "5000", "127.0.0.1", "5001"]).unwrap();
        assert_eq!(cfg.tunnels.len(), 1);
        let t = &cfg.tunnels[0];
        assert_eq!(t.name, "vndd0");
        assert_eq!(t.local_port, 5000);
        assert_eq!(t.remote_port, 5001);
        assert!(t.password.is_none());
    }

    #[test]
    fn parses_tunnel_with_password() {
        let cfg = parse([
            "resilinet", "-tunnel", "vndd0", "127.0.0.1", "5000", "127.0.0.1", "5001", "-pwd",
            "SECRET__",
        ])
        .unwrap();
        assert_eq!(cfg.tunnels[0].password.as_deref(), Some("SECRET__"));
    }

    #[test]
    fn parses_repeated_tunnels_independently() {
        let cfg = parse([
            "resilinet", "-tunnel", "a", "127.0.0.1", "5000", "127.0.0.1", "5001", "-tunnel",
            "b", "127.0.0.1", "6000", "127.0.0.1", "6001", "-pwd", "SECRET__",
        ])
        .unwrap();
        assert_eq!(cfg.tunnels.len(), 2);
        assert!(cfg.tunnels[0].password.is_none());
        assert_eq!(cfg.tunnels[1].password.as_deref(), Some("SECRET__"));
    }

    #[test]
    fn a_following_flag_terminates_the_tunnel_group_instead_of_being_swallowed() {
        let cfg = parse([
            "resilinet", "-tunnel", "a", "127.0.0.1", "5000", "127.0.0.1", "5001", "-daemonize",
        ])
        .unwrap();
        assert_eq!(cfg.tunnels.len(), 1);
        assert!(cfg.tunnels[0].password.is_none());
        assert!(cfg.daemonize);
    }

    #[test]
    fn rejects_no_tunnels() {
        let err = parse(["resilinet"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_bad_ip() {
        let err = parse(["resilinet", "-tunnel", "vndd0", "not-an-ip", "5000", "127.0.0.1", "5001"])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
