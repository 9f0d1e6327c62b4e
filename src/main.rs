//! Tunnel daemon entry point. Parses the `-tunnel`/`-cdev`/`-daemonize` CLI
//! (`config.rs`), brings up every configured tunnel through a `Supervisor`,
//! then waits for a shutdown signal before tearing everything down in
//! order.

use std::process::ExitCode;

use resilinet::config;
use resilinet::pidlock::PidLock;
use resilinet::supervisor::Supervisor;
use tracing::{error, info};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let cfg = match config::parse(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "argument error");
            return ExitCode::FAILURE;
        }
    };

    if cfg.daemonize {
        let daemon = daemonize::Daemonize::new()
            .pid_file(&cfg.pid_file)
            .working_directory(".");
        if let Err(e) = daemon.start() {
            error!(error = %e, "failed to daemonize");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(cfg))
}

async fn run(cfg: config::DaemonConfig) -> ExitCode {
    // `daemonize` already takes a non-blocking lock on its own PID file when
    // daemonizing; this second lock covers the foreground case.
    let _pid_lock = if !cfg.daemonize {
        match PidLock::acquire(&cfg.pid_file) {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!(error = %e, "failed to acquire pid lock");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    info!(cdev = %cfg.cdev_path, tunnels = cfg.tunnels.len(), "starting resilinet");

    let supervisor = Supervisor::new();
    let mut created = 0usize;
    for spec in cfg.tunnels {
        let name = spec.name.clone();
        match supervisor.add_tunnel(spec).await {
            Ok(()) => created += 1,
            Err(e) => error!(interface = %name, error = %e, "failed to bring up tunnel"),
        }
    }

    if created == 0 {
        error!("no tunnels could be created, exiting");
        return ExitCode::FAILURE;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install signal handler");
    }

    info!("shutdown signal received");
    supervisor.shutdown().await;
    ExitCode::SUCCESS
}
