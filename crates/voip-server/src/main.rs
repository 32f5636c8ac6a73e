//! voip-router: presence-aware VOIP signaling router.
//!
//! Accepts persistent TCP client connections, authenticates them, routes
//! call-control messages between users of the same application, and relays
//! media over a UDP tunnel.

mod auth;
mod config;
mod push;
mod route;
mod server;
mod session;
mod tunnel;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::RouterServer;
use std::path::PathBuf;
use tracing::{error, info};

/// voip-router: VOIP signaling router and media tunnel
#[derive(Parser, Debug)]
#[command(name = "voip-router", version, about = "VOIP signaling router")]
struct Cli {
    /// TCP listen address (e.g. 0.0.0.0:20000)
    #[arg(short, long)]
    listen: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.voip-router/config.toml")]
    config: String,

    /// Legacy UDP tunnel port
    #[arg(long)]
    tunnel_port: Option<u16>,

    /// Current-protocol UDP tunnel port
    #[arg(long)]
    tunnel_port_v2: Option<u16>,

    /// Do not start the UDP tunnel
    #[arg(long)]
    no_tunnel: bool,

    /// What to do with a user's other sessions on login: multi or single
    #[arg(long)]
    login_policy: Option<String>,

    /// Seconds without a frame before a connection is closed
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting voip-router");

    let overrides = CliOverrides {
        listen: cli.listen,
        tunnel_port: cli.tunnel_port,
        tunnel_port_v2: cli.tunnel_port_v2,
        no_tunnel: cli.no_tunnel,
        login_policy: cli.login_policy,
        idle_timeout: cli.idle_timeout,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let router = match RouterServer::new(server_config) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = router.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("voip-router stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
