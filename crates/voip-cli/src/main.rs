//! voip: command-line client for the VOIP router.
//!
//! Mints access tokens, places calls and answers them. Media is carried
//! over the router's UDP tunnel when a token is configured.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::dial::DialOptions;
use commands::Target;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// voip: VOIP router client
#[derive(Parser)]
#[command(name = "voip", version, about = "VOIP router client: mint tokens, place and answer calls")]
struct Cli {
    /// Router host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Router TCP port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// UDP tunnel port
    #[arg(long, global = true)]
    tunnel_port: Option<u16>,

    /// Access token (overrides the config file)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mint an access token from a hex-encoded secret
    Token {
        /// Shared secret, hex
        #[arg(long)]
        secret: String,
        #[arg(long)]
        appid: i64,
        #[arg(long)]
        uid: i64,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 86400)]
        ttl: u64,
    },

    /// Call another user
    Dial {
        /// Our own uid
        #[arg(long)]
        uid: i64,
        /// Uid to call
        receiver: i64,
        /// How many DIAL messages to send before giving up
        #[arg(long, default_value_t = 10)]
        attempts: u32,
        /// Seconds to wait for an answer between dials
        #[arg(long, default_value_t = 3)]
        interval: u64,
        /// Dummy media frames to send once connected
        #[arg(long, default_value_t = 50)]
        frames: u32,
    },

    /// Wait for an incoming call
    Listen {
        /// Our own uid
        #[arg(long)]
        uid: i64,
        /// Accept without asking
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("voip=debug,voip_cli=debug,voip_client=debug,voip_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("voip=warn,voip_cli=warn")
            .with_target(false)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(config::Config::default_path);
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("voip: {e:#}");
            std::process::exit(1);
        }
    };

    // CLI flags override config.
    let target = |uid: i64| Target {
        host: cli.host.clone().unwrap_or_else(|| cfg.default.host.clone()),
        port: cli.port.unwrap_or(cfg.default.port),
        tunnel_port: cli.tunnel_port.unwrap_or(cfg.default.tunnel_port),
        token: cli.token.clone().or_else(|| cfg.default.token.clone()),
        uid,
    };

    let result = match &cli.command {
        Command::Token {
            secret,
            appid,
            uid,
            ttl,
        } => commands::token::run(secret, *appid, *uid, *ttl),
        Command::Dial {
            uid,
            receiver,
            attempts,
            interval,
            frames,
        } => {
            let opts = DialOptions {
                receiver: *receiver,
                attempts: *attempts,
                interval: Duration::from_secs(*interval),
                frames: *frames,
            };
            commands::dial::run(&target(*uid), &opts).await
        }
        Command::Listen { uid, yes } => commands::listen::run(&target(*uid), *yes).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("voip: {e:#}");
        std::process::exit(1);
    }
}
