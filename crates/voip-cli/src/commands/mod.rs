//! CLI subcommand implementations.

pub mod dial;
pub mod listen;
pub mod token;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing::info;
use voip_client::{ConnectConfig, Credentials, RouterClient};
use voip_core::control::{control_command, ControlCommand};
use voip_core::messages::{Body, Message};

/// Where to connect and who to log in as.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tunnel_port: u16,
    pub token: Option<String>,
    /// Our own uid, used as the sender of control messages.
    pub uid: i64,
}

impl Target {
    /// Connect to the router and log in. Uses the token when one is set,
    /// otherwise a legacy uid-only login.
    pub async fn login(&self) -> Result<RouterClient> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut client = RouterClient::connect(&addr, ConnectConfig::default())
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;

        let credentials = match &self.token {
            Some(token) => Credentials::Token {
                token: token.clone(),
                platform_id: PLATFORM_CLI,
                device_id: device_id(),
            },
            None => Credentials::Uid(self.uid),
        };
        let status = client
            .authenticate(credentials)
            .await
            .context("login refused")?;

        info!(uid = self.uid, public_ip = %std::net::Ipv4Addr::from(status.ip), "logged in");
        Ok(client)
    }

    /// Resolve the tunnel address on the router host.
    pub async fn tunnel_addr(&self) -> Result<SocketAddr> {
        let spec = format!("{}:{}", self.host, self.tunnel_port);
        let addr = tokio::net::lookup_host(spec.as_str())
            .await
            .with_context(|| format!("failed to resolve {spec}"))?
            .next()
            .with_context(|| format!("no address for {spec}"));
        addr
    }
}

/// Platform id reported by this CLI in token logins.
const PLATFORM_CLI: i8 = 3;

fn device_id() -> String {
    format!("voip-cli-{}", std::process::id())
}

/// Control command carried by `msg` if it is a VOIP control frame from `peer`
/// (any sender when `peer` is `None`).
pub fn control_from(msg: &Message, peer: Option<i64>) -> Option<(i64, ControlCommand)> {
    match &msg.body {
        Body::VoipControl(ctl) if peer.map_or(true, |p| p == ctl.sender) => {
            control_command(&ctl.content).map(|cmd| (ctl.sender, cmd))
        }
        _ => None,
    }
}
