//! Router process: accepts TCP sessions and runs the UDP tunnel listeners.
//!
//! Owns the route registry, the tunnel registry and the collaborator
//! adapters, and hands shared references to every session and listener.

use crate::auth::{HmacTokenValidator, TokenValidator};
use crate::config::ServerConfig;
use crate::push::{JsonlPushQueue, PushPolicy};
use crate::route::RouteRegistry;
use crate::session::{run_session, SessionContext};
use crate::tunnel::{TunnelRegistry, TunnelRelay};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info, warn};
use voip_core::{VoipError, VoipResult};

/// How often registry sizes are logged at debug level.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

pub struct RouterServer {
    config: ServerConfig,
    ctx: Arc<SessionContext>,
    tunnel: Arc<TunnelRelay>,
    next_session_id: AtomicU64,
}

impl RouterServer {
    pub fn new(config: ServerConfig) -> VoipResult<Self> {
        let secret = match &config.token_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("no [auth] token_secret configured, using a random one; tokens will not survive a restart");
                voip_core::generate_secret()?
            }
        };
        let validator: Arc<dyn TokenValidator> = Arc::new(HmacTokenValidator::new(secret));

        let ctx = Arc::new(SessionContext {
            routes: Arc::new(RouteRegistry::new(config.login_policy)),
            validator: validator.clone(),
            push: Arc::new(JsonlPushQueue::new(config.queue_dir.clone())),
            push_policy: PushPolicy::new(config.per_app_queues.clone()),
            idle_timeout: config.idle_timeout,
            fallback_appid: config.fallback_appid,
        });

        let tunnel = Arc::new(TunnelRelay::new(
            Arc::new(TunnelRegistry::new(Instant::now())),
            validator,
            config.tunnel.legacy_appid,
            config.tunnel.gc_interval,
            config.tunnel.client_timeout,
        ));

        Ok(Self {
            config,
            ctx,
            tunnel,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Bind every listener and serve until the process stops.
    pub async fn run(self) -> VoipResult<()> {
        let server = Arc::new(self);
        let listener = TcpListener::bind(server.config.listen)
            .await
            .map_err(|e| VoipError::Transport(format!("bind {}: {e}", server.config.listen)))?;

        if server.config.tunnel.enabled {
            let ip = server.config.listen.ip();
            let legacy = bind_udp(SocketAddr::new(ip, server.config.tunnel.port)).await?;
            let current = bind_udp(SocketAddr::new(ip, server.config.tunnel.port_v2)).await?;
            tokio::spawn(server.tunnel.clone().run_legacy(legacy));
            tokio::spawn(server.tunnel.clone().run(current));
        }

        let snapshot = server.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
            loop {
                interval.tick().await;
                let sessions = snapshot.ctx.routes.session_count().await;
                let tunnel_clients = snapshot.tunnel.registry().len().await;
                debug!(sessions, tunnel_clients, "registry snapshot");
            }
        });

        info!(
            listen = %server.config.listen,
            tunnel = server.config.tunnel.enabled,
            tunnel_port = server.config.tunnel.port,
            tunnel_port_v2 = server.config.tunnel.port_v2,
            login_policy = %server.config.login_policy,
            "voip-router ready"
        );

        server.serve(listener).await
    }

    /// Accept TCP connections forever, one session task each.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> VoipResult<()> {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let public_ip = stream.local_addr().map(public_ipv4).unwrap_or(0);
            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            info!(session = id, remote = %remote, "connection accepted");
            tokio::spawn(run_session(stream, id, public_ip, self.ctx.clone()));
        }
    }
}

async fn bind_udp(addr: SocketAddr) -> VoipResult<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| VoipError::Transport(format!("bind udp {addr}: {e}")))
}

/// The address the client reached us on, as a big-endian integer. 0 for IPv6.
fn public_ipv4(local: SocketAddr) -> u32 {
    match local.ip() {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliOverrides, ConfigFile};
    use tokio::net::TcpStream;
    use voip_core::messages::*;
    use voip_core::{create_token, read_message, write_message};

    #[test]
    fn test_public_ipv4() {
        assert_eq!(public_ipv4("10.1.2.3:20000".parse().unwrap()), 0x0a01_0203);
        assert_eq!(public_ipv4("[::1]:20000".parse().unwrap()), 0);
    }

    #[tokio::test]
    async fn test_tcp_login_reports_local_ip() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = ConfigFile::default();
        file.auth.token_secret = Some(hex::encode(b"server-test"));
        file.push.queue_dir = dir.path().display().to_string();
        let config = ServerConfig::resolve(file, &CliOverrides::default()).unwrap();
        let server = Arc::new(RouterServer::new(config).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let login = Body::AuthenticationToken(AuthenticationToken {
            token: create_token(b"server-test", 3, 30, 60),
            platform_id: 1,
            device_id: "box".into(),
        });
        write_message(&mut stream, &Message::new(login)).await.unwrap();
        let status = read_message(&mut stream).await.unwrap();
        assert_eq!(status.seq, 1);
        assert_eq!(
            status.body,
            Body::AuthenticationStatus(AuthenticationStatus::ok(0x7f00_0001))
        );
    }
}
