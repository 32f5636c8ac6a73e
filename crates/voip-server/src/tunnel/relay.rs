//! UDP media relay.
//!
//! Two listeners share one [`TunnelRegistry`]: the current protocol, where a
//! peer authenticates with a token before sending DATA, and the legacy
//! protocol, where the first packet from an address registers it. Nothing is
//! ever reported back for a dropped packet.

use super::registry::{AuthState, TunnelRegistry};
use crate::auth::TokenValidator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voip_core::tunnel::{auth_status_ok, relay_frame, TunnelPacket, VoipData};

/// Result of handling one datagram.
#[derive(Debug)]
pub enum Outcome {
    /// Send these bytes to this address.
    Send(Vec<u8>, SocketAddr),
    /// Token validation was started in the background.
    Validating(JoinHandle<()>),
    Drop,
}

pub struct TunnelRelay {
    registry: Arc<TunnelRegistry>,
    validator: Arc<dyn TokenValidator>,
    legacy_appid: i64,
    gc_interval: Duration,
    client_timeout: Duration,
}

impl TunnelRelay {
    pub fn new(
        registry: Arc<TunnelRegistry>,
        validator: Arc<dyn TokenValidator>,
        legacy_appid: i64,
        gc_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            validator,
            legacy_appid,
            gc_interval,
            client_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Handle a datagram on the current-protocol listener.
    pub async fn handle_datagram(&self, buf: &[u8], from: SocketAddr, now: Instant) -> Outcome {
        let packet = match TunnelPacket::parse(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(from = %from, error = %e, "bad tunnel datagram");
                return Outcome::Drop;
            }
        };

        match packet {
            TunnelPacket::Auth { token } => self.handle_auth(token, from, now).await,
            TunnelPacket::Data(data) => self.relay(&buf[1..], data.receiver, from, now).await,
            TunnelPacket::AuthStatus { .. } => Outcome::Drop,
        }
    }

    /// Handle a datagram on the legacy listener: a bare DATA body.
    pub async fn handle_legacy_datagram(&self, buf: &[u8], from: SocketAddr, now: Instant) -> Outcome {
        let data = match VoipData::parse(buf) {
            Ok(data) => data,
            Err(e) => {
                debug!(from = %from, error = %e, "bad legacy datagram");
                return Outcome::Drop;
            }
        };
        self.registry
            .register_legacy(from, self.legacy_appid, data.sender, now)
            .await;
        self.relay(buf, data.receiver, from, now).await
    }

    async fn handle_auth(&self, token: String, from: SocketAddr, now: Instant) -> Outcome {
        match self.registry.begin_auth(from, now).await {
            AuthState::Unseen => {
                let registry = self.registry.clone();
                let validator = self.validator.clone();
                let task = tokio::spawn(async move {
                    match validator.validate(&token).await {
                        Ok(access) if access.appid != 0 && access.uid != 0 => {
                            if registry.complete_auth(from, access.appid, access.uid).await {
                                info!(from = %from, appid = access.appid, uid = access.uid, "tunnel auth");
                            }
                        }
                        Ok(_) => warn!(from = %from, "tunnel token has zero appid or uid"),
                        Err(e) => warn!(from = %from, error = %e, "tunnel token rejected"),
                    }
                });
                Outcome::Validating(task)
            }
            AuthState::Pending => Outcome::Drop,
            AuthState::Authenticated => Outcome::Send(auth_status_ok().to_vec(), from),
        }
    }

    /// `body` is the DATA body as received; it is forwarded unchanged.
    async fn relay(&self, body: &[u8], receiver: i64, from: SocketAddr, now: Instant) -> Outcome {
        match self.registry.route_data(from, receiver, now).await {
            Some((to, has_header)) => Outcome::Send(relay_frame(body, has_header), to),
            None => {
                debug!(from = %from, receiver, "no tunnel route");
                Outcome::Drop
            }
        }
    }

    async fn finish(&self, socket: &UdpSocket, outcome: Outcome, now: Instant) {
        if let Outcome::Send(bytes, to) = outcome {
            if let Err(e) = socket.send_to(&bytes, to).await {
                debug!(to = %to, error = %e, "tunnel send failed");
            }
        }
        self.registry
            .maybe_sweep(now, self.gc_interval, self.client_timeout)
            .await;
    }

    /// Serve the current-protocol listener forever.
    pub async fn run(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "tunnel recv failed");
                    continue;
                }
            };
            let now = Instant::now();
            let outcome = self.handle_datagram(&buf[..n], from, now).await;
            self.finish(&socket, outcome, now).await;
        }
    }

    /// Serve the legacy listener forever.
    pub async fn run_legacy(self: Arc<Self>, socket: UdpSocket) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "legacy tunnel recv failed");
                    continue;
                }
            };
            let now = Instant::now();
            let outcome = self.handle_legacy_datagram(&buf[..n], from, now).await;
            self.finish(&socket, outcome, now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HmacTokenValidator;
    use voip_core::create_token;

    const SECRET: &[u8] = b"tunnel-test-secret";

    fn relay() -> TunnelRelay {
        TunnelRelay::new(
            Arc::new(TunnelRegistry::new(Instant::now())),
            Arc::new(HmacTokenValidator::new(SECRET.to_vec())),
            1006,
            Duration::from_secs(300),
            Duration::from_secs(60),
        )
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 2], port))
    }

    fn auth_packet(appid: i64, uid: i64) -> Vec<u8> {
        TunnelPacket::Auth {
            token: create_token(SECRET, appid, uid, 3600),
        }
        .encode()
        .unwrap()
    }

    fn data_packet(sender: i64, receiver: i64, payload: &[u8]) -> VoipData {
        VoipData {
            sender,
            receiver,
            payload: payload.to_vec(),
        }
    }

    async fn authenticate(relay: &TunnelRelay, from: SocketAddr, appid: i64, uid: i64) {
        match relay
            .handle_datagram(&auth_packet(appid, uid), from, Instant::now())
            .await
        {
            Outcome::Validating(task) => task.await.unwrap(),
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_then_probe() {
        let relay = relay();
        authenticate(&relay, addr(1), 7, 10).await;
        match relay
            .handle_datagram(&auth_packet(7, 10), addr(1), Instant::now())
            .await
        {
            Outcome::Send(bytes, to) => {
                assert_eq!(bytes, vec![2, 0]);
                assert_eq!(to, addr(1));
            }
            other => panic!("expected auth status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_while_pending_ignored() {
        let relay = relay();
        let bad = TunnelPacket::Auth {
            token: "garbage".into(),
        }
        .encode()
        .unwrap();
        match relay.handle_datagram(&bad, addr(1), Instant::now()).await {
            Outcome::Validating(task) => task.await.unwrap(),
            other => panic!("expected validation, got {other:?}"),
        }
        // validation failed, so the address stays pending until swept
        assert!(matches!(
            relay.handle_datagram(&auth_packet(7, 10), addr(1), Instant::now()).await,
            Outcome::Drop
        ));
        assert_eq!(relay.registry().lookup(addr(1)).await.unwrap().identity, None);
    }

    #[tokio::test]
    async fn test_data_relayed_with_header() {
        let relay = relay();
        authenticate(&relay, addr(1), 7, 10).await;
        authenticate(&relay, addr(2), 7, 20).await;

        let packet = TunnelPacket::Data(data_packet(10, 20, b"audio")).encode().unwrap();
        match relay.handle_datagram(&packet, addr(1), Instant::now()).await {
            Outcome::Send(bytes, to) => {
                assert_eq!(to, addr(2));
                // DATA byte, then the body exactly as sent
                assert_eq!(bytes, packet);
            }
            other => panic!("expected relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_drops() {
        let relay = relay();
        authenticate(&relay, addr(1), 7, 10).await;
        authenticate(&relay, addr(3), 8, 20).await;

        // receiver in another app
        let packet = TunnelPacket::Data(data_packet(10, 20, b"x")).encode().unwrap();
        assert!(matches!(
            relay.handle_datagram(&packet, addr(1), Instant::now()).await,
            Outcome::Drop
        ));
        // unknown sender address
        assert!(matches!(
            relay.handle_datagram(&packet, addr(9), Instant::now()).await,
            Outcome::Drop
        ));
        // truncated and unknown datagrams
        assert!(matches!(
            relay.handle_datagram(&[3, 0, 0], addr(1), Instant::now()).await,
            Outcome::Drop
        ));
        assert!(matches!(
            relay.handle_datagram(&[0x0e], addr(1), Instant::now()).await,
            Outcome::Drop
        ));
    }

    #[tokio::test]
    async fn test_legacy_relay() {
        let relay = relay();
        let a_to_b = data_packet(10, 20, b"hello").encode();
        let b_to_a = data_packet(20, 10, b"hi").encode();

        // b has not been seen yet
        assert!(matches!(
            relay.handle_legacy_datagram(&a_to_b, addr(1), Instant::now()).await,
            Outcome::Drop
        ));
        match relay.handle_legacy_datagram(&b_to_a, addr(2), Instant::now()).await {
            Outcome::Send(bytes, to) => {
                assert_eq!(to, addr(1));
                assert_eq!(bytes, b_to_a);
            }
            other => panic!("expected relay, got {other:?}"),
        }
        match relay.handle_legacy_datagram(&a_to_b, addr(1), Instant::now()).await {
            Outcome::Send(bytes, to) => {
                assert_eq!(to, addr(2));
                assert_eq!(bytes, a_to_b);
            }
            other => panic!("expected relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_legacy_to_current_peer_gets_header() {
        let relay = relay();
        authenticate(&relay, addr(1), 1006, 10).await;
        let legacy = data_packet(20, 10, b"pcm").encode();
        match relay.handle_legacy_datagram(&legacy, addr(2), Instant::now()).await {
            Outcome::Send(bytes, to) => {
                assert_eq!(to, addr(1));
                assert_eq!(bytes[0], 3);
                assert_eq!(&bytes[1..], &legacy[..]);
            }
            other => panic!("expected relay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_udp_end_to_end() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let relay = Arc::new(relay());
        tokio::spawn(relay.run(server));

        let alice = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bob = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for (sock, uid) in [(&alice, 10), (&bob, 20)] {
            let mut buf = [0u8; 16];
            loop {
                sock.send_to(&auth_packet(7, uid), server_addr).await.unwrap();
                let reply = tokio::time::timeout(
                    Duration::from_millis(50),
                    sock.recv_from(&mut buf),
                )
                .await;
                if let Ok(Ok((n, _))) = reply {
                    assert_eq!(&buf[..n], &[2, 0]);
                    break;
                }
            }
        }

        let packet = TunnelPacket::Data(data_packet(10, 20, b"frame")).encode().unwrap();
        alice.send_to(&packet, server_addr).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = tokio::time::timeout(Duration::from_secs(5), bob.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, server_addr);
        assert_eq!(&buf[..n], &packet[..]);
    }
}
