//! UDP media tunnel client (current protocol).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;

use voip_core::error::{VoipError, VoipResult};
use voip_core::tunnel::{TunnelPacket, VoipData};

pub struct TunnelClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl TunnelClient {
    /// Bind an ephemeral local port for talking to the relay at `server`.
    pub async fn connect(server: SocketAddr) -> VoipResult<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| VoipError::Transport(format!("bind udp: {e}")))?;
        Ok(Self { socket, server })
    }

    pub fn local_addr(&self) -> VoipResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send AUTH until the relay answers with AUTH_STATUS. The relay validates
    /// the first AUTH in the background and only answers later ones, so a
    /// few rounds are normal.
    pub async fn authenticate(&self, token: &str, retry: Duration, attempts: u32) -> VoipResult<()> {
        let auth = TunnelPacket::Auth {
            token: token.to_string(),
        }
        .encode()?;
        let mut buf = vec![0u8; 64 * 1024];

        for attempt in 1..=attempts {
            self.socket.send_to(&auth, self.server).await?;
            let deadline = time::Instant::now() + retry;
            while let Ok(received) = time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                let (n, from) = received?;
                if from != self.server {
                    continue;
                }
                if let Ok(TunnelPacket::AuthStatus { status }) = TunnelPacket::parse(&buf[..n]) {
                    if status == 0 {
                        tracing::debug!("tunnel authenticated after {} attempt(s)", attempt);
                        return Ok(());
                    }
                    return Err(VoipError::AuthFailed(format!("tunnel status {status}")));
                }
            }
        }
        Err(VoipError::Timeout)
    }

    /// Send one media packet to `receiver`.
    pub async fn send_data(&self, sender: i64, receiver: i64, payload: &[u8]) -> VoipResult<()> {
        let packet = TunnelPacket::Data(VoipData {
            sender,
            receiver,
            payload: payload.to_vec(),
        })
        .encode()?;
        self.socket.send_to(&packet, self.server).await?;
        Ok(())
    }

    /// Wait for the next media packet relayed to us. Other datagrams are skipped.
    pub async fn recv_data(&self) -> VoipResult<VoipData> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if from != self.server {
                continue;
            }
            match TunnelPacket::parse(&buf[..n]) {
                Ok(TunnelPacket::Data(data)) => return Ok(data),
                Ok(_) => continue,
                Err(e) => tracing::debug!("ignoring tunnel datagram: {}", e),
            }
        }
    }
}
