//! TCP signaling client.
//!
//! `RouterClient` owns three background tasks: a writer that numbers and
//! sends frames, a reader that decodes incoming frames into a channel, and an
//! optional heartbeat keepalive.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use voip_core::control::{encode_control, ControlCommand};
use voip_core::error::{VoipError, VoipResult};
use voip_core::messages::*;
use voip_core::{read_message, write_message};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Heartbeat interval in seconds (0 = disabled).
    pub heartbeat_secs: u64,
    /// Timeout in seconds for connecting and for request/response exchanges.
    pub timeout_secs: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            timeout_secs: 10,
        }
    }
}

/// How to log in.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Legacy uid-only login; the router assigns its fallback appid.
    Uid(i64),
    Token {
        token: String,
        platform_id: i8,
        device_id: String,
    },
}

pub struct RouterClient {
    outgoing_tx: mpsc::Sender<Body>,
    incoming_rx: mpsc::Receiver<Message>,
    /// Messages read while waiting for a specific reply.
    pending: VecDeque<Message>,
    writer_handle: Option<JoinHandle<()>>,
    reader_handle: Option<JoinHandle<()>>,
    keepalive_handle: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    timeout: Duration,
}

impl RouterClient {
    /// Connect to a router at `addr` (host:port).
    pub async fn connect(addr: &str, config: ConnectConfig) -> VoipResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(VoipError::Transport(format!("connect {addr}: {e}"))),
            Err(_) => return Err(VoipError::Timeout),
        };
        let _ = stream.set_nodelay(true);
        tracing::info!("connected to {}", addr);
        Ok(Self::from_stream(stream, config))
    }

    /// Run the client over an already connected stream.
    pub fn from_stream<S>(stream: S, config: ConnectConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Body>(64);
        let (incoming_tx, incoming_rx) = mpsc::channel::<Message>(64);
        let connected = Arc::new(AtomicBool::new(true));

        let writer_handle = tokio::spawn(writer_loop(writer, outgoing_rx));
        let reader_handle = tokio::spawn(reader_loop(reader, incoming_tx, connected.clone()));

        let keepalive_handle = (config.heartbeat_secs > 0).then(|| {
            let interval = Duration::from_secs(config.heartbeat_secs);
            let outgoing = outgoing_tx.clone();
            tokio::spawn(async move {
                let mut ticker = time::interval(interval);
                ticker.tick().await; // skip first immediate tick
                loop {
                    ticker.tick().await;
                    if outgoing.send(Body::Heartbeat).await.is_err() {
                        break;
                    }
                }
                tracing::debug!("keepalive loop ended");
            })
        });

        Self {
            outgoing_tx,
            incoming_rx,
            pending: VecDeque::new(),
            writer_handle: Some(writer_handle),
            reader_handle: Some(reader_handle),
            keepalive_handle,
            connected,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Whether the reader still has a live connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Log in and wait for the router's verdict. Returns the status on
    /// success (its `ip` is the router's address for token logins).
    pub async fn authenticate(&mut self, credentials: Credentials) -> VoipResult<AuthenticationStatus> {
        let body = match credentials {
            Credentials::Uid(uid) => Body::Authentication(Authentication { uid }),
            Credentials::Token {
                token,
                platform_id,
                device_id,
            } => Body::AuthenticationToken(AuthenticationToken {
                token,
                platform_id,
                device_id,
            }),
        };
        self.send(body).await?;

        let reply = self
            .wait_for(|b| matches!(b, Body::AuthenticationStatus(_)))
            .await?;
        match reply.body {
            Body::AuthenticationStatus(status) if status.status == AuthenticationStatus::OK => {
                Ok(status)
            }
            Body::AuthenticationStatus(status) => Err(VoipError::AuthFailed(format!(
                "router refused login (status {})",
                status.status
            ))),
            _ => Err(VoipError::Other("unexpected reply".into())),
        }
    }

    /// Queue a message for the writer task.
    pub async fn send(&self, body: Body) -> VoipResult<()> {
        self.outgoing_tx
            .send(body)
            .await
            .map_err(|_| VoipError::Transport("connection closed".into()))
    }

    /// Send call-signaling to `receiver`.
    pub async fn send_control(
        &self,
        sender: i64,
        receiver: i64,
        command: ControlCommand,
        dial_count: i32,
    ) -> VoipResult<()> {
        self.send(Body::VoipControl(VoipControl {
            sender,
            receiver,
            content: encode_control(command, dial_count),
        }))
        .await
    }

    /// Next message from the router.
    pub async fn recv(&mut self) -> VoipResult<Message> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        self.incoming_rx
            .recv()
            .await
            .ok_or_else(|| VoipError::Transport("connection closed".into()))
    }

    /// Like [`recv`](Self::recv), but gives up after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> VoipResult<Option<Message>> {
        match time::timeout(wait, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Round-trip time of a PING.
    pub async fn ping(&mut self) -> VoipResult<Duration> {
        let started = Instant::now();
        self.send(Body::Ping).await?;
        self.wait_for(|b| matches!(b, Body::Pong)).await?;
        Ok(started.elapsed())
    }

    /// Close the connection and stop background tasks.
    pub async fn disconnect(mut self) -> VoipResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.keepalive_handle.take() {
            handle.abort();
        }
        // Dropping the last sender lets the writer drain and shut down.
        let Self {
            outgoing_tx,
            writer_handle,
            reader_handle,
            ..
        } = self;
        drop(outgoing_tx);
        if let Some(handle) = writer_handle {
            handle
                .await
                .map_err(|e| VoipError::Other(format!("writer task failed: {e}")))?;
        }
        if let Some(handle) = reader_handle {
            handle.abort();
        }
        Ok(())
    }

    /// Read until a message matching `want` arrives, keeping the rest for
    /// later `recv` calls.
    async fn wait_for(&mut self, want: impl Fn(&Body) -> bool) -> VoipResult<Message> {
        let deadline = time::Instant::now() + self.timeout;
        let mut skipped = Vec::new();
        let result = loop {
            let next = match time::timeout_at(deadline, self.incoming_rx.recv()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break Err(VoipError::Transport("connection closed".into())),
                Err(_) => break Err(VoipError::Timeout),
            };
            if want(&next.body) {
                break Ok(next);
            }
            skipped.push(next);
        };
        self.pending.extend(skipped);
        result
    }
}

async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Body>)
where
    W: AsyncWrite + Unpin,
{
    let mut seq: i32 = 0;
    while let Some(body) = rx.recv().await {
        seq = seq.wrapping_add(1);
        let msg = Message {
            seq,
            version: 0,
            body,
        };
        if let Err(e) = write_message(&mut writer, &msg).await {
            tracing::warn!("write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!("writer loop ended");
}

async fn reader_loop<R>(mut reader: R, tx: mpsc::Sender<Message>, connected: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_message(&mut reader).await {
            Ok(msg) => {
                tracing::trace!("recv {} seq={}", command_name(msg.command()), msg.seq);
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("reader stopped: {}", e);
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn no_keepalive() -> ConnectConfig {
        ConnectConfig {
            heartbeat_secs: 0,
            timeout_secs: 5,
        }
    }

    async fn reply(server: &mut DuplexStream, body: Body) {
        write_message(server, &Message::new(body)).await.unwrap();
    }

    #[tokio::test]
    async fn test_uid_login_and_sequence() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RouterClient::from_stream(client_io, no_keepalive());

        let router = tokio::spawn(async move {
            let auth = read_message(&mut server).await.unwrap();
            assert_eq!(auth.seq, 1);
            assert_eq!(auth.body, Body::Authentication(Authentication { uid: 10 }));
            reply(&mut server, Body::AuthenticationStatus(AuthenticationStatus::ok(0))).await;

            let ping = read_message(&mut server).await.unwrap();
            assert_eq!(ping.seq, 2);
            reply(&mut server, Body::Pong).await;
            server
        });

        let status = client.authenticate(Credentials::Uid(10)).await.unwrap();
        assert_eq!(status.status, 0);
        client.ping().await.unwrap();
        router.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_login() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RouterClient::from_stream(client_io, no_keepalive());
        tokio::spawn(async move {
            read_message(&mut server).await.unwrap();
            reply(&mut server, Body::AuthenticationStatus(AuthenticationStatus::failed())).await;
            server
        });
        let result = client
            .authenticate(Credentials::Token {
                token: "bad".into(),
                platform_id: 1,
                device_id: "d".into(),
            })
            .await;
        assert!(matches!(result, Err(VoipError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_messages_before_reply_are_kept() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RouterClient::from_stream(client_io, no_keepalive());
        tokio::spawn(async move {
            read_message(&mut server).await.unwrap();
            reply(
                &mut server,
                Body::VoipControl(VoipControl {
                    sender: 20,
                    receiver: 10,
                    content: encode_control(ControlCommand::Dial, 1),
                }),
            )
            .await;
            reply(&mut server, Body::Pong).await;
            server
        });

        client.ping().await.unwrap();
        let early = client.recv().await.unwrap();
        assert!(matches!(early.body, Body::VoipControl(ref c) if c.sender == 20));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client_io, server) = tokio::io::duplex(4096);
        let mut client = RouterClient::from_stream(client_io, no_keepalive());
        drop(server);
        assert!(client.recv().await.is_err());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_control_layout() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let client = RouterClient::from_stream(client_io, no_keepalive());
        client
            .send_control(10, 20, ControlCommand::Dial, 3)
            .await
            .unwrap();
        let msg = read_message(&mut server).await.unwrap();
        assert_eq!(
            msg.body,
            Body::VoipControl(VoipControl {
                sender: 10,
                receiver: 20,
                content: vec![0, 0, 0, 1, 0, 0, 0, 3],
            })
        );
        client.disconnect().await.unwrap();
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_heartbeats() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let _client = RouterClient::from_stream(
            client_io,
            ConnectConfig {
                heartbeat_secs: 30,
                timeout_secs: 5,
            },
        );
        let started = time::Instant::now();
        let first = read_message(&mut server).await.unwrap();
        assert_eq!(first.body, Body::Heartbeat);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
