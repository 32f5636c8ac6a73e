//! One client connection: an inbound loop that reads and dispatches frames,
//! and an outbound loop that owns the write half.
//!
//! Everything sent to a client, including messages relayed from other
//! sessions, goes through that client's bounded outbound queue. Either loop
//! can end the session: the outbound loop on [`Outbound::Close`] or a write
//! that misses the deadline, the inbound loop on EOF, a bad frame or idle
//! timeout. A shared shutdown flag stops the other half, and the inbound
//! loop always deregisters the session on the way out.

use crate::auth::TokenValidator;
use crate::push::{PushPolicy, PushQueue};
use crate::route::RouteRegistry;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use voip_core::control::{self, DialNotification};
use voip_core::messages::*;
use voip_core::{read_message, write_message, VoipError};

/// Capacity of each session's outbound queue. A full queue blocks the
/// producer, which is how a slow reader pushes back on its senders.
pub const OUTBOUND_CAPACITY: usize = 10;

/// Item on a session's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    Message(Message),
    /// Write everything queued before this, then close the connection.
    Close,
}

/// Cheap, cloneable reference to a live session, stored in the route registry.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub appid: i64,
    pub uid: i64,
    tx: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: u64, appid: i64, uid: i64, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, appid, uid, tx }
    }

    /// Queue a message, waiting while the queue is full. Returns false if
    /// the session's outbound loop has already stopped.
    pub async fn send(&self, msg: Message) -> bool {
        self.tx.send(Outbound::Message(msg)).await.is_ok()
    }

    pub async fn close(&self) -> bool {
        self.tx.send(Outbound::Close).await.is_ok()
    }
}

/// Shared collaborators and settings handed to every session.
pub struct SessionContext {
    pub routes: Arc<RouteRegistry>,
    pub validator: Arc<dyn TokenValidator>,
    pub push: Arc<dyn PushQueue>,
    pub push_policy: PushPolicy,
    pub idle_timeout: Duration,
    /// Appid given to legacy uid-only logins.
    pub fallback_appid: i64,
}

#[derive(Debug, Clone)]
struct Identity {
    appid: i64,
    uid: i64,
    device_id: String,
    platform_id: i8,
    authenticated_at: SystemTime,
}

struct Session {
    id: u64,
    ctx: Arc<SessionContext>,
    tx: mpsc::Sender<Outbound>,
    shutdown: Arc<watch::Sender<bool>>,
    public_ip: u32,
    identity: Option<Identity>,
}

/// Serve one connection until the peer disconnects, sends a bad frame, or
/// stays silent longer than the idle timeout.
///
/// `public_ip` is reported to clients in a successful token login.
pub async fn run_session<S>(stream: S, id: u64, public_ip: u32, ctx: Arc<SessionContext>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (shutdown, _) = watch::channel(false);
    let shutdown = Arc::new(shutdown);
    let outbound = tokio::spawn(outbound_loop(
        writer,
        rx,
        shutdown.clone(),
        ctx.idle_timeout,
        id,
    ));

    let mut session = Session {
        id,
        ctx,
        tx,
        shutdown,
        public_ip,
        identity: None,
    };
    session.inbound_loop(reader).await;
    session.teardown().await;

    if let Err(e) = outbound.await {
        warn!(session = id, error = %e, "outbound task failed");
    }
}

/// Writes queued messages until [`Outbound::Close`], a shutdown, or a write
/// that takes longer than `write_timeout`. On exit the queue is closed so
/// producers blocked on it fail instead of waiting, and the shutdown flag is
/// raised so the inbound loop stops reading.
async fn outbound_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    shutdown: Arc<watch::Sender<bool>>,
    write_timeout: Duration,
    id: u64,
) where
    W: AsyncWrite + Unpin,
{
    let mut stopped = shutdown.subscribe();
    let mut seq: i32 = 0;
    loop {
        let item = tokio::select! {
            biased;
            _ = stopped.wait_for(|s| *s) => break,
            item = rx.recv() => item,
        };
        let mut msg = match item {
            Some(Outbound::Message(msg)) => msg,
            Some(Outbound::Close) | None => break,
        };
        seq = seq.wrapping_add(1);
        msg.seq = seq;
        debug!(session = id, seq, cmd = %command_name(msg.command()), "send");
        let written = tokio::select! {
            biased;
            _ = stopped.wait_for(|s| *s) => break,
            written = tokio::time::timeout(write_timeout, write_message(&mut writer, &msg)) => written,
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = id, error = %e, "write failed"),
            Err(_) => {
                warn!(session = id, timeout = ?write_timeout, "write timed out, closing connection");
                break;
            }
        }
    }
    rx.close();
    shutdown.send_replace(true);
    let _ = tokio::time::timeout(write_timeout, writer.shutdown()).await;
    debug!(session = id, "outbound loop stopped");
}

impl Session {
    async fn inbound_loop<R>(&mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut stopped = self.shutdown.subscribe();
        loop {
            let read = tokio::select! {
                biased;
                _ = stopped.wait_for(|s| *s) => {
                    info!(session = self.id, "connection closed by server");
                    return;
                }
                read = tokio::time::timeout(self.ctx.idle_timeout, read_message(&mut reader)) => read,
            };
            let msg = match read {
                Ok(Ok(msg)) => msg,
                Ok(Err(VoipError::Io(e))) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!(session = self.id, "connection closed by peer");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(session = self.id, error = %e, "closing connection");
                    return;
                }
                Err(_) => {
                    info!(session = self.id, timeout = ?self.ctx.idle_timeout, "idle timeout");
                    return;
                }
            };
            debug!(session = self.id, seq = msg.seq, cmd = %command_name(msg.command()), "recv");
            self.dispatch(msg).await;
        }
    }

    async fn dispatch(&mut self, msg: Message) {
        match msg.body {
            Body::Authentication(auth) => self.handle_auth(auth).await,
            Body::AuthenticationToken(login) => self.handle_auth_token(login).await,
            Body::Heartbeat => {}
            Body::Ping => self.enqueue(Body::Pong).await,
            Body::VoipControl(ctl) => self.handle_voip_control(ctl).await,
            other => {
                debug!(session = self.id, cmd = %command_name(other.command()), "ignoring message");
            }
        }
    }

    async fn enqueue(&self, body: Body) {
        if self.tx.send(Outbound::Message(Message::new(body))).await.is_err() {
            debug!(session = self.id, "outbound queue closed");
        }
    }

    fn refuse_reauth(&self) -> bool {
        if let Some(identity) = &self.identity {
            warn!(
                session = self.id,
                appid = identity.appid,
                uid = identity.uid,
                "already authenticated"
            );
            return true;
        }
        false
    }

    async fn handle_auth(&mut self, auth: Authentication) {
        if self.refuse_reauth() {
            self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::failed()))
                .await;
            return;
        }

        let identity = Identity {
            appid: self.ctx.fallback_appid,
            uid: auth.uid,
            device_id: String::new(),
            platform_id: 0,
            authenticated_at: SystemTime::now(),
        };
        info!(session = self.id, appid = identity.appid, uid = identity.uid, "auth");
        self.identity = Some(identity);

        self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::ok(0)))
            .await;
        self.register().await;
    }

    async fn handle_auth_token(&mut self, login: AuthenticationToken) {
        if self.refuse_reauth() {
            self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::failed()))
                .await;
            return;
        }

        let access = match self.ctx.validator.validate(&login.token).await {
            Ok(access) if access.appid != 0 && access.uid != 0 => access,
            Ok(_) => {
                info!(session = self.id, "token auth refused: zero appid or uid");
                self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::failed()))
                    .await;
                return;
            }
            Err(e) => {
                info!(session = self.id, error = %e, "token auth failed");
                self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::failed()))
                    .await;
                return;
            }
        };

        let identity = Identity {
            appid: access.appid,
            uid: access.uid,
            device_id: login.device_id,
            platform_id: login.platform_id,
            authenticated_at: SystemTime::now(),
        };
        info!(
            session = self.id,
            appid = identity.appid,
            uid = identity.uid,
            platform = identity.platform_id,
            device = %identity.device_id,
            "token auth"
        );
        self.identity = Some(identity.clone());

        self.enqueue(Body::AuthenticationStatus(AuthenticationStatus::ok(
            self.public_ip,
        )))
        .await;
        self.send_login_point(&identity).await;
        self.register().await;
    }

    /// Tell the user's already-connected devices about this login.
    async fn send_login_point(&self, identity: &Identity) {
        let up_timestamp = identity
            .authenticated_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(0);
        let point = Message::new(Body::LoginPoint(LoginPoint {
            up_timestamp,
            platform_id: identity.platform_id,
            device_id: identity.device_id.clone(),
        }));
        for other in self
            .ctx
            .routes
            .find_client_set(identity.appid, identity.uid)
            .await
        {
            other.send(point.clone()).await;
        }
    }

    async fn register(&self) {
        let Some(identity) = &self.identity else {
            return;
        };
        let handle = SessionHandle::new(self.id, identity.appid, identity.uid, self.tx.clone());
        for evicted in self.ctx.routes.add_client(handle).await {
            info!(session = evicted.id, by = self.id, uid = evicted.uid, "resetting replaced session");
            evicted.send(Message::new(Body::Reset)).await;
            evicted.close().await;
        }
    }

    async fn handle_voip_control(&self, ctl: VoipControl) {
        let Some(identity) = &self.identity else {
            debug!(session = self.id, "voip control before auth, dropped");
            return;
        };
        let appid = identity.appid;

        let targets = self.ctx.routes.find_client_set(appid, ctl.receiver).await;
        let msg = Message::new(Body::VoipControl(ctl.clone()));
        let mut delivered = false;
        for target in &targets {
            delivered |= target.send(msg.clone()).await;
        }
        if delivered {
            debug!(appid, sender = ctl.sender, receiver = ctl.receiver, sessions = targets.len(), "delivered");
            return;
        }
        self.push_fallback(appid, &ctl).await;
    }

    /// Receiver is offline: queue a push for the first dial attempt only.
    async fn push_fallback(&self, appid: i64, ctl: &VoipControl) {
        if !control::wants_push(&ctl.content) {
            debug!(appid, receiver = ctl.receiver, "receiver offline, dropped");
            return;
        }
        let note = DialNotification {
            sender: ctl.sender,
            receiver: ctl.receiver,
            appid,
        };
        let queue = self.ctx.push_policy.queue_name(appid);
        let result = match note.to_json() {
            Ok(payload) => self.ctx.push.enqueue(&queue, &payload).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => info!(appid, sender = ctl.sender, receiver = ctl.receiver, queue = %queue, "queued dial push"),
            Err(e) => warn!(appid, queue = %queue, error = %e, "push enqueue failed"),
        }
    }

    async fn teardown(&mut self) {
        // Flush what is queued if there is room for the sentinel, otherwise
        // drop it and close now.
        if self.tx.try_send(Outbound::Close).is_err() {
            self.shutdown.send_replace(true);
        }
        if let Some(identity) = self.identity.take() {
            self.ctx
                .routes
                .remove_client(identity.appid, identity.uid, self.id)
                .await;
        }
        info!(session = self.id, "session closed");
    }
}
