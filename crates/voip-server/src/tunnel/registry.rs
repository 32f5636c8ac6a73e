//! Tunnel peer table, indexed by UDP address and by (appid, uid).
//!
//! Both indexes live behind one lock so a sweep never leaves them out of
//! step. Entries are only created by packets, and only removed by sweeps.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// One UDP endpoint seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelClient {
    pub addr: SocketAddr,
    /// `(appid, uid)` once authenticated; `None` while the token is being checked.
    pub identity: Option<(i64, i64)>,
    pub last_seen: Instant,
    /// Peers on the current protocol expect a DATA type byte before relayed media.
    pub has_header: bool,
}

/// Where an address stands with respect to authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unseen,
    Pending,
    Authenticated,
}

struct Inner {
    by_addr: HashMap<SocketAddr, TunnelClient>,
    by_app: HashMap<i64, HashMap<i64, SocketAddr>>,
    last_gc: Instant,
}

impl Inner {
    fn index(&mut self, appid: i64, uid: i64, addr: SocketAddr) {
        self.by_app.entry(appid).or_default().insert(uid, addr);
    }
}

pub struct TunnelRegistry {
    inner: Mutex<Inner>,
}

impl TunnelRegistry {
    /// `now` starts the first sweep interval.
    pub fn new(now: Instant) -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_addr: HashMap::new(),
                by_app: HashMap::new(),
                last_gc: now,
            }),
        }
    }

    /// Record an AUTH from `addr`. An unseen address is inserted as pending
    /// and the caller must validate its token; the previous state is returned.
    /// An AUTH from an authenticated address refreshes it.
    pub async fn begin_auth(&self, addr: SocketAddr, now: Instant) -> AuthState {
        let mut inner = self.inner.lock().await;
        match inner.by_addr.get_mut(&addr) {
            None => {
                inner.by_addr.insert(
                    addr,
                    TunnelClient {
                        addr,
                        identity: None,
                        last_seen: now,
                        has_header: true,
                    },
                );
                AuthState::Unseen
            }
            Some(client) if client.identity.is_none() => AuthState::Pending,
            Some(client) => {
                client.last_seen = now;
                AuthState::Authenticated
            }
        }
    }

    /// Attach a validated identity to a pending address. Returns false if the
    /// address was swept while its token was being checked.
    pub async fn complete_auth(&self, addr: SocketAddr, appid: i64, uid: i64) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(client) = inner.by_addr.get_mut(&addr) else {
            return false;
        };
        client.identity = Some((appid, uid));
        inner.index(appid, uid, addr);
        true
    }

    /// Legacy peers are identified by the sender uid of their first packet.
    pub async fn register_legacy(&self, addr: SocketAddr, appid: i64, uid: i64, now: Instant) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.by_addr.get_mut(&addr) {
            client.last_seen = now;
            return;
        }
        inner.by_addr.insert(
            addr,
            TunnelClient {
                addr,
                identity: Some((appid, uid)),
                last_seen: now,
                has_header: false,
            },
        );
        inner.index(appid, uid, addr);
    }

    /// Route a DATA packet: refresh the sender and find `receiver` within the
    /// sender's appid. Returns the receiver's address and header flag, or
    /// `None` if either side is unknown or the sender is not authenticated.
    pub async fn route_data(
        &self,
        from: SocketAddr,
        receiver: i64,
        now: Instant,
    ) -> Option<(SocketAddr, bool)> {
        let mut inner = self.inner.lock().await;
        let sender = inner.by_addr.get_mut(&from)?;
        let (appid, _) = sender.identity?;
        sender.last_seen = now;

        let to = *inner.by_app.get(&appid)?.get(&receiver)?;
        let peer = inner.by_addr.get(&to)?;
        Some((to, peer.has_header))
    }

    #[cfg(test)]
    pub async fn lookup(&self, addr: SocketAddr) -> Option<TunnelClient> {
        self.inner.lock().await.by_addr.get(&addr).cloned()
    }

    #[cfg(test)]
    pub async fn find_app_client(&self, appid: i64, uid: i64) -> Option<TunnelClient> {
        let inner = self.inner.lock().await;
        let addr = inner.by_app.get(&appid)?.get(&uid)?;
        inner.by_addr.get(addr).cloned()
    }

    /// Sweep if at least `interval` has passed since the last sweep.
    /// Returns the number evicted, or `None` if no sweep ran.
    pub async fn maybe_sweep(
        &self,
        now: Instant,
        interval: Duration,
        timeout: Duration,
    ) -> Option<usize> {
        let mut inner = self.inner.lock().await;
        if now.saturating_duration_since(inner.last_gc) < interval {
            return None;
        }
        Some(sweep_locked(&mut inner, now, timeout))
    }

    /// Evict every client silent for longer than `timeout`.
    pub async fn sweep(&self, now: Instant, timeout: Duration) -> usize {
        let mut inner = self.inner.lock().await;
        sweep_locked(&mut inner, now, timeout)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_addr.len()
    }
}

fn sweep_locked(inner: &mut Inner, now: Instant, timeout: Duration) -> usize {
    let stale: Vec<TunnelClient> = inner
        .by_addr
        .values()
        .filter(|c| now.saturating_duration_since(c.last_seen) > timeout)
        .cloned()
        .collect();

    for client in &stale {
        inner.by_addr.remove(&client.addr);
        let Some((appid, uid)) = client.identity else {
            continue;
        };
        if let Some(uids) = inner.by_app.get_mut(&appid) {
            // The uid may have re-authenticated from a new address since.
            if uids.get(&uid) == Some(&client.addr) {
                uids.remove(&uid);
            }
            if uids.is_empty() {
                inner.by_app.remove(&appid);
            }
        }
    }

    inner.last_gc = now;
    if !stale.is_empty() {
        debug!(count = stale.len(), remaining = inner.by_addr.len(), "tunnel GC evicted idle clients");
    }
    stale.len()
}
