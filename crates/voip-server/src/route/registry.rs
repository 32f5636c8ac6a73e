//! Route registry: appid -> uid -> live sessions.
//!
//! Each application has its own table behind its own lock, so traffic in one
//! application never waits on another. The top-level map is only written when
//! an application is seen for the first time.

use super::LoginPolicy;
use crate::session::SessionHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Sessions of one application, keyed by uid then by session id.
pub struct AppRoute {
    appid: i64,
    clients: Mutex<HashMap<i64, HashMap<u64, SessionHandle>>>,
}

impl AppRoute {
    fn new(appid: i64) -> Self {
        Self {
            appid,
            clients: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn appid(&self) -> i64 {
        self.appid
    }

    /// Insert a session. Under [`LoginPolicy::Single`] every other session of
    /// the same uid is removed and returned so the caller can reset it.
    pub async fn add_client(&self, handle: SessionHandle, policy: LoginPolicy) -> Vec<SessionHandle> {
        let mut clients = self.clients.lock().await;
        let set = clients.entry(handle.uid).or_default();

        let evicted: Vec<SessionHandle> = match policy {
            LoginPolicy::Multi => Vec::new(),
            LoginPolicy::Single => {
                let others: Vec<u64> = set.keys().copied().filter(|id| *id != handle.id).collect();
                others.iter().filter_map(|id| set.remove(id)).collect()
            }
        };

        if set.insert(handle.id, handle.clone()).is_some() {
            warn!(appid = self.appid, uid = handle.uid, session = handle.id, "session registered twice");
        }
        evicted
    }

    /// Remove a session. Returns false if it was not registered.
    pub async fn remove_client(&self, uid: i64, session_id: u64) -> bool {
        let mut clients = self.clients.lock().await;
        let Some(set) = clients.get_mut(&uid) else {
            return false;
        };
        let removed = set.remove(&session_id).is_some();
        if set.is_empty() {
            clients.remove(&uid);
        }
        removed
    }

    /// Copy of the sessions for `uid`, safe to use after the lock is released.
    pub async fn find_client_set(&self, uid: i64) -> Vec<SessionHandle> {
        let clients = self.clients.lock().await;
        clients
            .get(&uid)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn contains_uid(&self, uid: i64) -> bool {
        self.clients.lock().await.contains_key(&uid)
    }

    pub async fn session_count(&self) -> usize {
        self.clients.lock().await.values().map(HashMap::len).sum()
    }
}

/// Process-wide directory of authenticated sessions.
pub struct RouteRegistry {
    apps: RwLock<HashMap<i64, Arc<AppRoute>>>,
    policy: LoginPolicy,
}

impl RouteRegistry {
    pub fn new(policy: LoginPolicy) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub async fn find_app_route(&self, appid: i64) -> Option<Arc<AppRoute>> {
        self.apps.read().await.get(&appid).cloned()
    }

    /// Table for `appid`, created on first use.
    pub async fn find_or_add_app_route(&self, appid: i64) -> Arc<AppRoute> {
        if let Some(route) = self.find_app_route(appid).await {
            return route;
        }
        let mut apps = self.apps.write().await;
        apps.entry(appid)
            .or_insert_with(|| {
                debug!(appid, "created app route");
                Arc::new(AppRoute::new(appid))
            })
            .clone()
    }

    /// Register a session under its (appid, uid). Returns sessions evicted by
    /// the single sign-on policy; they are already out of the registry.
    pub async fn add_client(&self, handle: SessionHandle) -> Vec<SessionHandle> {
        let route = self.find_or_add_app_route(handle.appid).await;
        let evicted = route.add_client(handle.clone(), self.policy).await;
        if !evicted.is_empty() {
            info!(
                appid = handle.appid,
                uid = handle.uid,
                count = evicted.len(),
                "evicted previous sessions"
            );
        }
        evicted
    }

    /// Deregister a session. Removing an absent session is a logged no-op.
    pub async fn remove_client(&self, appid: i64, uid: i64, session_id: u64) -> bool {
        let removed = match self.find_app_route(appid).await {
            Some(route) => route.remove_client(uid, session_id).await,
            None => false,
        };
        if !removed {
            warn!(appid, uid, session = session_id, "session not in route registry");
        }
        removed
    }

    /// Snapshot of the live sessions for (appid, uid). Empty means no route.
    pub async fn find_client_set(&self, appid: i64, uid: i64) -> Vec<SessionHandle> {
        match self.find_app_route(appid).await {
            Some(route) => route.find_client_set(uid).await,
            None => Vec::new(),
        }
    }

    pub async fn is_online(&self, appid: i64, uid: i64) -> bool {
        match self.find_app_route(appid).await {
            Some(route) => route.contains_uid(uid).await,
            None => false,
        }
    }

    /// Total registered sessions across all applications.
    pub async fn session_count(&self) -> usize {
        let routes: Vec<Arc<AppRoute>> = self.apps.read().await.values().cloned().collect();
        let mut total = 0;
        for route in routes {
            total += route.session_count().await;
        }
        total
    }
}
