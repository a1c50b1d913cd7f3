//! Server-side session store
//!
//! Sessions are keyed by a random id held in an HttpOnly cookie. The store is a
//! single `RwLock<HashMap>`: lookups share the read lock (the last-access stamp
//! is atomic), while create, rotate and invalidate take the write lock so each
//! is atomic. Idle expiry is checked on access; expired entries are swept on
//! create once the store is large, at most once per sweep interval.

use oauth2::CsrfToken;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::auth::principal::AuthenticatedPrincipal;

/// Sweep expired entries on create once the store grows past this size
const SWEEP_THRESHOLD: usize = 1024;
/// Minimum time between two sweeps triggered by create
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const NEVER_SWEPT: u64 = u64::MAX;

/// Authorization request waiting for the provider callback
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub nonce: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub csrf_token: String,
    pub principal: Option<AuthenticatedPrincipal>,
    /// Raw ID token, kept as the end-session hint
    pub id_token: Option<String>,
    pub pending_authorization: Option<PendingAuthorization>,
    /// Request URI to resume after login
    pub saved_request: Option<String>,
    pub created_at: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            id: random_token(),
            csrf_token: random_token(),
            principal: None,
            id_token: None,
            pending_authorization: None,
            saved_request: None,
            created_at: Instant::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

/// 32 random bytes, base64url encoded
fn random_token() -> String {
    CsrfToken::new_random_len(32).secret().clone()
}

struct Entry {
    session: Session,
    /// Milliseconds since the store epoch; touched under the read lock
    last_accessed_ms: AtomicU64,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    idle_timeout_ms: u64,
    epoch: Instant,
    last_sweep_ms: AtomicU64,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout_ms: idle_timeout.as_millis() as u64,
            epoch: Instant::now(),
            last_sweep_ms: AtomicU64::new(NEVER_SWEPT),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_expired(&self, entry: &Entry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.last_accessed_ms.load(Ordering::Relaxed)) >= self.idle_timeout_ms
    }

    fn entry(&self, session: Session) -> Entry {
        Entry {
            session,
            last_accessed_ms: AtomicU64::new(self.now_ms()),
        }
    }

    /// Create and store a fresh anonymous session
    pub async fn create(&self) -> Session {
        let session = Session::new();
        let now = self.now_ms();
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= SWEEP_THRESHOLD && self.sweep_due(now) {
            self.sweep_locked(&mut sessions, now);
        }
        sessions.insert(session.id.clone(), self.entry(session.clone()));
        tracing::debug!(total_sessions = sessions.len(), "Session created");
        session
    }

    /// Remove every expired session; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let now = self.now_ms();
        let mut sessions = self.sessions.write().await;
        self.sweep_locked(&mut sessions, now)
    }

    fn sweep_due(&self, now_ms: u64) -> bool {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        last == NEVER_SWEPT || now_ms.saturating_sub(last) >= SWEEP_INTERVAL.as_millis() as u64
    }

    fn sweep_locked(&self, sessions: &mut HashMap<String, Entry>, now_ms: u64) -> usize {
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now_ms));
        self.last_sweep_ms.store(now_ms, Ordering::Relaxed);
        let removed = before - sessions.len();
        tracing::debug!(
            removed,
            remaining = sessions.len(),
            "Swept expired sessions"
        );
        removed
    }

    /// Look up a live session and refresh its last-access time
    pub async fn get(&self, id: &str) -> Option<Session> {
        let now = self.now_ms();
        {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(id)?;
            if !self.is_expired(entry, now) {
                entry.last_accessed_ms.store(now, Ordering::Relaxed);
                return Some(entry.session.clone());
            }
        } // Lock is dropped here

        let mut sessions = self.sessions.write().await;
        let still_expired = sessions
            .get(id)
            .is_some_and(|entry| self.is_expired(entry, self.now_ms()));
        if still_expired {
            sessions.remove(id);
            tracing::debug!("Expired session removed on access");
        }
        None
    }

    /// Apply a change to a live session; returns the updated copy
    pub async fn update<F>(&self, id: &str, change: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let now = self.now_ms();
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        if self.is_expired(entry, now) {
            return None;
        }
        change(&mut entry.session);
        entry.last_accessed_ms.store(now, Ordering::Relaxed);
        Some(entry.session.clone())
    }

    /// Bind a principal to the session under a new id (session fixation protection).
    ///
    /// The old id stops resolving; the CSRF token is regenerated.
    pub async fn authenticate(
        &self,
        id: &str,
        principal: AuthenticatedPrincipal,
        id_token: Option<String>,
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let mut session = sessions.remove(id)?.session;
        session.id = random_token();
        session.csrf_token = random_token();
        session.principal = Some(principal);
        session.id_token = id_token;
        session.pending_authorization = None;
        sessions.insert(session.id.clone(), self.entry(session.clone()));
        Some(session)
    }

    /// Destroy a session; returns it if it existed
    pub async fn invalidate(&self, id: &str) -> Option<Session> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|entry| entry.session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
