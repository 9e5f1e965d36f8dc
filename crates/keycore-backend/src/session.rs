//! Expiring in-memory sessions for unlocked keys.
//!
//! A session holds secret bytes (a derived encryption key or an encoded
//! key set) in a [`LockedBuffer`] together with a sliding expiry. Every
//! read checks the expiry first: a stale session is wiped, unlocked and
//! removed before the caller is told the key is locked.
//!
//! This store is the only place plaintext key material outlives a
//! single call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use keycore_crypto::memlock::LockedBuffer;
use keycore_types::config::{DEFAULT_SESSION_TIMEOUT, MAX_SESSION_TIMEOUT};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    secret: LockedBuffer,
    expires_at: Instant,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// `now + timeout`, saturating at the capped timeout.
fn expiry(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_SESSION_TIMEOUT))
        .unwrap_or(now)
}

/// Observable state of a live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    /// Whether the OS accepted the memory lock for the secret bytes.
    pub memory_locked: bool,
    /// Instant after which the session is treated as gone.
    pub expires_at: Instant,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

struct Inner {
    timeout: Duration,
    sessions: HashMap<String, Session>,
}

/// Per-backend table of unlocked keys with sliding expiry.
///
/// Readers (`is_active`, `status`) share the lock; anything that
/// touches an expiry takes it exclusively.
pub struct SessionStore {
    inner: RwLock<Inner>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionStore {
    /// Creates an empty store whose sessions expire after `timeout` of
    /// inactivity, clamped to [`MAX_SESSION_TIMEOUT`].
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                timeout: timeout.min(MAX_SESSION_TIMEOUT),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Returns the current inactivity timeout.
    pub async fn timeout(&self) -> Duration {
        self.inner.read().await.timeout
    }

    /// Changes the inactivity timeout. Applies to new sessions and to the
    /// next expiry extension of existing ones. Clamped to
    /// [`MAX_SESSION_TIMEOUT`].
    pub async fn set_timeout(&self, timeout: Duration) {
        self.inner.write().await.timeout = timeout.min(MAX_SESSION_TIMEOUT);
    }

    /// Stores `secret` under `name`, replacing (and wiping) any previous
    /// session. The source vector is zeroed.
    pub async fn set(&self, name: &str, secret: Vec<u8>) -> SessionStatus {
        let secret = LockedBuffer::new(secret);
        let memory_locked = secret.is_locked();
        if !memory_locked {
            tracing::debug!(name = %name, "session secret is not memory-locked");
        }

        let mut inner = self.inner.write().await;
        let expires_at = expiry(Instant::now(), inner.timeout);
        inner
            .sessions
            .insert(name.to_owned(), Session { secret, expires_at });
        tracing::debug!(name = %name, "session started");

        SessionStatus {
            memory_locked,
            expires_at,
        }
    }

    /// Returns a copy of the session secret and pushes the expiry
    /// forward, or `None` if there is no live session.
    ///
    /// An expired session is wiped and removed here.
    pub async fn get(&self, name: &str) -> Option<Zeroizing<Vec<u8>>> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let timeout = inner.timeout;

        let expired = inner.sessions.get(name)?.is_expired(now);
        if expired {
            if let Some(mut session) = inner.sessions.remove(name) {
                session.secret.wipe();
            }
            tracing::info!(name = %name, "session expired, key locked");
            return None;
        }

        let session = inner.sessions.get_mut(name)?;
        session.expires_at = expiry(now, timeout);
        Some(Zeroizing::new(session.secret.as_bytes().to_vec()))
    }

    /// Whether `name` has an unexpired session. Does not extend it.
    pub async fn is_active(&self, name: &str) -> bool {
        self.status(name).await.is_some()
    }

    /// Returns the state of an unexpired session. Does not extend it.
    pub async fn status(&self, name: &str) -> Option<SessionStatus> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(name)?;
        if session.is_expired(Instant::now()) {
            return None;
        }
        Some(SessionStatus {
            memory_locked: session.secret.is_locked(),
            expires_at: session.expires_at,
        })
    }

    /// Wipes and removes the session for `name`. Returns `true` if one
    /// existed.
    pub async fn clear(&self, name: &str) -> bool {
        let removed = self.inner.write().await.sessions.remove(name);
        match removed {
            Some(mut session) => {
                session.secret.wipe();
                tracing::debug!(name = %name, "session cleared");
                true
            }
            None => false,
        }
    }

    /// Wipes and removes every session. Returns how many there were.
    pub async fn clear_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.sessions.len();
        for (_, mut session) in inner.sessions.drain() {
            session.secret.wipe();
        }
        if count > 0 {
            tracing::debug!(count, "all sessions cleared");
        }
        count
    }

    /// Removes every expired session and returns their (already wiped)
    /// buffers.
    pub async fn sweep(&self) -> Vec<LockedBuffer> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(name, _)| name.clone())
            .collect();

        let mut wiped = Vec::with_capacity(expired.len());
        for name in expired {
            if let Some(mut session) = inner.sessions.remove(&name) {
                session.secret.wipe();
                tracing::info!(name = %name, "session expired, key locked");
                wiped.push(session.secret);
            }
        }
        wiped
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Returns `true` if no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
