//! Authenticated sessions: Unauthenticated -> Active -> (Expired | Cleared).
//!
//! A session is valid while `now - last_activity < timeout`, measured on the
//! monotonic clock. Ids are minted here from a process-wide sequence and 256
//! random bits; callers can never choose one.
//!
//! Locking: the map sits behind an `RwLock` and every entry behind its own
//! `Mutex`, so validations of different ids only share the read lock. The
//! expiry sweep snapshots under the read lock and takes the write lock once
//! per eviction.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use super::audit::{AuditAction, SecurityLog, hex_encode};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const ID_RANDOM_BYTES: usize = 32;

const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(10);

/// Opaque session token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, non-secret label for logs.
    pub fn label(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", self.label())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

struct SessionEntry {
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    last_activity: Instant,
}

impl SessionEntry {
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_activity_at = Utc::now();
    }
}

pub struct SessionManager {
    timeout: Duration,
    sessions: RwLock<HashMap<SessionId, Mutex<SessionEntry>>>,
    current: Mutex<Option<SessionId>>,
    sequence: AtomicU64,
    log: Arc<SecurityLog>,
}

impl SessionManager {
    pub fn new(timeout: Duration, log: Arc<SecurityLog>) -> Self {
        Self {
            timeout,
            sessions: RwLock::new(HashMap::new()),
            current: Mutex::new(None),
            sequence: AtomicU64::new(1),
            log,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn mint_id(&self) -> SessionId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut random = [0u8; ID_RANDOM_BYTES];
        rand::rng().fill(&mut random);
        SessionId(format!("{:016x}{}", seq, hex_encode(&random)))
    }

    /// Start a session and make it the current one.
    pub fn create_session(&self) -> Session {
        let id = self.mint_id();
        let now = Utc::now();
        let entry = SessionEntry {
            started_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
        };
        self.sessions.write().insert(id.clone(), Mutex::new(entry));
        *self.current.lock() = Some(id.clone());

        debug!("Created session {}", id.label());
        self.log.record(
            AuditAction::SessionCreated,
            "session",
            Some(id.label()),
            None,
        );

        Session {
            id,
            started_at: now,
            last_activity_at: now,
        }
    }

    /// Older callers passed an id of their choosing. It is ignored.
    #[deprecated(note = "session ids are always generated; use `create_session`")]
    pub fn create_session_with_hint(&self, _hint: &str) -> Session {
        self.create_session()
    }

    /// `true` iff the session exists and has not expired. Refreshes its
    /// activity time on success; an expired entry is evicted.
    pub fn validate_session(&self, id: &SessionId) -> bool {
        let now = Instant::now();
        {
            let map = self.sessions.read();
            let Some(entry) = map.get(id) else {
                return false;
            };
            let mut entry = entry.lock();
            if !entry.is_expired(now, self.timeout) {
                entry.touch(now);
                return true;
            }
        }
        self.evict_if_expired(id);
        false
    }

    fn is_active(&self, id: &SessionId) -> bool {
        let now = Instant::now();
        self.sessions
            .read()
            .get(id)
            .is_some_and(|entry| !entry.lock().is_expired(now, self.timeout))
    }

    /// Current session id, if it is still valid. Does not refresh it.
    pub fn current_session(&self) -> Option<SessionId> {
        let id = self.current.lock().clone()?;
        self.is_active(&id).then_some(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let map = self.sessions.read();
        let entry = map.get(id)?.lock();
        Some(Session {
            id: id.clone(),
            started_at: entry.started_at,
            last_activity_at: entry.last_activity_at,
        })
    }

    /// Remove the current session. Returns whether one was removed.
    pub fn clear_current_session(&self) -> bool {
        let Some(id) = self.current.lock().take() else {
            return false;
        };
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            debug!("Cleared session {}", id.label());
            self.log.record(
                AuditAction::SessionCleared,
                "session",
                Some(id.label()),
                None,
            );
        }
        removed
    }

    fn evict_if_expired(&self, id: &SessionId) -> bool {
        let now = Instant::now();
        let removed = {
            let mut map = self.sessions.write();
            let expired = map
                .get(id)
                .is_some_and(|entry| entry.lock().is_expired(now, self.timeout));
            expired && map.remove(id).is_some()
        };
        if !removed {
            return false;
        }

        {
            let mut current = self.current.lock();
            if current.as_ref() == Some(id) {
                *current = None;
            }
        }
        debug!("Session {} expired", id.label());
        self.log.record(
            AuditAction::SessionExpired,
            "session",
            Some(id.label()),
            None,
        );
        true
    }

    /// Evict every expired session. Returns the number evicted.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.lock().is_expired(now, self.timeout))
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .iter()
            .filter(|id| self.evict_if_expired(id))
            .count()
    }

    /// Drop every session. Returns the number dropped.
    pub fn clear_all(&self) -> usize {
        self.current.lock().take();
        let drained: Vec<SessionId> = self.sessions.write().drain().map(|(id, _)| id).collect();
        for id in &drained {
            self.log.record(
                AuditAction::SessionCleared,
                "session",
                Some(id.label()),
                Some("teardown"),
            );
        }
        drained.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    /// Run the expiry sweep every `interval` on the tokio runtime. The task
    /// stops by itself once the manager is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        self.spawn_cleanup_with(interval, || {})
    }

    /// Same as [`spawn_cleanup`](Self::spawn_cleanup), also running `also`
    /// after every sweep.
    pub fn spawn_cleanup_with<F>(self: &Arc<Self>, interval: Duration, mut also: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let manager: Weak<Self> = Arc::downgrade(self);
        // tokio::time::interval panics on a zero period.
        let period = interval.max(MIN_CLEANUP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let evicted = manager.cleanup_expired_sessions();
                if evicted > 0 {
                    debug!("Session sweep evicted {} session(s)", evicted);
                }
                also();
            }
        })
    }
}
