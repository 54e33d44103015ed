//! PIN-gated privileged execution.
//!
//! [`SecurityContext`] wires the credential store, lockout tracker, session
//! manager and event log together and implements the entry points used by
//! privileged commands.

use parking_lot::Mutex;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::audit::{AuditAction, SecurityLog};
use super::credential::{Argon2Hasher, CredentialStore, PinHasher};
use super::error::{Result, SecurityError};
use super::lockout::{DEFAULT_LOCKOUT_WINDOW, DEFAULT_MAX_ATTEMPTS, LockoutTracker};
use super::sanitize::parse_env_number;
use super::session::{DEFAULT_SESSION_TIMEOUT, SessionId, SessionManager};

pub const ENV_SESSION_TIMEOUT: &str = "I18NTK_SESSION_TIMEOUT";
pub const ENV_MAX_ATTEMPTS: &str = "I18NTK_MAX_ATTEMPTS";
pub const ENV_LOCKOUT_WINDOW: &str = "I18NTK_LOCKOUT_WINDOW";

const MIN_DURATION_SECS: u64 = 10;
const MAX_DURATION_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_timeout: Duration,
    pub max_attempts: u32,
    pub lockout_window: Duration,
    pub cleanup_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl AuthSettings {
    /// Apply `I18NTK_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Invalid values are ignored
    /// with a warning.
    pub fn with_overrides_from(mut self, env: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str, min: u64, max: u64| -> Option<u64> {
            let raw = env(key)?;
            let parsed = parse_env_number(&raw, min, max);
            if parsed.is_none() {
                warn!("Ignoring {}: expected a number in {}..={}", key, min, max);
            }
            parsed
        };

        if let Some(secs) = read(ENV_SESSION_TIMEOUT, MIN_DURATION_SECS, MAX_DURATION_SECS) {
            self.session_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = read(ENV_MAX_ATTEMPTS, 1, 20) {
            self.max_attempts = n as u32;
        }
        if let Some(secs) = read(ENV_LOCKOUT_WINDOW, MIN_DURATION_SECS, MAX_DURATION_SECS) {
            self.lockout_window = Duration::from_secs(secs);
        }
        self
    }
}

/// Outcome of one PIN verification round.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub locked: bool,
    pub remaining_attempts: u32,
    pub retry_after: Option<Duration>,
    /// Set iff `success`.
    pub session: Option<SessionId>,
}

/// Passed to a PIN source before each attempt.
#[derive(Debug, Clone, Copy)]
pub struct PinPrompt {
    /// Zero-based attempt number within this authentication.
    pub attempt: u32,
    pub remaining_attempts: u32,
}

pub struct SecurityContext {
    credentials: CredentialStore,
    lockout: Arc<LockoutTracker>,
    sessions: Arc<SessionManager>,
    log: Arc<SecurityLog>,
    settings: AuthSettings,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    /// Live [`AuthScope`]s; the last one to drop tears the context down.
    scopes: AtomicUsize,
    closed: AtomicBool,
}

impl SecurityContext {
    /// Context backed by the default Argon2id hasher.
    pub fn open(credential_dir: &Path, settings: AuthSettings, log: Arc<SecurityLog>) -> Result<Self> {
        Self::with_hasher(
            credential_dir,
            settings,
            Arc::new(Argon2Hasher::default()),
            log,
        )
    }

    pub fn with_hasher(
        credential_dir: &Path,
        settings: AuthSettings,
        hasher: Arc<dyn PinHasher>,
        log: Arc<SecurityLog>,
    ) -> Result<Self> {
        let credentials = CredentialStore::open(credential_dir, hasher, log.clone())?;
        let lockout = Arc::new(LockoutTracker::new(
            settings.max_attempts,
            settings.lockout_window,
        ));
        let sessions = Arc::new(SessionManager::new(settings.session_timeout, log.clone()));

        Ok(Self {
            credentials,
            lockout,
            sessions,
            log,
            settings,
            cleanup: Mutex::new(None),
            scopes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn log(&self) -> &Arc<SecurityLog> {
        &self.log
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// A PIN is configured and enabled. Always true once the context is
    /// closed, since the purged cache no longer says otherwise.
    pub fn is_auth_required(&self) -> bool {
        self.is_closed() || self.credentials.is_enabled()
    }

    /// Torn down; every entry point refuses.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// One verification round for `caller_id`, honoring the lockout.
    ///
    /// The attempt is reserved before the PIN is hashed, so concurrent
    /// rounds for one caller cannot get past `max_attempts`.
    pub fn prompt_and_verify(&self, pin: &str, caller_id: &str) -> AuthResult {
        if self.is_closed() {
            warn!("Refusing PIN verification for {}: context closed", caller_id);
            return AuthResult {
                success: false,
                locked: false,
                remaining_attempts: 0,
                retry_after: None,
                session: None,
            };
        }

        self.lockout.prune();

        let Some(attempt) = self.lockout.try_begin_attempt(caller_id) else {
            self.log.record(
                AuditAction::LockedOut,
                "auth",
                Some(caller_id),
                Some("attempt while locked"),
            );
            return AuthResult {
                success: false,
                locked: true,
                remaining_attempts: 0,
                retry_after: self.lockout.retry_after(caller_id),
                session: None,
            };
        };

        if self.credentials.verify(pin) {
            attempt.succeed();
            let session = self.sessions.create_session();
            info!("Authenticated {}", caller_id);
            self.log
                .record(AuditAction::AuthSucceeded, "auth", Some(caller_id), None);
            return AuthResult {
                success: true,
                locked: false,
                remaining_attempts: self.lockout.max_attempts(),
                retry_after: None,
                session: Some(session.id),
            };
        }

        let count = attempt.fail();
        let remaining = self.lockout.max_attempts().saturating_sub(count);
        let locked = remaining == 0;
        warn!(
            "PIN verification failed for {} ({} attempt(s) remaining)",
            caller_id, remaining
        );
        self.log.record(
            AuditAction::AuthFailed,
            "auth",
            Some(caller_id),
            Some(&format!("{} remaining", remaining)),
        );
        if locked {
            self.log
                .record(AuditAction::LockedOut, "auth", Some(caller_id), None);
        }

        AuthResult {
            success: false,
            locked,
            remaining_attempts: remaining,
            retry_after: if locked {
                self.lockout.retry_after(caller_id)
            } else {
                None
            },
            session: None,
        }
    }

    /// Run `f` inside an authenticated session.
    ///
    /// Reuses the current session when it is still valid; otherwise asks
    /// `pin_source` for PINs until one verifies, the caller is locked out,
    /// or the source returns `None`. When no PIN is configured, `f` runs
    /// directly. A closed context never runs `f`. The session's activity
    /// time is refreshed when `f` returns, fails, or unwinds.
    pub fn with_authenticated_session<T, E, P, F>(
        &self,
        caller_id: &str,
        mut pin_source: P,
        f: F,
    ) -> std::result::Result<T, E>
    where
        P: FnMut(PinPrompt) -> Option<Zeroizing<String>>,
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<SecurityError>,
    {
        if self.is_closed() {
            warn!("Refusing privileged operation for {}: context closed", caller_id);
            return Err(SecurityError::ContextClosed.into());
        }
        if !self.is_auth_required() {
            debug!("No admin PIN configured; running without authentication");
            return f();
        }

        let id = match self.sessions.current_session() {
            Some(id) if self.sessions.validate_session(&id) => id,
            _ => self.authenticate(caller_id, &mut pin_source)?,
        };

        let _touch = SessionTouch {
            sessions: &self.sessions,
            id,
        };
        f()
    }

    fn authenticate<P>(&self, caller_id: &str, pin_source: &mut P) -> Result<SessionId>
    where
        P: FnMut(PinPrompt) -> Option<Zeroizing<String>>,
    {
        let mut prompt = PinPrompt {
            attempt: 0,
            remaining_attempts: self.lockout.remaining_attempts(caller_id),
        };

        loop {
            if self.is_closed() {
                return Err(SecurityError::ContextClosed);
            }
            if self.lockout.is_locked_out(caller_id) {
                return Err(self.lockout_error(caller_id));
            }

            let Some(pin) = pin_source(prompt) else {
                return Err(SecurityError::AuthenticationCancelled);
            };

            let result = self.prompt_and_verify(&pin, caller_id);
            if let Some(id) = result.session {
                return Ok(id);
            }
            if result.locked {
                return Err(self.lockout_error(caller_id));
            }

            prompt.attempt += 1;
            prompt.remaining_attempts = result.remaining_attempts;
        }
    }

    fn lockout_error(&self, caller_id: &str) -> SecurityError {
        let retry_after = self
            .lockout
            .retry_after(caller_id)
            .unwrap_or(self.settings.lockout_window);
        SecurityError::Lockout {
            retry_after_secs: retry_after.as_secs().max(1),
        }
    }

    /// Start background maintenance and return a guard. Scopes nest; the
    /// context is torn down when the last one drops.
    pub fn enter(self: &Arc<Self>) -> AuthScope {
        self.scopes.fetch_add(1, Ordering::SeqCst);
        let mut cleanup = self.cleanup.lock();
        if cleanup.is_none() && !self.is_closed() {
            if tokio::runtime::Handle::try_current().is_ok() {
                let lockout = Arc::downgrade(&self.lockout);
                let handle =
                    self.sessions
                        .spawn_cleanup_with(self.settings.cleanup_interval, move || {
                            if let Some(lockout) = lockout.upgrade() {
                                let pruned = lockout.prune();
                                if pruned > 0 {
                                    debug!("Lockout sweep dropped {} caller(s)", pruned);
                                }
                            }
                        });
                *cleanup = Some(handle);
            } else {
                debug!("No tokio runtime; sweeps run on validation only");
            }
        }
        AuthScope { ctx: self.clone() }
    }

    /// Stop the sweep, drop every session and wipe cached credentials.
    /// The context stays closed afterwards.
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
        let cleared = self.sessions.clear_all();
        self.credentials.purge_secrets();
        debug!("Security context torn down ({} session(s) cleared)", cleared);
    }
}

/// Refreshes a session's activity time on every exit path.
struct SessionTouch<'a> {
    sessions: &'a SessionManager,
    id: SessionId,
}

impl Drop for SessionTouch<'_> {
    fn drop(&mut self) {
        self.sessions.validate_session(&self.id);
    }
}

/// Scoped access to a [`SecurityContext`]; the last live scope tears it
/// down on drop.
pub struct AuthScope {
    ctx: Arc<SecurityContext>,
}

impl Deref for AuthScope {
    type Target = SecurityContext;

    fn deref(&self) -> &SecurityContext {
        &self.ctx
    }
}

impl Drop for AuthScope {
    fn drop(&mut self) {
        if self.ctx.scopes.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.ctx.teardown();
        }
    }
}
