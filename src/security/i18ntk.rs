//! # i18ntk Security Module
//!
//! Front door for the local trust boundary. Every security-relevant type,
//! constant and function is re-exported here; the submodules stay private.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                 auth.rs — SecurityContext                         │
//! │   is_auth_required · prompt_and_verify · with_authenticated_session│
//! ├──────────────────┬────────────────┬───────────────────────────────┤
//! │  credential.rs   │  lockout.rs    │  session.rs                   │
//! │  Argon2id PIN    │  Failed tries  │  Server-minted ids,           │
//! │  record (0600)   │  per caller    │  idle timeout, sweep          │
//! ├──────────────────┴────────────────┴───────────────────────────────┤
//! │  safe_fs.rs — bounded reads, atomic writes, idempotent deletes    │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  sandbox.rs — canonical boundary, traversal and symlink checks    │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  sanitize.rs — allow-lists   │  audit.rs — hash-chained event log │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! 1. **Confined I/O**: every file the tool touches is resolved through a
//!    [`PathSandbox`]. Parent traversal, absolute paths outside the root
//!    and symlinks are rejected, and the rejection is recorded.
//!
//! 2. **Fail closed**: a corrupted credential file reads as "not
//!    configured", a hash failure as a wrong PIN, a missing session as
//!    unauthenticated, and a torn-down context refuses every entry point.
//!    No failure falls back to an unguarded call.
//!
//! 3. **Brute-force bounded**: after `max_attempts` failures inside the
//!    lockout window a caller is refused until the window slides. Slots
//!    are reserved before hashing, so parallel guesses count too.
//!
//! 4. **Short-lived sessions**: sessions expire after a period of
//!    inactivity and are cleared, together with cached credential
//!    material, when the last [`AuthScope`] is dropped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use i18ntk::security::{AuthSettings, SecurityContext, SecurityLog};
//!
//! let log = Arc::new(SecurityLog::from_config(&state_dir, config.security.audit_log));
//! let ctx = Arc::new(SecurityContext::open(&credential_dir, settings, log)?);
//! let scope = ctx.enter();
//!
//! scope.with_authenticated_session("cli:alice", prompt_for_pin, || {
//!     sandboxed_delete("reports", &project_root)?;
//!     Ok::<_, anyhow::Error>(())
//! })?;
//! ```
//!
//! ## File Hierarchy
//!
//! ```text
//! $I18NTK_DATA_DIR/security/          # 0700
//! ├── admin-pin.json                  # CredentialRecord (0600)
//! └── admin-pin.lock                  # fs2 advisory lock
//! $I18NTK_STATE_DIR/
//! └── security-events.jsonl           # Opt-in audit log (0600)
//! ```
//!
//! ## Threat Model
//!
//! | Threat | Defense Layer |
//! |--------|--------------|
//! | `../` or absolute path in a config value | Sandbox resolution |
//! | Symlink planted inside the project | Symlinks distrusted by default |
//! | Oversized file exhausting memory | Read limit checked before and during read |
//! | Crash during a write | Temp file + rename |
//! | PIN guessing | Lockout window, memory-hard hash |
//! | Timing side channel on compare | Constant-time equality |
//! | Attacker-chosen session id | Ids minted server-side only |
//! | Audit log edited after the fact | SHA-256 hash chain |

// ── Errors ──────────────────────────────────────────────────────────

pub use super::error::{Result, SecurityError};

// ── Path Sandbox ────────────────────────────────────────────────────

pub use super::sandbox::{PathSandbox, ResolveOptions, resolve};

// ── Safe File Operations ────────────────────────────────────────────

pub use super::safe_fs::{
    DEFAULT_MAX_READ_BYTES, EntryKind, FileStat, ListOptions, ListedEntry, PRIVATE_DIR_MODE,
    PRIVATE_FILE_MODE, SafeFs, StagedWrite, ensure_private_dir, sandboxed_delete, sandboxed_list,
    sandboxed_read, sandboxed_write,
};

// ── Sanitizer ───────────────────────────────────────────────────────

pub use super::sanitize::{
    Charset, ConfigField, FieldKind, lookup_field, parse_env_number, parse_env_pin, sanitize,
    validate_args, validate_config, validate_field,
};

// ── Credentials ─────────────────────────────────────────────────────

pub use super::credential::{
    Argon2Hasher, CREDENTIAL_FILENAME, CredentialRecord, CredentialState, CredentialStore,
    CredentialSummary, MAX_PIN_LEN, MIN_PIN_LEN, PinHasher, is_valid_pin_format, is_weak_pin,
};

// ── Lockout & Sessions ──────────────────────────────────────────────

pub use super::lockout::{
    AttemptGuard, DEFAULT_LOCKOUT_WINDOW, DEFAULT_MAX_ATTEMPTS, LockoutTracker,
};
pub use super::session::{DEFAULT_SESSION_TIMEOUT, Session, SessionId, SessionManager};

// ── Authentication ──────────────────────────────────────────────────

pub use super::auth::{
    AuthResult, AuthScope, AuthSettings, ENV_LOCKOUT_WINDOW, ENV_MAX_ATTEMPTS,
    ENV_SESSION_TIMEOUT, PinPrompt, SecurityContext,
};

// ── Audit Log ───────────────────────────────────────────────────────

pub use super::audit::{
    AUDIT_FILENAME, AuditAction, AuditEntry, SecurityLog, audit_file_path, read_audit_log,
    verify_audit_chain,
};

// ── Constants ───────────────────────────────────────────────────────

/// Environment variable holding a pre-seeded admin PIN.
pub const ENV_ADMIN_PIN: &str = "I18NTK_ADMIN_PIN";
