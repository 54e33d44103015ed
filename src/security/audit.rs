//! Security event log: structured tracing plus an opt-in, hash-chained
//! JSONL audit trail.
//!
//! Every event is emitted as a `tracing` record under the
//! `i18ntk::security` target. When the audit trail is enabled
//! (`security.audit_log = true`) the event is also appended to
//! `<state_dir>/security-events.jsonl`.
//!
//! # Format
//!
//! One JSON object per line:
//!
//! | Field | Description |
//! |-------|-------------|
//! | `ts` | RFC 3339 timestamp |
//! | `action` | `auth_failed`, `sandbox_violation`, `session_created`, ... |
//! | `source` | Component that reported it: `credentials`, `safe_fs`, ... |
//! | `subject` | Caller id, path, or config key the event concerns |
//! | `detail` | Free-form context |
//! | `prev_entry_sha256` | SHA-256 of the previous line (chain link) |
//!
//! The first entry links to 64 zeros. A corrupted last line is recorded
//! with a `chain_recovery` entry before the next append. Writes go through
//! [`SafeFs`] rooted at the state directory and are serialized in-process
//! by a mutex and across processes by an advisory lock. Failures to write
//! the trail are logged and swallowed; they never fail the operation being
//! audited.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{Result, SecurityError};
use super::safe_fs::{PRIVATE_FILE_MODE, SafeFs, ensure_private_dir};
use crate::concurrency::FileLock;

pub const AUDIT_FILENAME: &str = "security-events.jsonl";
const AUDIT_LOCK_FILENAME: &str = "security-events.lock";

/// The log can grow well past the default read limit.
const AUDIT_MAX_READ_BYTES: u64 = 64 * 1024 * 1024;

/// How much of the log's end is read to find the chain head. Entries are
/// far smaller; a longer last line is treated as corrupted.
const CHAIN_TAIL_BYTES: u64 = 64 * 1024;

/// The hash used for the first entry in the chain (no predecessor).
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    pub action: AuditAction,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub prev_entry_sha256: String,
}

/// Security actions recorded in the log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A new PIN was stored.
    PinSetup,
    /// PIN setup refused (bad format).
    PinSetupRejected,
    PinDisabled,
    PinEnabled,
    AuthSucceeded,
    AuthFailed,
    /// Attempt refused because the caller is locked out.
    LockedOut,
    SessionCreated,
    SessionExpired,
    SessionCleared,
    /// A path was rejected by the sandbox.
    SandboxViolation,
    /// A read was refused because the file exceeds the size limit.
    FileTooLarge,
    /// A CLI argument key was not on the allow-list.
    ArgDropped,
    /// A config key was not in the schema.
    ConfigKeyDropped,
    /// A config value failed its field validator.
    ConfigValueRejected,
    /// The credential file exists but could not be loaded.
    CredentialCorrupted,
    /// Previous audit entry corrupted, new chain segment started.
    ChainRecovery,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PinSetup => "pin_setup",
            AuditAction::PinSetupRejected => "pin_setup_rejected",
            AuditAction::PinDisabled => "pin_disabled",
            AuditAction::PinEnabled => "pin_enabled",
            AuditAction::AuthSucceeded => "auth_succeeded",
            AuditAction::AuthFailed => "auth_failed",
            AuditAction::LockedOut => "locked_out",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionExpired => "session_expired",
            AuditAction::SessionCleared => "session_cleared",
            AuditAction::SandboxViolation => "sandbox_violation",
            AuditAction::FileTooLarge => "file_too_large",
            AuditAction::ArgDropped => "arg_dropped",
            AuditAction::ConfigKeyDropped => "config_key_dropped",
            AuditAction::ConfigValueRejected => "config_value_rejected",
            AuditAction::CredentialCorrupted => "credential_corrupted",
            AuditAction::ChainRecovery => "chain_recovery",
        }
    }

    /// Actions that indicate a denial or tampering rather than routine use.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            AuditAction::AuthFailed
                | AuditAction::LockedOut
                | AuditAction::SandboxViolation
                | AuditAction::FileTooLarge
                | AuditAction::CredentialCorrupted
                | AuditAction::ChainRecovery
                | AuditAction::PinSetupRejected
        )
    }
}

/// Shared handle to the security event log.
pub struct SecurityLog {
    sink: Option<LogSink>,
}

struct LogSink {
    fs: SafeFs,
    file: PathBuf,
    lock: FileLock,
    write_guard: Mutex<()>,
}

impl std::fmt::Debug for SecurityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLog")
            .field("file", &self.path())
            .finish()
    }
}

impl SecurityLog {
    /// Tracing-only log; no audit file is written.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Log with the audit trail enabled under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        ensure_private_dir(state_dir)?;
        let fs = SafeFs::open(state_dir, Arc::new(SecurityLog::disabled()))?
            .with_max_read_bytes(AUDIT_MAX_READ_BYTES)
            .with_file_mode(PRIVATE_FILE_MODE);
        let file = fs.resolve(AUDIT_FILENAME)?;
        let lock = FileLock::new(fs.resolve(AUDIT_LOCK_FILENAME)?);

        Ok(Self {
            sink: Some(LogSink {
                fs,
                file,
                lock,
                write_guard: Mutex::new(()),
            }),
        })
    }

    /// Build the log from configuration. An audit trail that cannot be
    /// opened degrades to tracing-only with a warning.
    pub fn from_config(state_dir: &Path, enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        match Self::open(state_dir) {
            Ok(log) => log,
            Err(e) => {
                warn!("Security audit log unavailable ({}); continuing without it", e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Path of the audit file, if the trail is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.file.as_path())
    }

    /// Record a security event.
    pub fn record(
        &self,
        action: AuditAction,
        source: &str,
        subject: Option<&str>,
        detail: Option<&str>,
    ) {
        let subject_field = subject.unwrap_or("");
        let detail_field = detail.unwrap_or("");
        if action.is_alert() {
            warn!(
                target: "i18ntk::security",
                action = action.as_str(),
                source,
                subject = subject_field,
                "{}",
                detail_field
            );
        } else {
            info!(
                target: "i18ntk::security",
                action = action.as_str(),
                source,
                subject = subject_field,
                "{}",
                detail_field
            );
        }

        if let Some(ref sink) = self.sink
            && let Err(e) = sink.append(action, source, subject, detail)
        {
            warn!("Failed to append security audit entry: {}", e);
        }
    }
}

impl LogSink {
    fn append(
        &self,
        action: AuditAction,
        source: &str,
        subject: Option<&str>,
        detail: Option<&str>,
    ) -> Result<()> {
        let _thread_guard = self.write_guard.lock();
        let _process_guard = self
            .lock
            .acquire()
            .map_err(|e| SecurityError::io(self.lock.path(), e))?;

        let prev_hash = self.chain_head()?;

        let entry = AuditEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            action,
            source: source.to_string(),
            subject: subject.map(str::to_string),
            detail: detail.map(str::to_string),
            prev_entry_sha256: prev_hash,
        };
        let json = serialize_entry(&entry)?;
        self.fs.append_line(&self.file, &json)
    }

    /// Hash of the last line, writing a recovery entry first if that line
    /// is corrupted. Only the end of the file is read.
    fn chain_head(&self) -> Result<String> {
        if !self.fs.exists(&self.file) {
            return Ok(GENESIS_HASH.to_string());
        }

        let tail = self.fs.read_tail(&self.file, CHAIN_TAIL_BYTES)?;
        let content = String::from_utf8_lossy(&tail);
        let Some(last_line) = content.lines().rfind(|l| !l.is_empty()) else {
            return Ok(GENESIS_HASH.to_string());
        };

        if serde_json::from_str::<AuditEntry>(last_line).is_ok() {
            return Ok(sha256_hex(last_line.as_bytes()));
        }

        let recovery = AuditEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            action: AuditAction::ChainRecovery,
            source: "audit_system".to_string(),
            subject: None,
            detail: Some(format!(
                "Previous entry corrupted ({} bytes), new chain segment",
                last_line.len()
            )),
            prev_entry_sha256: sha256_hex(last_line.as_bytes()),
        };
        let recovery_json = serialize_entry(&recovery)?;
        self.fs.append_line(&self.file, &recovery_json)?;
        Ok(sha256_hex(recovery_json.as_bytes()))
    }
}

fn serialize_entry(entry: &AuditEntry) -> Result<String> {
    serde_json::to_string(entry)
        .map_err(|e| SecurityError::Validation(format!("cannot serialize audit entry: {}", e)))
}

fn reader(state_dir: &Path) -> Result<Option<SafeFs>> {
    if !state_dir.is_dir() {
        return Ok(None);
    }
    let fs = SafeFs::open(state_dir, Arc::new(SecurityLog::disabled()))?
        .with_max_read_bytes(AUDIT_MAX_READ_BYTES);
    Ok(Some(fs))
}

fn read_lines(state_dir: &Path) -> Result<Vec<String>> {
    let Some(fs) = reader(state_dir)? else {
        return Ok(Vec::new());
    };
    if !fs.exists(AUDIT_FILENAME) {
        return Ok(Vec::new());
    }
    let content = fs.read_to_string(AUDIT_FILENAME)?;
    Ok(content
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Read all parseable entries. Corrupted lines are skipped.
pub fn read_audit_log(state_dir: &Path) -> Result<Vec<AuditEntry>> {
    Ok(read_lines(state_dir)?
        .iter()
        .filter_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
        .collect())
}

/// Verify the hash chain. Returns the line indices where it is broken;
/// an empty vector means the chain is intact.
pub fn verify_audit_chain(state_dir: &Path) -> Result<Vec<usize>> {
    let lines = read_lines(state_dir)?;
    let mut broken = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Ok(entry) = serde_json::from_str::<AuditEntry>(line) else {
            broken.push(i);
            continue;
        };
        let expected = if i == 0 {
            GENESIS_HASH.to_string()
        } else {
            sha256_hex(lines[i - 1].as_bytes())
        };
        if entry.prev_entry_sha256 != expected {
            broken.push(i);
        }
    }

    Ok(broken)
}

pub fn audit_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(AUDIT_FILENAME)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    #[test]
    fn chain_intact_after_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SecurityLog::open(tmp.path()).unwrap();

        for i in 0..5 {
            log.record(
                AuditAction::AuthFailed,
                "test",
                Some(&format!("caller-{}", i)),
                None,
            );
        }

        let entries = read_audit_log(tmp.path()).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].prev_entry_sha256, GENESIS_HASH);
        assert_eq!(entries[3].subject.as_deref(), Some("caller-3"));

        let broken = verify_audit_chain(tmp.path()).unwrap();
        assert!(broken.is_empty(), "Chain should be intact: {:?}", broken);
    }

    #[test]
    fn appends_continue_past_read_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = SecurityLog::open(tmp.path()).unwrap();
        let sink = log.sink.take().unwrap();
        log.sink = Some(LogSink {
            fs: sink.fs.with_max_read_bytes(1024),
            ..sink
        });

        let detail = "x".repeat(100);
        for _ in 0..40 {
            log.record(AuditAction::AuthFailed, "test", None, Some(&detail));
        }
        assert!(fs::metadata(audit_file_path(tmp.path())).unwrap().len() > 1024);

        let entries = read_audit_log(tmp.path()).unwrap();
        assert_eq!(entries.len(), 40);
        assert!(entries.iter().all(|e| e.action == AuditAction::AuthFailed));
        assert!(verify_audit_chain(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SecurityLog::from_config(tmp.path(), false);
        assert!(!log.is_enabled());

        log.record(AuditAction::SessionCreated, "test", None, None);
        assert!(!audit_file_path(tmp.path()).exists());
        assert!(read_audit_log(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn tampered_line_breaks_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SecurityLog::open(tmp.path()).unwrap();
        for i in 0..3 {
            log.record(
                AuditAction::AuthSucceeded,
                "test",
                Some(&format!("subject_{}", i)),
                None,
            );
        }

        let path = audit_file_path(tmp.path());
        let content = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        let tampered = lines[1].replace("subject_1", "someone_else");
        lines[1] = &tampered;
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let broken = verify_audit_chain(tmp.path()).unwrap();
        assert!(broken.contains(&2), "Entry 2 should have broken link");
    }

    #[test]
    fn corrupted_last_line_triggers_recovery() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SecurityLog::open(tmp.path()).unwrap();
        log.record(AuditAction::PinSetup, "credentials", None, None);

        let path = audit_file_path(tmp.path());
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not valid json garbage").unwrap();
        drop(file);

        log.record(AuditAction::AuthSucceeded, "auth", Some("cli:test"), None);

        let entries = read_audit_log(tmp.path()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].action, AuditAction::ChainRecovery);
        assert_eq!(entries[1].source, "audit_system");
        assert!(entries[1].detail.as_ref().unwrap().contains("corrupted"));
    }

    #[test]
    fn actions_serialize_snake_case() {
        let entry = AuditEntry {
            ts: "2026-10-01T12:00:00Z".to_string(),
            action: AuditAction::SandboxViolation,
            source: "safe_fs".to_string(),
            subject: Some("../../etc/passwd".to_string()),
            detail: None,
            prev_entry_sha256: GENESIS_HASH.to_string(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"sandbox_violation\""));
        assert!(!json.contains("\"detail\""));
        assert_eq!(AuditAction::SandboxViolation.as_str(), "sandbox_violation");
    }

    #[test]
    fn concurrent_appends_keep_chain_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(SecurityLog::open(tmp.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..5 {
                        log.record(
                            AuditAction::SessionCreated,
                            "test",
                            Some(&format!("{}-{}", i, j)),
                            None,
                        );
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(read_audit_log(tmp.path()).unwrap().len(), 40);
        assert!(verify_audit_chain(tmp.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn audit_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let log = SecurityLog::open(tmp.path()).unwrap();
        log.record(AuditAction::PinSetup, "credentials", None, None);

        let mode = fs::metadata(audit_file_path(tmp.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
