//! Admin PIN storage.
//!
//! The PIN is never stored. The record holds a memory-hard hash of
//! `(pin, salt)` with a fresh 16-byte salt per setup, written atomically as
//! `admin-pin.json` (0600) inside a 0700 directory.
//!
//! # Failure semantics
//!
//! - Malformed PINs are rejected before the hasher runs; the stored record
//!   is not touched.
//! - A missing, unreadable or unparseable record is reported as
//!   [`CredentialState::NotConfigured`]. Corruption is logged, never raised.
//! - [`CredentialStore::verify`] returns `false` for every failure mode.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::audit::{AuditAction, SecurityLog};
use super::error::{Result, SecurityError};
use super::safe_fs::{PRIVATE_DIR_MODE, PRIVATE_FILE_MODE, SafeFs, ensure_private_dir};
use crate::concurrency::FileLock;

pub const CREDENTIAL_FILENAME: &str = "admin-pin.json";
pub const CREDENTIAL_LOCK_FILENAME: &str = "admin-pin.lock";

pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 6;

const RECORD_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const MAX_RECORD_BYTES: u64 = 64 * 1024;

/// Well-known PINs that are not caught by the pattern checks.
const COMMON_PINS: &[&str] = &[
    "1004", "2000", "2580", "1379", "1122", "1313", "4444", "6969", "0852", "7890", "0987",
    "112233", "159753", "123321", "111222", "147258", "258369", "121314", "102030",
];

/// Memory-hard hashing strategy for PINs.
#[cfg_attr(test, mockall::automock)]
pub trait PinHasher: Send + Sync {
    /// Identifier stored in the record. A record written by a different
    /// algorithm (or different parameters) never verifies.
    fn algorithm(&self) -> String;

    fn hash(&self, pin: &[u8], salt: &[u8]) -> Result<Vec<u8>>;
}

/// Argon2id, version 0x13.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: argon2::Params,
}

impl Default for Argon2Hasher {
    /// 19 MiB, two passes, one lane, 32-byte output.
    fn default() -> Self {
        Self {
            params: argon2::Params::DEFAULT,
        }
    }
}

impl Argon2Hasher {
    /// Custom cost parameters (`m_cost` in KiB).
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self> {
        let params = argon2::Params::new(m_cost, t_cost, p_cost, Some(32))
            .map_err(|e| SecurityError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }
}

impl PinHasher for Argon2Hasher {
    fn algorithm(&self) -> String {
        format!(
            "argon2id$v=19$m={},t={},p={}",
            self.params.m_cost(),
            self.params.t_cost(),
            self.params.p_cost()
        )
    }

    fn hash(&self, pin: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        let argon = argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        );
        let mut out = vec![0u8; self.params.output_len().unwrap_or(32)];
        argon
            .hash_password_into(pin, salt, &mut out)
            .map_err(|e| SecurityError::Hashing(e.to_string()))?;
        Ok(out)
    }
}

/// Persisted credential. Secret bytes are wiped when the value is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialRecord {
    pub version: u8,
    pub enabled: bool,
    pub algorithm: String,
    #[serde(with = "b64")]
    pub pin_hash: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("version", &self.version)
            .field("enabled", &self.enabled)
            .field("algorithm", &self.algorithm)
            .field("pin_hash", &"<redacted>")
            .field("salt", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl CredentialRecord {
    fn check(&self) -> std::result::Result<(), String> {
        if self.version != RECORD_VERSION {
            return Err(format!("unsupported record version {}", self.version));
        }
        if self.salt.len() != SALT_LEN {
            return Err(format!("salt has length {}", self.salt.len()));
        }
        if self.pin_hash.is_empty() {
            return Err("empty PIN hash".to_string());
        }
        if self.algorithm.is_empty() {
            return Err("missing algorithm".to_string());
        }
        Ok(())
    }

    fn state(&self) -> CredentialState {
        if self.enabled {
            CredentialState::Enabled
        } else {
            CredentialState::Disabled
        }
    }
}

mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    NotConfigured,
    Disabled,
    Enabled,
}

/// Non-secret view of the stored record, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub state: String,
    pub algorithm: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

pub struct CredentialStore {
    fs: SafeFs,
    lock: FileLock,
    hasher: Arc<dyn PinHasher>,
    cache: RwLock<Option<CredentialRecord>>,
    // Serializes in-process writers; the file lock covers other processes.
    write_guard: Mutex<()>,
    log: Arc<SecurityLog>,
}

impl CredentialStore {
    /// Open the store in `dir` (created 0700) and load the record.
    pub fn open(dir: &Path, hasher: Arc<dyn PinHasher>, log: Arc<SecurityLog>) -> Result<Self> {
        ensure_private_dir(dir)?;
        let fs = SafeFs::open(dir, log.clone())?
            .with_file_mode(PRIVATE_FILE_MODE)
            .with_dir_mode(PRIVATE_DIR_MODE)
            .with_max_read_bytes(MAX_RECORD_BYTES);
        let lock = FileLock::new(fs.resolve(CREDENTIAL_LOCK_FILENAME)?);

        let store = Self {
            fs,
            lock,
            hasher,
            cache: RwLock::new(None),
            write_guard: Mutex::new(()),
            log,
        };
        store.load();
        Ok(store)
    }

    /// Re-read the record from disk and replace the cache.
    pub fn load(&self) -> CredentialState {
        match self.read_record() {
            Ok(Some(record)) => {
                let state = record.state();
                *self.cache.write() = Some(record);
                state
            }
            Ok(None) => {
                *self.cache.write() = None;
                CredentialState::NotConfigured
            }
            Err(reason) => {
                warn!("Ignoring unusable credential file: {}", reason);
                self.log.record(
                    AuditAction::CredentialCorrupted,
                    "credential",
                    Some(CREDENTIAL_FILENAME),
                    Some(&reason),
                );
                *self.cache.write() = None;
                CredentialState::NotConfigured
            }
        }
    }

    fn read_record(&self) -> std::result::Result<Option<CredentialRecord>, String> {
        if !self.fs.exists(CREDENTIAL_FILENAME) {
            return Ok(None);
        }
        let raw = Zeroizing::new(
            self.fs
                .read_to_string(CREDENTIAL_FILENAME)
                .map_err(|e| e.to_string())?,
        );
        let record: CredentialRecord =
            serde_json::from_str(&raw).map_err(|e| format!("parse error: {}", e))?;
        record.check()?;
        Ok(Some(record))
    }

    pub fn state(&self) -> CredentialState {
        match self.cache.read().as_ref() {
            Some(record) => record.state(),
            None => CredentialState::NotConfigured,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state() != CredentialState::NotConfigured
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == CredentialState::Enabled
    }

    /// Hash and persist a new PIN. Returns `false` without touching the
    /// stored record if `pin` is not 4-6 ASCII digits.
    pub fn setup(&self, pin: &str) -> bool {
        if !is_valid_pin_format(pin) {
            self.log.record(
                AuditAction::PinSetupRejected,
                "credential",
                None,
                Some("PIN must be 4-6 digits"),
            );
            return false;
        }

        match self.try_setup(pin) {
            Ok(()) => true,
            Err(e) => {
                warn!("PIN setup failed: {}", e);
                false
            }
        }
    }

    fn try_setup(&self, pin: &str) -> Result<()> {
        let _serial = self.write_guard.lock();
        let _lock = self
            .lock
            .acquire()
            .map_err(|e| SecurityError::io(self.lock.path(), e))?;

        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill(&mut salt);

        let record = CredentialRecord {
            version: RECORD_VERSION,
            enabled: true,
            algorithm: self.hasher.algorithm(),
            pin_hash: self.hasher.hash(pin.as_bytes(), &salt)?,
            salt: salt.to_vec(),
            created_at: Utc::now(),
        };
        self.persist(&record)?;
        *self.cache.write() = Some(record);

        info!("Admin PIN configured");
        self.log
            .record(AuditAction::PinSetup, "credential", None, None);
        Ok(())
    }

    fn persist(&self, record: &CredentialRecord) -> Result<()> {
        let json = Zeroizing::new(
            serde_json::to_string_pretty(record)
                .map_err(|e| SecurityError::StorageCorruption(e.to_string()))?,
        );
        self.fs.write(CREDENTIAL_FILENAME, json.as_bytes())?;
        Ok(())
    }

    /// Constant-time check of `pin` against the stored hash.
    pub fn verify(&self, pin: &str) -> bool {
        if !is_valid_pin_format(pin) {
            return false;
        }

        // Copy what we need and release the lock before hashing.
        let (salt, expected, algorithm) = {
            let guard = self.cache.read();
            let Some(record) = guard.as_ref() else {
                return false;
            };
            if !record.enabled {
                return false;
            }
            (
                Zeroizing::new(record.salt.clone()),
                Zeroizing::new(record.pin_hash.clone()),
                record.algorithm.clone(),
            )
        };

        if algorithm != self.hasher.algorithm() {
            warn!(
                "Stored PIN uses '{}' but the active hasher is '{}'",
                algorithm,
                self.hasher.algorithm()
            );
            return false;
        }

        match self.hasher.hash(pin.as_bytes(), &salt) {
            Ok(actual) => {
                let actual = Zeroizing::new(actual);
                bool::from(actual.as_slice().ct_eq(expected.as_slice()))
            }
            Err(e) => {
                warn!("PIN verification failed: {}", e);
                false
            }
        }
    }

    /// Rewrite the record with a new `enabled` flag.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let _serial = self.write_guard.lock();
        let _lock = self
            .lock
            .acquire()
            .map_err(|e| SecurityError::io(self.lock.path(), e))?;

        let mut record = self
            .read_record()
            .map_err(SecurityError::StorageCorruption)?
            .ok_or_else(|| SecurityError::NotFound("no admin PIN is configured".to_string()))?;
        record.enabled = enabled;
        self.persist(&record)?;
        *self.cache.write() = Some(record);

        let action = if enabled {
            AuditAction::PinEnabled
        } else {
            AuditAction::PinDisabled
        };
        info!("Admin PIN {}", if enabled { "enabled" } else { "disabled" });
        self.log.record(action, "credential", None, None);
        Ok(())
    }

    pub fn summary(&self) -> CredentialSummary {
        let guard = self.cache.read();
        match guard.as_ref() {
            Some(record) => CredentialSummary {
                state: if record.enabled { "enabled" } else { "disabled" }.to_string(),
                algorithm: Some(record.algorithm.clone()),
                created_at: Some(record.created_at),
            },
            None => CredentialSummary {
                state: "not configured".to_string(),
                algorithm: None,
                created_at: None,
            },
        }
    }

    /// Wipe the cached record. The store reports `NotConfigured` until the
    /// next [`load`](Self::load).
    pub fn purge_secrets(&self) {
        if let Some(mut record) = self.cache.write().take() {
            record.zeroize();
        }
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.fs.root().join(CREDENTIAL_FILENAME)
    }
}

/// Exactly 4-6 ASCII digits.
pub fn is_valid_pin_format(pin: &str) -> bool {
    (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Advisory check for guessable PINs. Never used to block setup.
pub fn is_weak_pin(pin: &str) -> bool {
    if !is_valid_pin_format(pin) {
        return false;
    }
    let digits = pin.as_bytes();

    let ascending = digits.windows(2).all(|w| w[1] == w[0] + 1);
    let descending = digits.windows(2).all(|w| w[0] == w[1] + 1);
    if ascending || descending {
        return true;
    }

    // 0000, 1212, 123123, 696969: a shorter block repeated.
    let repeated = (1..digits.len()).any(|block| {
        digits.len() % block == 0 && digits.chunks(block).all(|c| c == &digits[..block])
    });
    if repeated {
        return true;
    }

    COMMON_PINS.contains(&pin)
}

#[cfg(test)]
pub(crate) fn test_hasher() -> Arc<dyn PinHasher> {
    Arc::new(Argon2Hasher::new(8, 1, 1).unwrap())
}
