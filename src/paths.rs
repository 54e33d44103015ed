//! XDG Base Directory compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. i18ntk-specific env var (I18NTK_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored per XDG spec.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::security::{AUDIT_FILENAME, CREDENTIAL_FILENAME, ensure_private_dir};

pub const ENV_CONFIG_DIR: &str = "I18NTK_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "I18NTK_DATA_DIR";
pub const ENV_STATE_DIR: &str = "I18NTK_STATE_DIR";

/// Resolved directory paths for the application.
///
/// Created once at startup. All paths are absolute.
#[derive(Debug, Clone)]
pub struct Paths {
    /// config.toml lives here
    pub config_dir: PathBuf,

    /// Contains security/ (the admin PIN record)
    pub data_dir: PathBuf,

    /// Security event log
    pub state_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, ENV_CONFIG_DIR, || {
            strategy.config_dir().join("i18ntk")
        });

        let data_dir = env_or(&env_fn, ENV_DATA_DIR, || strategy.data_dir().join("i18ntk"));

        let state_dir = env_or(&env_fn, ENV_STATE_DIR, || {
            // state_dir() is None on platforms without XDG_STATE_HOME.
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join("i18ntk")
        });

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Restricted directory holding the credential record: data_dir/security
    pub fn credential_dir(&self) -> PathBuf {
        self.data_dir.join("security")
    }

    /// Credential record: data_dir/security/admin-pin.json
    pub fn credential_file(&self) -> PathBuf {
        self.credential_dir().join(CREDENTIAL_FILENAME)
    }

    /// Security event log: state_dir/security-events.jsonl
    pub fn audit_log(&self) -> PathBuf {
        self.state_dir.join(AUDIT_FILENAME)
    }

    /// Create all directories with mode 0700.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dirs = [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.credential_dir(),
        ];

        for dir in dirs {
            ensure_private_dir(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            // Emergency fallback
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            Self {
                config_dir: home.join(".config").join("i18ntk"),
                data_dir: home.join(".local").join("share").join("i18ntk"),
                state_dir: home.join(".local").join("state").join("i18ntk"),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths per XDG spec.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute()) // XDG spec: ignore relative paths
        .unwrap_or_else(default)
}
