mod schema;

pub use schema::*;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::paths::Paths;
use crate::security::{
    AuthSettings, FieldKind, ResolveOptions, SafeFs, SecurityLog, lookup_field, validate_config,
    validate_field,
};

const CONFIG_FILENAME: &str = "config.toml";
const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project root; every collaborator file access is confined to it.
    /// Defaults to the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Translation files, relative to the project root
    #[serde(default = "default_locales_dir")]
    pub locales_dir: String,

    /// Generated reports, relative to the project root (`i18ntk clean` target)
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Idle time after which an admin session expires
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Failed PIN attempts allowed inside the lockout window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_lockout_window")]
    pub lockout_window_secs: u64,

    /// Period of the background session sweep
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Append security events to state_dir/security-events.jsonl (default: false)
    #[serde(default)]
    pub audit_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Largest file a read will load (default: 10MB)
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,

    /// Traverse symlinks whose target stays inside the project root
    #[serde(default)]
    pub allow_symlinks: bool,

    /// Restrict access to these sub-paths of the root (empty = whole root)
    #[serde(default)]
    pub allow_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_source_language() -> String {
    "en".to_string()
}
fn default_locales_dir() -> String {
    "locales".to_string()
}
fn default_output_dir() -> String {
    "i18ntk-reports".to_string()
}
fn default_session_timeout() -> u64 {
    1800 // 30 minutes
}
fn default_max_attempts() -> u32 {
    3
}
fn default_lockout_window() -> u64 {
    900 // 15 minutes
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_max_read_bytes() -> u64 {
    10_485_760 // 10MB
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: None,
            source_language: default_source_language(),
            locales_dir: default_locales_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            max_attempts: default_max_attempts(),
            lockout_window_secs: default_lockout_window(),
            cleanup_interval_secs: default_cleanup_interval(),
            audit_log: false,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: default_max_read_bytes(),
            allow_symlinks: false,
            allow_paths: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Resolve paths, create directories and load `config.toml`.
    pub fn load(strict: bool) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_from(paths, strict)
    }

    /// Load from `paths.config_dir`, writing the template on first run.
    ///
    /// Unknown keys and invalid values are dropped before deserialization,
    /// so a damaged file degrades to defaults instead of failing.
    pub fn load_from(paths: Paths, strict: bool) -> Result<Self> {
        let fs = config_fs(&paths)?;

        if !fs.exists(CONFIG_FILENAME) {
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs
            .read_to_string(CONFIG_FILENAME)
            .with_context(|| format!("Failed to read {}", paths.config_file().display()))?;
        let raw: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", paths.config_file().display()))?;

        let tree = serde_json::to_value(raw)?;
        let filtered = validate_config(&tree, CONFIG_SCHEMA, strict, &SecurityLog::disabled());
        let mut config: Config = serde_json::from_value(filtered)?;
        config.paths = paths;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        config_fs(&self.paths)?
            .write(CONFIG_FILENAME, content)
            .with_context(|| format!("Failed to write {}", self.paths.config_file().display()))?;
        Ok(())
    }

    /// Whether `config.toml` exists in the config directory.
    pub fn file_exists(&self) -> Result<bool> {
        Ok(config_fs(&self.paths)?.exists(CONFIG_FILENAME))
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        config_fs(&self.paths)?.write(CONFIG_FILENAME, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", self.paths.config_file().display());
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        match lookup_field(CONFIG_SCHEMA, key) {
            Some(FieldKind::Section(_)) | None => anyhow::bail!("Unknown config key: {}", key),
            Some(_) => {}
        }

        let tree = serde_json::to_value(self)?;
        let value = key
            .split('.')
            .try_fold(&tree, |node, part| node.get(part))
            .unwrap_or(&Value::Null);

        Ok(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let kind = match lookup_field(CONFIG_SCHEMA, key) {
            Some(FieldKind::Section(_)) | None => anyhow::bail!("Unknown config key: {}", key),
            Some(kind) => kind,
        };

        let raw = match kind {
            FieldKind::PathList => Value::Array(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
            _ => Value::String(value.to_string()),
        };
        let Some(valid) = validate_field(kind, &raw) else {
            anyhow::bail!(
                "Invalid value for {}: expected {}",
                key,
                kind.describe()
            );
        };

        let mut tree = serde_json::to_value(&*self)?;
        let (section, field) = key
            .split_once('.')
            .context("Config keys have the form section.key")?;
        let Some(Value::Object(section)) = tree.get_mut(section) else {
            anyhow::bail!("Unknown config section: {}", section);
        };
        section.insert(field.to_string(), valid);

        let paths = std::mem::take(&mut self.paths);
        *self = serde_json::from_value(tree)?;
        self.paths = paths;
        Ok(())
    }

    /// Project root: `--root`, then `project.root`, then the current directory.
    pub fn project_root(&self, cli_root: Option<&Path>) -> Result<PathBuf> {
        if let Some(root) = cli_root {
            return Ok(root.to_path_buf());
        }
        if let Some(ref root) = self.project.root {
            return Ok(PathBuf::from(shellexpand::tilde(root).into_owned()));
        }
        std::env::current_dir().context("Failed to determine current directory")
    }

    /// Session and lockout parameters, with `I18NTK_*` overrides applied.
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            session_timeout: Duration::from_secs(self.security.session_timeout_secs),
            max_attempts: self.security.max_attempts,
            lockout_window: Duration::from_secs(self.security.lockout_window_secs),
            cleanup_interval: Duration::from_secs(self.security.cleanup_interval_secs),
        }
        .with_env_overrides()
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            allow_symlinks: self.sandbox.allow_symlinks,
            allowlist: if self.sandbox.allow_paths.is_empty() {
                None
            } else {
                Some(self.sandbox.allow_paths.iter().map(PathBuf::from).collect())
            },
        }
    }

    /// Safe file operations confined to the project root.
    pub fn project_fs(&self, root: &Path, log: Arc<SecurityLog>) -> Result<SafeFs> {
        let fs = SafeFs::open_with_options(root, self.resolve_options(), log)
            .with_context(|| format!("Cannot use {} as project root", root.display()))?;
        Ok(fs.with_max_read_bytes(self.sandbox.max_read_bytes))
    }
}

fn config_fs(paths: &Paths) -> Result<SafeFs> {
    crate::security::ensure_private_dir(&paths.config_dir)?;
    let fs = SafeFs::open(&paths.config_dir, Arc::new(SecurityLog::disabled()))?
        .with_max_read_bytes(MAX_CONFIG_BYTES);
    Ok(fs)
}

/// Default config template with helpful comments (used for first-time setup)
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# i18ntk Configuration
# Auto-created on first run. Edit as needed, or use `i18ntk config set`.

[project]
# Project root. Every file the tool reads or writes must live under it.
# Default: the current directory (or --root)
# root = "~/src/my-app"
source_language = "en"
locales_dir = "locales"
output_dir = "i18ntk-reports"

[security]
# Admin sessions expire after this many idle seconds
session_timeout_secs = 1800
# Failed PIN attempts before lockout, and the window they are counted in
max_attempts = 3
lockout_window_secs = 900
cleanup_interval_secs = 60
# Record security events to the state directory (security-events.jsonl)
audit_log = false

# Overrides (environment):
#   I18NTK_SESSION_TIMEOUT, I18NTK_MAX_ATTEMPTS, I18NTK_LOCKOUT_WINDOW
#   I18NTK_ADMIN_PIN  - PIN used once before prompting

[sandbox]
max_read_bytes = 10485760             # 10MB
allow_symlinks = false                # symlinks may never leave the root
# allow_paths = ["locales", "i18ntk-reports"]

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_paths() -> (tempfile::TempDir, Paths) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths {
            config_dir: tmp.path().join("config"),
            data_dir: tmp.path().join("data"),
            state_dir: tmp.path().join("state"),
        };
        (tmp, paths)
    }

    #[test]
    fn first_run_writes_template() {
        let (_tmp, paths) = temp_paths();
        let config = Config::load_from(paths.clone(), false).unwrap();

        assert!(paths.config_file().exists());
        assert_eq!(config.security.max_attempts, 3);
        assert_eq!(config.project.output_dir, "i18ntk-reports");
    }

    #[test]
    fn file_exists_tracks_config_file() {
        let (_tmp, paths) = temp_paths();
        let config = Config {
            paths: paths.clone(),
            ..Config::default()
        };
        assert!(!config.file_exists().unwrap());

        config.save_with_template().unwrap();
        assert!(config.file_exists().unwrap());
    }

    #[test]
    fn template_round_trips_to_defaults() {
        let (_tmp, paths) = temp_paths();
        Config::load_from(paths.clone(), true).unwrap();
        let config = Config::load_from(paths, true).unwrap();

        let defaults = Config::default();
        assert_eq!(config.security.session_timeout_secs, defaults.security.session_timeout_secs);
        assert_eq!(config.sandbox.max_read_bytes, defaults.sandbox.max_read_bytes);
        assert_eq!(config.logging.level, "info");
        assert!(config.project.root.is_none());
    }

    #[test]
    fn invalid_and_unknown_entries_fall_back_to_defaults() {
        let (_tmp, paths) = temp_paths();
        fs::create_dir_all(&paths.config_dir).unwrap();
        fs::write(
            paths.config_file(),
            r#"
[project]
source_language = "de-AT"
output_dir = ""
shell = "rm -rf /"

[security]
max_attempts = 500
session_timeout_secs = "600"
audit_log = "yes"

[logging]
level = "LOUD"

[providers.openai]
api_key = "sk-x"
"#,
        )
        .unwrap();

        let config = Config::load_from(paths, true).unwrap();
        assert_eq!(config.project.source_language, "de-AT");
        assert_eq!(config.project.output_dir, "i18ntk-reports");
        assert_eq!(config.security.max_attempts, 3);
        assert_eq!(config.security.session_timeout_secs, 600);
        assert!(!config.security.audit_log);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let (_tmp, paths) = temp_paths();
        fs::create_dir_all(&paths.config_dir).unwrap();
        fs::write(paths.config_file(), "[security\nmax_attempts = ").unwrap();
        assert!(Config::load_from(paths, false).is_err());
    }

    #[test]
    fn get_and_set_values() {
        let mut config = Config::default();
        assert_eq!(config.get_value("security.max_attempts").unwrap(), "3");
        assert_eq!(config.get_value("project.root").unwrap(), "");

        config.set_value("security.max_attempts", "5").unwrap();
        config.set_value("security.audit_log", "true").unwrap();
        config.set_value("project.source_language", "pt-BR").unwrap();
        config.set_value("sandbox.allow_paths", "locales, reports").unwrap();

        assert_eq!(config.security.max_attempts, 5);
        assert!(config.security.audit_log);
        assert_eq!(config.get_value("project.source_language").unwrap(), "pt-BR");
        assert_eq!(config.sandbox.allow_paths, vec!["locales", "reports"]);
    }

    #[test]
    fn set_rejects_bad_keys_and_values() {
        let mut config = Config::default();
        assert!(config.set_value("security", "1").is_err());
        assert!(config.set_value("security.nope", "1").is_err());
        assert!(config.set_value("security.max_attempts", "0").is_err());
        assert!(config.set_value("logging.level", "verbose").is_err());
        assert!(config.get_value("providers.openai").is_err());
        assert_eq!(config.security.max_attempts, 3);
    }

    #[test]
    fn set_preserves_paths_and_saves() {
        let (_tmp, paths) = temp_paths();
        let mut config = Config::load_from(paths.clone(), false).unwrap();
        config.set_value("security.session_timeout_secs", "120").unwrap();
        assert_eq!(config.paths.config_dir, paths.config_dir);
        config.save().unwrap();

        let reloaded = Config::load_from(paths, true).unwrap();
        assert_eq!(reloaded.security.session_timeout_secs, 120);
    }

    #[test]
    fn project_root_precedence() {
        let mut config = Config::default();
        let cli = PathBuf::from("/from/cli");
        assert_eq!(config.project_root(Some(&cli)).unwrap(), cli);

        config.project.root = Some("/from/config".to_string());
        assert_eq!(
            config.project_root(None).unwrap(),
            PathBuf::from("/from/config")
        );
    }

    #[test]
    fn resolve_options_follow_sandbox_section() {
        let mut config = Config::default();
        assert!(config.resolve_options().allowlist.is_none());

        config.sandbox.allow_paths = vec!["locales".to_string()];
        config.sandbox.allow_symlinks = true;
        let options = config.resolve_options();
        assert!(options.allow_symlinks);
        assert_eq!(options.allowlist, Some(vec![PathBuf::from("locales")]));
    }

    #[test]
    fn project_fs_is_confined() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::default();
        let fs = config
            .project_fs(tmp.path(), Arc::new(SecurityLog::disabled()))
            .unwrap();

        fs.write("locales/en.json", "{}").unwrap();
        assert!(fs.read("../escape.json").unwrap_err().is_violation());
        assert_eq!(fs.max_read_bytes(), 10_485_760);
    }
}
