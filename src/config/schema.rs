//! Allow-list of configuration keys and their validators.
//!
//! `config.toml` is filtered against [`CONFIG_SCHEMA`] before it is
//! deserialized; `config get/set` address the same dotted keys.

use crate::security::{ConfigField, FieldKind};

pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

const PROJECT_FIELDS: &[ConfigField] = &[
    ConfigField {
        key: "root",
        kind: FieldKind::Path,
    },
    ConfigField {
        key: "source_language",
        kind: FieldKind::LanguageCode,
    },
    ConfigField {
        key: "locales_dir",
        kind: FieldKind::Path,
    },
    ConfigField {
        key: "output_dir",
        kind: FieldKind::Path,
    },
];

const SECURITY_FIELDS: &[ConfigField] = &[
    ConfigField {
        key: "session_timeout_secs",
        kind: FieldKind::Integer {
            min: 10,
            max: 86_400,
        },
    },
    ConfigField {
        key: "max_attempts",
        kind: FieldKind::Integer { min: 1, max: 20 },
    },
    ConfigField {
        key: "lockout_window_secs",
        kind: FieldKind::Integer {
            min: 10,
            max: 86_400,
        },
    },
    ConfigField {
        key: "cleanup_interval_secs",
        kind: FieldKind::Integer { min: 1, max: 3_600 },
    },
    ConfigField {
        key: "audit_log",
        kind: FieldKind::Bool,
    },
];

const SANDBOX_FIELDS: &[ConfigField] = &[
    ConfigField {
        key: "max_read_bytes",
        kind: FieldKind::Integer {
            min: 1_024,
            max: 1_073_741_824,
        },
    },
    ConfigField {
        key: "allow_symlinks",
        kind: FieldKind::Bool,
    },
    ConfigField {
        key: "allow_paths",
        kind: FieldKind::PathList,
    },
];

const LOGGING_FIELDS: &[ConfigField] = &[ConfigField {
    key: "level",
    kind: FieldKind::Choice(LOG_LEVELS),
}];

pub static CONFIG_SCHEMA: &[ConfigField] = &[
    ConfigField {
        key: "project",
        kind: FieldKind::Section(PROJECT_FIELDS),
    },
    ConfigField {
        key: "security",
        kind: FieldKind::Section(SECURITY_FIELDS),
    },
    ConfigField {
        key: "sandbox",
        kind: FieldKind::Section(SANDBOX_FIELDS),
    },
    ConfigField {
        key: "logging",
        kind: FieldKind::Section(LOGGING_FIELDS),
    },
];

/// Every settable leaf key, dotted, with a description of what it accepts.
pub fn settable_keys() -> Vec<(String, String)> {
    let mut keys = Vec::new();
    for section in CONFIG_SCHEMA {
        if let FieldKind::Section(fields) = section.kind {
            for field in fields {
                keys.push((
                    format!("{}.{}", section.key, field.key),
                    field.kind.describe(),
                ));
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settable_keys_are_dotted() {
        let keys = settable_keys();
        assert!(keys.iter().any(|(k, _)| k == "security.max_attempts"));
        assert!(keys.iter().any(|(k, _)| k == "logging.level"));
        assert!(keys.iter().all(|(k, _)| k.contains('.')));
    }
}
