//! Allow-list filtering of free-form strings, argument maps and
//! configuration trees.
//!
//! Nothing here rejects by raising: unknown keys and invalid values are
//! dropped (and reported) so that callers fall back to defaults.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::audit::{AuditAction, SecurityLog};
use super::credential::is_valid_pin_format;

/// Upper bound for any path-like configuration value.
pub const MAX_PATH_LEN: usize = 4096;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"(?is)<script\b[^>]*>.*?(?:</script\s*>|$)"));

static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| compile_regex(r"<[^>]*>?"));

static SCRIPT_SCHEME: Lazy<Regex> = Lazy::new(|| {
    compile_regex(r"(?i)(?:javascript|vbscript)\s*:|data\s*:\s*text/html")
});

static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?i)\bon[a-z]+\s*="));

/// `en`, `fil`, `en-US`, `pt_BR`, `zh-Hant`, `zh-Hant-TW`, `es-419`.
static LANGUAGE_CODE: Lazy<Regex> = Lazy::new(|| {
    compile_regex(r"^[A-Za-z]{2,3}(?:[-_][A-Za-z]{4})?(?:[-_](?:[A-Za-z]{2}|[0-9]{3}))?$")
});

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Covered by the `patterns_compile` test.
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Character classes accepted by [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Digits,
    Alphanumeric,
    /// Alphanumerics plus `_`, `-` and `.`.
    Identifier,
    /// Alphanumerics plus `-` and `_`.
    LanguageCode,
    /// Characters that may appear in a relative or absolute path.
    PathSafe,
    /// Any printable character, including non-ASCII letters.
    Text,
}

impl Charset {
    pub fn allows(self, c: char) -> bool {
        match self {
            Charset::Digits => c.is_ascii_digit(),
            Charset::Alphanumeric => c.is_ascii_alphanumeric(),
            Charset::Identifier => c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'),
            Charset::LanguageCode => c.is_ascii_alphanumeric() || matches!(c, '-' | '_'),
            Charset::PathSafe => {
                c.is_ascii_alphanumeric()
                    || matches!(c, '/' | '\\' | '.' | '_' | '-' | '~' | ':' | ' ' | '@' | '+')
            }
            Charset::Text => !c.is_control(),
        }
    }
}

/// Trim, truncate to `max_length` characters, strip markup and
/// script-like content, then drop characters outside `charset`.
pub fn sanitize(input: &str, charset: Charset, max_length: usize) -> String {
    let truncated: String = input.trim().chars().take(max_length).collect();

    let stripped = SCRIPT_BLOCK.replace_all(&truncated, "");
    let stripped = MARKUP_TAG.replace_all(&stripped, "");
    let stripped = SCRIPT_SCHEME.replace_all(&stripped, "");
    let stripped = EVENT_HANDLER.replace_all(&stripped, "");

    stripped
        .chars()
        .filter(|c| charset.allows(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Keep only allow-listed keys. Every dropped key is logged.
pub fn validate_args<V>(
    raw_args: impl IntoIterator<Item = (String, V)>,
    allowed_keys: &[&str],
    log: &SecurityLog,
) -> BTreeMap<String, V> {
    let mut kept = BTreeMap::new();
    for (key, value) in raw_args {
        if allowed_keys.contains(&key.as_str()) {
            kept.insert(key, value);
        } else {
            let shown = sanitize(&key, Charset::Identifier, 64);
            warn!("Dropping unknown argument '{}'", shown);
            log.record(AuditAction::ArgDropped, "sanitize", Some(&shown), None);
        }
    }
    kept
}

/// One allow-listed configuration key and its validator.
#[derive(Debug, Clone, Copy)]
pub struct ConfigField {
    pub key: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Non-empty path without NUL/control characters; `~` is expanded.
    Path,
    LanguageCode,
    /// Native boolean or `"true"` / `"false"`.
    Bool,
    /// Native integer or numeric string within `min..=max`.
    Integer { min: i64, max: i64 },
    Text { max_len: usize },
    /// One of a fixed set of lowercase words.
    Choice(&'static [&'static str]),
    PathList,
    Section(&'static [ConfigField]),
}

impl FieldKind {
    pub fn describe(&self) -> String {
        match self {
            FieldKind::Path => "path".to_string(),
            FieldKind::LanguageCode => "language code (e.g. en, pt-BR)".to_string(),
            FieldKind::Bool => "boolean".to_string(),
            FieldKind::Integer { min, max } => format!("integer in {}..={}", min, max),
            FieldKind::Text { max_len } => format!("text (max {} chars)", max_len),
            FieldKind::Choice(options) => format!("one of: {}", options.join(", ")),
            FieldKind::PathList => "list of paths".to_string(),
            FieldKind::Section(_) => "section".to_string(),
        }
    }
}

/// Find the validator for a dotted key such as `security.max_attempts`.
pub fn lookup_field(schema: &'static [ConfigField], dotted: &str) -> Option<FieldKind> {
    let mut fields = schema;
    let mut parts = dotted.split('.').peekable();
    while let Some(part) = parts.next() {
        let field = fields.iter().find(|f| f.key == part)?;
        if parts.peek().is_none() {
            return Some(field.kind);
        }
        match field.kind {
            FieldKind::Section(inner) => fields = inner,
            _ => return None,
        }
    }
    None
}

/// Validate and normalize one leaf value. `None` means rejected.
pub fn validate_field(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Path => validate_path(value).map(Value::String),
        FieldKind::LanguageCode => {
            let s = value.as_str()?.trim();
            LANGUAGE_CODE
                .is_match(s)
                .then(|| Value::String(s.to_string()))
        }
        FieldKind::Bool => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Integer { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.trim().parse::<i64>().ok()?,
                _ => return None,
            };
            (min..=max).contains(&n).then(|| Value::from(n))
        }
        FieldKind::Text { max_len } => {
            let s = value.as_str()?;
            let cleaned = sanitize(s, Charset::Text, max_len);
            (!cleaned.is_empty()).then_some(Value::String(cleaned))
        }
        FieldKind::Choice(options) => {
            let s = value.as_str()?.trim().to_ascii_lowercase();
            options.contains(&s.as_str()).then_some(Value::String(s))
        }
        FieldKind::PathList => {
            let items = value.as_array()?;
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                match validate_path(item) {
                    Some(p) => kept.push(Value::String(p)),
                    None => warn!("Dropping invalid path list entry: {}", item),
                }
            }
            Some(Value::Array(kept))
        }
        FieldKind::Section(_) => None,
    }
}

fn validate_path(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s.len() > MAX_PATH_LEN || s.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(shellexpand::tilde(s).into_owned())
}

/// Recursively filter a configuration tree against `schema`.
///
/// Unknown keys are dropped (a warning in `strict` mode, a debug line
/// otherwise). Invalid values are always dropped with a warning so that the
/// caller's defaults apply.
pub fn validate_config(
    raw_config: &Value,
    schema: &[ConfigField],
    strict: bool,
    log: &SecurityLog,
) -> Value {
    let Some(object) = raw_config.as_object() else {
        warn!("Configuration root is not a table; ignoring it");
        return Value::Object(Map::new());
    };
    Value::Object(filter_section(object, schema, "", strict, log))
}

fn filter_section(
    object: &Map<String, Value>,
    schema: &[ConfigField],
    prefix: &str,
    strict: bool,
    log: &SecurityLog,
) -> Map<String, Value> {
    let mut out = Map::new();

    for (key, value) in object {
        let dotted = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        let Some(field) = schema.iter().find(|f| f.key == key) else {
            let shown = sanitize(&dotted, Charset::Identifier, 128);
            if strict {
                warn!("Dropping unknown config key '{}'", shown);
                log.record(AuditAction::ConfigKeyDropped, "config", Some(&shown), None);
            } else {
                debug!("Ignoring unknown config key '{}'", shown);
            }
            continue;
        };

        if let FieldKind::Section(inner) = field.kind {
            match value.as_object() {
                Some(section) => {
                    let filtered = filter_section(section, inner, &dotted, strict, log);
                    out.insert(key.clone(), Value::Object(filtered));
                }
                None => reject_value(&dotted, &field.kind, log),
            }
            continue;
        }

        match validate_field(field.kind, value) {
            Some(valid) => {
                out.insert(key.clone(), valid);
            }
            None => reject_value(&dotted, &field.kind, log),
        }
    }

    out
}

fn reject_value(dotted: &str, kind: &FieldKind, log: &SecurityLog) {
    warn!(
        "Invalid value for config key '{}' (expected {}); using default",
        dotted,
        kind.describe()
    );
    log.record(
        AuditAction::ConfigValueRejected,
        "config",
        Some(dotted),
        Some(&kind.describe()),
    );
}

/// Parse a numeric environment override. Anything but plain digits within
/// `min..=max` is rejected.
pub fn parse_env_number(value: &str, min: u64, max: u64) -> Option<u64> {
    let cleaned = sanitize(value, Charset::Digits, 20);
    if cleaned.is_empty() || cleaned != value.trim() {
        return None;
    }
    let n: u64 = cleaned.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a pre-seeded PIN from the environment.
pub fn parse_env_pin(value: &str) -> Option<Zeroizing<String>> {
    let trimmed = value.trim();
    is_valid_pin_format(trimmed).then(|| Zeroizing::new(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static SCHEMA: &[ConfigField] = &[
        ConfigField {
            key: "project",
            kind: FieldKind::Section(&[
                ConfigField {
                    key: "root",
                    kind: FieldKind::Path,
                },
                ConfigField {
                    key: "source_language",
                    kind: FieldKind::LanguageCode,
                },
            ]),
        },
        ConfigField {
            key: "security",
            kind: FieldKind::Section(&[
                ConfigField {
                    key: "max_attempts",
                    kind: FieldKind::Integer { min: 1, max: 20 },
                },
                ConfigField {
                    key: "audit_log",
                    kind: FieldKind::Bool,
                },
            ]),
        },
        ConfigField {
            key: "level",
            kind: FieldKind::Choice(&["info", "debug"]),
        },
    ];

    #[test]
    fn patterns_compile() {
        let _ = sanitize("x", Charset::Text, 10);
        assert!(LANGUAGE_CODE.is_match("en"));
    }

    #[test]
    fn sanitize_strips_markup_and_scripts() {
        assert_eq!(
            sanitize("  <b>hello</b> world  ", Charset::Text, 100),
            "hello world"
        );
        assert_eq!(
            sanitize("a<script>alert(1)</script>b", Charset::Text, 100),
            "ab"
        );
        assert_eq!(sanitize("javascript:alert(1)", Charset::Text, 100), "alert(1)");
        assert_eq!(sanitize("x onclick=run()", Charset::Text, 100), "x run()");
    }

    #[test]
    fn sanitize_filters_charset_and_truncates() {
        assert_eq!(sanitize("12a34", Charset::Digits, 10), "1234");
        assert_eq!(sanitize("abcdef", Charset::Alphanumeric, 3), "abc");
        assert_eq!(sanitize("pt_BR;rm", Charset::LanguageCode, 20), "pt_BRrm");
        assert_eq!(sanitize("../reports/x$.json", Charset::PathSafe, 50), "../reports/x.json");
        assert_eq!(sanitize("Grüße\u{7}", Charset::Text, 50), "Grüße");
    }

    #[test]
    fn validate_args_drops_unknown_keys() {
        let raw = vec![
            ("locale".to_string(), "de".to_string()),
            ("evil".to_string(), "1".to_string()),
            ("dry_run".to_string(), "true".to_string()),
        ];
        let kept = validate_args(raw, &["locale", "dry_run"], &SecurityLog::disabled());
        assert_eq!(kept.len(), 2);
        assert!(kept.contains_key("locale"));
        assert!(!kept.contains_key("evil"));
    }

    #[test]
    fn validate_args_records_drops() {
        let state = tempfile::tempdir().unwrap();
        let log = SecurityLog::open(state.path()).unwrap();
        let raw = vec![("__proto__".to_string(), 1)];
        let kept = validate_args(raw, &["locale"], &log);
        assert!(kept.is_empty());

        let entries = super::super::audit::read_audit_log(state.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ArgDropped);
    }

    #[test]
    fn validate_config_filters_recursively() {
        let raw = json!({
            "project": {
                "root": "/srv/app",
                "source_language": "en-US",
                "shell": "rm -rf /"
            },
            "security": {
                "max_attempts": "5",
                "audit_log": "true"
            },
            "level": "DEBUG",
            "unknown": 1
        });

        let filtered = validate_config(&raw, SCHEMA, true, &SecurityLog::disabled());
        assert_eq!(
            filtered,
            json!({
                "project": { "root": "/srv/app", "source_language": "en-US" },
                "security": { "max_attempts": 5, "audit_log": true },
                "level": "debug"
            })
        );
    }

    #[test]
    fn validate_config_drops_invalid_values() {
        let raw = json!({
            "project": { "root": "", "source_language": "english!" },
            "security": { "max_attempts": 500, "audit_log": "maybe" },
            "level": "trace"
        });

        let filtered = validate_config(&raw, SCHEMA, false, &SecurityLog::disabled());
        assert_eq!(filtered, json!({ "project": {}, "security": {} }));
    }

    #[test]
    fn validate_config_rejects_non_table_section() {
        let raw = json!({ "security": 3 });
        let filtered = validate_config(&raw, SCHEMA, false, &SecurityLog::disabled());
        assert_eq!(filtered, json!({}));

        let filtered = validate_config(&json!([1, 2]), SCHEMA, false, &SecurityLog::disabled());
        assert_eq!(filtered, json!({}));
    }

    #[test]
    fn language_codes() {
        for ok in ["en", "fil", "en-US", "pt_BR", "zh-Hant", "zh-Hant-TW", "es-419"] {
            assert!(
                validate_field(FieldKind::LanguageCode, &json!(ok)).is_some(),
                "{ok} should be accepted"
            );
        }
        for bad in ["", "e", "english", "en-", "en US", "../en", "en-US-x"] {
            assert!(
                validate_field(FieldKind::LanguageCode, &json!(bad)).is_none(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn path_fields() {
        assert!(validate_field(FieldKind::Path, &json!("a\0b")).is_none());
        assert!(validate_field(FieldKind::Path, &json!("   ")).is_none());
        assert!(validate_field(FieldKind::Path, &json!(42)).is_none());
        assert_eq!(
            validate_field(FieldKind::PathList, &json!(["locales", "", "src"])),
            Some(json!(["locales", "src"]))
        );
    }

    #[test]
    fn lookup_dotted_keys() {
        assert!(matches!(
            lookup_field(SCHEMA, "security.max_attempts"),
            Some(FieldKind::Integer { min: 1, max: 20 })
        ));
        assert!(matches!(
            lookup_field(SCHEMA, "project"),
            Some(FieldKind::Section(_))
        ));
        assert!(lookup_field(SCHEMA, "security.nope").is_none());
        assert!(lookup_field(SCHEMA, "level.deeper").is_none());
    }

    #[test]
    fn env_numbers() {
        assert_eq!(parse_env_number("300", 10, 86_400), Some(300));
        assert_eq!(parse_env_number(" 15 ", 10, 86_400), Some(15));
        assert_eq!(parse_env_number("5", 10, 86_400), None);
        assert_eq!(parse_env_number("12abc", 1, 100), None);
        assert_eq!(parse_env_number("-3", 1, 100), None);
        assert_eq!(parse_env_number("", 1, 100), None);
    }

    #[test]
    fn env_pin() {
        assert_eq!(parse_env_pin(" 4821 ").as_deref().map(String::as_str), Some("4821"));
        assert!(parse_env_pin("48a1").is_none());
        assert!(parse_env_pin("123").is_none());
        assert!(parse_env_pin("1234567").is_none());
    }
}
