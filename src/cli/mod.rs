pub mod admin;
pub mod audit;
pub mod clean;
pub mod config;
pub mod paths;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::security::{
    Charset, ENV_ADMIN_PIN, PinPrompt, SecurityContext, SecurityLog, parse_env_pin, sanitize,
};

#[derive(Parser)]
#[command(name = "i18ntk")]
#[command(author, version, about = "Translation file toolkit")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (default: project.root from config, else the current directory)
    #[arg(short, long, global = true, env = "I18NTK_ROOT")]
    pub root: Option<PathBuf>,

    /// Report unknown config keys as security events
    #[arg(long, global = true)]
    pub strict_config: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Admin PIN management
    Admin(admin::AdminArgs),

    /// Show the security event log
    Audit(audit::AuditArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,

    /// Remove generated reports from the project
    Clean(clean::CleanArgs),
}

/// Open the security context for this invocation.
pub(crate) fn security_context(config: &Config) -> Result<Arc<SecurityContext>> {
    let paths = &config.paths;
    let log = Arc::new(SecurityLog::from_config(
        &paths.state_dir,
        config.security.audit_log,
    ));
    let ctx = SecurityContext::open(&paths.credential_dir(), config.auth_settings(), log)
        .with_context(|| {
            format!(
                "Failed to open credential store at {}",
                paths.credential_dir().display()
            )
        })?;
    Ok(Arc::new(ctx))
}

/// Run `f` once the caller holds a valid admin session.
pub(crate) fn privileged<T>(ctx: &SecurityContext, f: impl FnOnce() -> Result<T>) -> Result<T> {
    ctx.with_authenticated_session(&caller_id(), pin_source(), f)
}

/// Lockout key for the invoking user.
pub(crate) fn caller_id() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let user = sanitize(&user, Charset::Identifier, 64);
    if user.is_empty() {
        "cli:unknown".to_string()
    } else {
        format!("cli:{}", user)
    }
}

/// PIN source: `I18NTK_ADMIN_PIN` for the first attempt, then the terminal.
pub(crate) fn pin_source() -> impl FnMut(PinPrompt) -> Option<Zeroizing<String>> {
    let mut seeded = std::env::var(ENV_ADMIN_PIN)
        .ok()
        .and_then(|value| parse_env_pin(&value));

    move |prompt| {
        if let Some(pin) = seeded.take() {
            return Some(pin);
        }
        if prompt.attempt > 0 {
            eprintln!(
                "Incorrect PIN. {} attempt(s) remaining.",
                prompt.remaining_attempts
            );
        }
        read_pin("Admin PIN")
    }
}

/// Read a PIN from the terminal without echo. `None` when there is no
/// terminal or the prompt is aborted.
pub(crate) fn read_pin(prompt: &str) -> Option<Zeroizing<String>> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .ok()
        .map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["i18ntk", "clean", "--dry-run", "--root", "/tmp/p", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/p")));
        assert!(matches!(cli.command, Commands::Clean(ref a) if a.dry_run));
    }

    #[test]
    fn caller_id_is_prefixed() {
        assert!(caller_id().starts_with("cli:"));
    }
}
