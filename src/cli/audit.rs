//! CLI subcommand: `i18ntk audit`
//!
//! Prints the security event log and checks its hash chain.

use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::security::{self, AuditEntry, Charset, sanitize};

#[derive(Args)]
pub struct AuditArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Filter by action (e.g., auth_failed, sandbox_violation)
    #[arg(long)]
    pub filter: Option<String>,

    /// Only show the last N entries
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

pub async fn run(args: AuditArgs, config: &Config) -> Result<()> {
    let state_dir = &config.paths.state_dir;
    let entries = security::read_audit_log(state_dir)?;

    if entries.is_empty() && !config.security.audit_log {
        println!("No audit log entries. Event logging is off; enable it with:");
        println!("  i18ntk config set security.audit_log true");
        return Ok(());
    }

    // Chain state is computed over the full log, not the filtered view.
    let broken = security::verify_audit_chain(state_dir)?;

    let filter = args
        .filter
        .as_deref()
        .map(|f| sanitize(f, Charset::Identifier, 64));
    let mut shown: Vec<(usize, &AuditEntry)> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            filter
                .as_deref()
                .is_none_or(|f| e.action.as_str() == f)
        })
        .collect();
    if let Some(limit) = args.limit {
        let skip = shown.len().saturating_sub(limit);
        shown.drain(..skip);
    }

    if args.json {
        let view: Vec<&AuditEntry> = shown.iter().map(|(_, e)| *e).collect();
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if shown.is_empty() {
        if filter.is_some() {
            println!("No audit log entries matching filter.");
        } else {
            println!("No audit log entries.");
        }
        return Ok(());
    }

    match filter {
        Some(ref f) => println!(
            "Security Event Log ({} of {} entries, filter: {}):",
            shown.len(),
            entries.len(),
            f
        ),
        None => println!("Security Event Log ({} entries):", shown.len()),
    }
    println!();

    for (i, entry) in &shown {
        println!("  {}", format_entry(entry, broken.contains(i)));
    }

    println!();
    if broken.is_empty() {
        println!("Chain: intact");
    } else {
        println!(
            "Chain: {} broken link(s) at entries {:?}",
            broken.len(),
            broken
        );
    }

    Ok(())
}

fn format_entry(entry: &AuditEntry, broken: bool) -> String {
    let mut line = format!(
        "{} {:<20} source={}",
        entry.ts,
        entry.action.as_str(),
        entry.source
    );
    if let Some(ref subject) = entry.subject {
        line.push_str(&format!(" subject={}", subject));
    }
    if let Some(ref detail) = entry.detail {
        line.push_str(&format!(" ({})", detail));
    }
    if entry.action.is_alert() {
        line.push_str(" [ALERT]");
    }
    if broken {
        line.push_str(" [CHAIN BROKEN]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::AuditAction;

    fn entry(action: AuditAction, subject: Option<&str>) -> AuditEntry {
        AuditEntry {
            ts: "2026-01-01T00:00:00Z".to_string(),
            action,
            source: "auth".to_string(),
            subject: subject.map(String::from),
            detail: None,
            prev_entry_sha256: String::new(),
        }
    }

    #[test]
    fn format_marks_broken_links() {
        let line = format_entry(&entry(AuditAction::AuthSucceeded, Some("cli:alice")), true);
        assert!(line.contains("auth_succeeded"));
        assert!(line.contains("subject=cli:alice"));
        assert!(line.ends_with("[CHAIN BROKEN]"));
    }

    #[test]
    fn format_plain_entry() {
        let line = format_entry(&entry(AuditAction::SessionCreated, None), false);
        assert!(!line.contains("subject="));
        assert!(!line.contains("[CHAIN BROKEN]"));
    }
}
