//! CLI subcommand: `i18ntk clean`
//!
//! Removes the report output directory. Privileged: requires the admin PIN
//! when one is active.

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

use super::{privileged, security_context};
use crate::config::Config;
use crate::security::{EntryKind, ListOptions, SafeFs};

#[derive(Args)]
pub struct CleanArgs {
    /// Show what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: CleanArgs, config: &Config, cli_root: Option<&Path>) -> Result<()> {
    let ctx = security_context(config)?;
    let scope = ctx.enter();

    let root = config.project_root(cli_root)?;
    let fs = config.project_fs(&root, scope.log().clone())?;
    let target = config.project.output_dir.as_str();

    // Resolve first so a bad output_dir is reported before any prompt.
    let resolved = fs
        .resolve(target)
        .with_context(|| format!("Refusing to clean {}", target))?;
    if !fs.exists(target) {
        println!("Nothing to clean ({} does not exist).", resolved.display());
        return Ok(());
    }

    let (files, bytes) = summarize(&fs, target)?;
    if args.dry_run {
        println!(
            "Would remove {} ({} file(s), {} bytes).",
            resolved.display(),
            files,
            bytes
        );
        return Ok(());
    }

    privileged(&scope, || {
        fs.delete(target)?;
        println!(
            "Removed {} ({} file(s), {} bytes).",
            resolved.display(),
            files,
            bytes
        );
        Ok(())
    })
}

fn summarize(fs: &SafeFs, target: &str) -> Result<(usize, u64)> {
    let stat = fs.stat(target)?;
    if stat.is_file {
        return Ok((1, stat.size));
    }

    let options = ListOptions {
        recursive: true,
        ..ListOptions::default()
    };
    let entries = fs.list(target, &options)?;
    let files = entries.iter().filter(|e| e.kind == EntryKind::File);
    Ok(files.fold((0, 0), |(n, size), e| (n + 1, size + e.size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityLog;
    use std::sync::Arc;

    #[test]
    fn summarize_counts_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = SafeFs::open(tmp.path(), Arc::new(SecurityLog::disabled())).unwrap();
        fs.write("reports/a.json", "12345").unwrap();
        fs.write("reports/nested/b.json", "123").unwrap();

        let (files, bytes) = summarize(&fs, "reports").unwrap();
        assert_eq!(files, 2);
        assert_eq!(bytes, 8);
    }

    #[test]
    fn summarize_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = SafeFs::open(tmp.path(), Arc::new(SecurityLog::disabled())).unwrap();
        fs.write("report.txt", "abc").unwrap();

        assert_eq!(summarize(&fs, "report.txt").unwrap(), (1, 3));
    }
}
