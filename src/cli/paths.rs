//! CLI subcommand: `i18ntk paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;

pub fn run(config: &Config, cli_root: Option<&Path>) -> Result<()> {
    let paths = &config.paths;

    println!("i18ntk Paths (XDG Base Directory)");
    println!("=================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  credentials:    {}", paths.credential_dir().display());
    println!("  admin PIN:      {}", paths.credential_file().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!(
        "  audit log:      {}{}",
        paths.audit_log().display(),
        if config.security.audit_log {
            ""
        } else {
            " (disabled)"
        }
    );
    println!();
    match config.project_root(cli_root) {
        Ok(root) => {
            println!("Project:    {}", root.display());
            println!("  locales:        {}", root.join(&config.project.locales_dir).display());
            println!("  reports:        {}", root.join(&config.project.output_dir).display());
        }
        Err(e) => println!("Project:    (unavailable: {})", e),
    }

    Ok(())
}
