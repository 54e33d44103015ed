//! CLI subcommand: `i18ntk admin`
//!
//! Sets up, checks and toggles the admin PIN that guards privileged commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::warn;
use zeroize::Zeroizing;

use super::{caller_id, pin_source, privileged, security_context};
use crate::config::Config;
use crate::security::{
    MAX_PIN_LEN, MIN_PIN_LEN, PinPrompt, SecurityContext, is_valid_pin_format, is_weak_pin,
};

#[derive(Args)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub command: AdminCommands,
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Show whether an admin PIN is configured and enabled
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set or change the admin PIN
    SetPin,

    /// Check a PIN without running anything
    Verify,

    /// Stop requiring the admin PIN
    Disable,

    /// Require the admin PIN again
    Enable,
}

pub async fn run(args: AdminArgs, config: &Config) -> Result<()> {
    let ctx = security_context(config)?;
    let scope = ctx.enter();

    match args.command {
        AdminCommands::Status { json } => show_status(&scope, json),
        AdminCommands::SetPin => set_pin(&scope),
        AdminCommands::Verify => verify_pin(&scope),
        AdminCommands::Disable => toggle(&scope, false),
        AdminCommands::Enable => toggle(&scope, true),
    }
}

fn show_status(ctx: &SecurityContext, json: bool) -> Result<()> {
    let summary = ctx.credentials().summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let settings = ctx.settings();
    println!("Admin PIN:        {}", summary.state);
    if let Some(ref algorithm) = summary.algorithm {
        println!("Algorithm:        {}", algorithm);
    }
    if let Some(created) = summary.created_at {
        println!("Created:          {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Record:           {}", ctx.credentials().path().display());
    println!(
        "Session timeout:  {}s",
        settings.session_timeout.as_secs()
    );
    println!(
        "Lockout:          {} attempts per {}s",
        settings.max_attempts,
        settings.lockout_window.as_secs()
    );
    println!(
        "Audit log:        {}",
        if ctx.log().is_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

fn set_pin(ctx: &SecurityContext) -> Result<()> {
    privileged(ctx, || {
        let pin = read_new_pin()?;
        if is_weak_pin(&pin) {
            warn!("New admin PIN is easy to guess");
            eprintln!("Warning: this PIN is easy to guess. Consider a less predictable one.");
        }
        if !ctx.credentials().setup(&pin) {
            anyhow::bail!("Failed to store the admin PIN");
        }
        println!("Admin PIN set.");
        Ok(())
    })
}

fn read_new_pin() -> Result<Zeroizing<String>> {
    let pin = dialoguer::Password::new()
        .with_prompt(format!("New admin PIN ({}-{} digits)", MIN_PIN_LEN, MAX_PIN_LEN))
        .with_confirmation("Repeat PIN", "PINs do not match")
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| anyhow::anyhow!("PIN entry aborted: {}", e))?;

    if !is_valid_pin_format(&pin) {
        anyhow::bail!("PIN must be {} to {} digits", MIN_PIN_LEN, MAX_PIN_LEN);
    }
    Ok(pin)
}

fn verify_pin(ctx: &SecurityContext) -> Result<()> {
    if !ctx.credentials().is_configured() {
        anyhow::bail!("No admin PIN is configured. Run `i18ntk admin set-pin` first.");
    }

    let caller = caller_id();
    let prompt = PinPrompt {
        attempt: 0,
        remaining_attempts: ctx.lockout().remaining_attempts(&caller),
    };
    let mut source = pin_source();
    let Some(pin) = source(prompt) else {
        anyhow::bail!("No PIN entered");
    };

    let result = ctx.prompt_and_verify(&pin, &caller);
    if result.success {
        println!("PIN accepted.");
    } else if result.locked {
        let secs = result.retry_after.map(|d| d.as_secs().max(1)).unwrap_or(0);
        println!("Locked out. Try again in {}s.", secs);
    } else {
        println!(
            "PIN rejected. {} attempt(s) remaining.",
            result.remaining_attempts
        );
    }
    Ok(())
}

fn toggle(ctx: &SecurityContext, enabled: bool) -> Result<()> {
    if !ctx.credentials().is_configured() {
        anyhow::bail!("No admin PIN is configured. Run `i18ntk admin set-pin` first.");
    }
    if ctx.credentials().is_enabled() == enabled {
        println!(
            "Admin PIN is already {}.",
            if enabled { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    privileged(ctx, || {
        ctx.credentials().set_enabled(enabled)?;
        println!(
            "Admin PIN {}.",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    })
}
