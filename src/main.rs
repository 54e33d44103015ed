use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, prelude::*, reload};

use i18ntk::Config;
use i18ntk::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Initialize logging. The config's level applies once it is loaded,
    // unless RUST_LOG or -v already decided.
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some() || cli.verbose;
    let initial = from_env
        .unwrap_or_else(|| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let (filter, reload_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.strict_config)?;
    if !pinned {
        reload_handle.reload(EnvFilter::new(&config.logging.level))?;
    }

    let root = cli.root.as_deref();
    match cli.command {
        Commands::Admin(args) => cli::admin::run(args, &config).await,
        Commands::Audit(args) => cli::audit::run(args, &config).await,
        Commands::Config(args) => cli::config::run(args, config).await,
        Commands::Paths => cli::paths::run(&config, root),
        Commands::Clean(args) => cli::clean::run(args, &config, root).await,
    }
}
