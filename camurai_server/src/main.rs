//! Camurai coordinator daemon
//!
//! Listens for node connections and runs the configured game until Ctrl-C.

use anyhow::{Context, Result};
use camurai_core::{Coordinator, CoordinatorConfig};
use camurai_env::{Acceptor, TcpAcceptor, TokioContext};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "camurai")]
#[command(about = "Coordinator for a grid of light/buzzer/button nodes", long_about = None)]
struct Args {
    /// TOML config file (defaults to ./camurai.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = CoordinatorConfig::load_from(args.config.as_deref())
        .context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let acceptor = TcpAcceptor::bind(config.bind.as_str())
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        addr = ?acceptor.local_addr(),
        mode = ?config.mode,
        grid = %format!("{}x{}", config.grid.width, config.grid.height),
        levels = config.levels.len(),
        "camurai coordinator listening"
    );

    let coordinator = Coordinator::launch(TokioContext::shared(), config)?;
    coordinator
        .serve_until(acceptor, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("stopped");
    Ok(())
}
