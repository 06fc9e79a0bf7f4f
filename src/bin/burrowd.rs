use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use burrow::cli::DaemonOpts;
use burrow::config::DaemonConfig;
use burrow::logger::{Logger, NoopLogger, TextLogger};
use burrow::shell::{Multiplexer, ShellOptions};
use burrow::transfer::TransferServer;
use burrow::vfs::Root;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    let config = DaemonConfig::resolve(&opts)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        if !config.create_root {
            anyhow::bail!(
                "Root directory does not exist: {} (use --create-root)",
                config.root.display()
            );
        }
        std::fs::create_dir_all(&config.root)
            .with_context(|| format!("Failed to create root {}", config.root.display()))?;
    }
    let root = Arc::new(
        Root::open(&config.root)
            .with_context(|| format!("Failed to open root {}", config.root.display()))?,
    );

    let logger: Arc<dyn Logger> = match &config.audit_log {
        Some(path) => Arc::new(TextLogger::new(path)?),
        None => Arc::new(NoopLogger),
    };

    info!("Starting burrow daemon");
    info!("  Root: {}", root.path().display());
    info!("  Shell: {}", config.shell_bind);
    info!("  Transfer: {}", config.transfer_bind);
    if config.shell_bind.starts_with("0.0.0.0") || config.transfer_bind.starts_with("0.0.0.0") {
        warn!("Binding to 0.0.0.0 exposes the unauthenticated, unencrypted services to all interfaces");
    }

    let transfer = TransferServer::bind(&config.transfer_bind, Arc::clone(&root), Arc::clone(&logger))?;
    std::thread::Builder::new()
        .name("burrow-transfer".into())
        .spawn(move || {
            if let Err(e) = transfer.serve() {
                error!("transfer service stopped: {:#}", e);
            }
        })
        .context("Failed to spawn transfer service")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let shell_opts = ShellOptions {
        nick: config.nick.clone(),
        workers: config.workers,
        max_line: config.max_line,
        max_pending: config.max_pending,
    };
    rt.block_on(async move {
        let shell = Multiplexer::bind(&config.shell_bind, root, shell_opts, logger).await?;
        tokio::select! {
            res = shell.run() => res,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        }
    })
}
