//! zubot-core process entry point: parses CLI overrides, loads config,
//! starts the `Daemon`, serves the Control API, and shuts down gracefully
//! on SIGTERM/SIGINT — the same construct/run/shutdown shape as the
//! teacher's `Server`, collapsed onto one `Daemon` + one `axum::serve`.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use zubot_core::api::{create_router, AppState};
use zubot_core::daemon::Daemon;
use zubot_core::runner::AgenticRegistry;
use shared::config::ConfigManager;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Command-line arguments for the daemon.
#[derive(Parser, Debug)]
#[command(name = "zubot-core")]
#[command(about = "Local-first task scheduling and automation daemon", long_about = None)]
struct CliArgs {
    /// Path to the config file (or a directory containing `zubot_core.toml`).
    #[arg(value_name = "CONFIG_FILE", default_value = "./data")]
    config_file: PathBuf,

    /// Directory for the database, run logs, and other daemon state.
    #[arg(long = "data-dir", value_name = "DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Override the Control API bind address from the config file.
    #[arg(long = "bind-addr", value_name = "ADDRESS")]
    bind_addr: Option<String>,

    /// Override the task runner concurrency from the config file.
    #[arg(long = "concurrency", value_name = "N")]
    concurrency: Option<usize>,

    /// Start with the central service loops disabled regardless of config.
    #[arg(long = "no-autostart")]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "zubot-core.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("core=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(config_file = %cli_args.config_file.display(), "zubot-core starting up");

    let mut config_manager = match ConfigManager::new(cli_args.config_file) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let mut overridden = false;
    if let Some(bind_addr) = cli_args.bind_addr {
        info!("Control API bind address override provided via command line");
        config_manager.config.control_api_bind_addr = bind_addr;
        overridden = true;
    }
    if let Some(concurrency) = cli_args.concurrency {
        info!("task runner concurrency override provided via command line");
        config_manager.config.task_runner_concurrency = concurrency;
        overridden = true;
    }
    if cli_args.no_autostart {
        config_manager.config.central_service_enabled = false;
        overridden = true;
    }
    if overridden {
        if let Err(e) = config_manager.config.validate() {
            error!(error = %e, "invalid configuration after overrides");
            std::process::exit(1);
        }
        if let Err(e) = config_manager.save() {
            error!(error = %e, "failed to persist configuration overrides");
            std::process::exit(1);
        }
        info!("configuration overrides applied and persisted to disk");
    }

    std::fs::create_dir_all(&cli_args.data_dir)
        .with_context(|| format!("creating data directory {}", cli_args.data_dir.display()))?;

    let registry = Arc::new(AgenticRegistry::new());
    let daemon = match Daemon::start(config_manager.config.clone(), &cli_args.data_dir, registry, None).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to start daemon");
            std::process::exit(1);
        }
    };

    let bind_addr = daemon.config().control_api_bind_addr.clone();
    let app = create_router(AppState::new(daemon.handles()));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding Control API listener to {bind_addr}"))?;
    info!(bind_addr = %bind_addr, "Control API listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Control API server error");
    }

    daemon.shutdown().await;
    info!("zubot-core shutdown complete");
    Ok(())
}

/// Waits for SIGTERM or SIGINT on Unix, Ctrl+C elsewhere, falling back to
/// Ctrl+C if signal registration itself fails.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to register signal handlers, falling back to Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to wait for Ctrl+C");
                } else {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to receive Ctrl+C");
        } else {
            info!("received Ctrl+C");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_args_accept_minimal_invocation() {
        let args = CliArgs::parse_from(["zubot-core"]);
        assert_eq!(args.data_dir, PathBuf::from("./data"));
        assert!(args.bind_addr.is_none());
        assert!(!args.no_autostart);
    }

    #[test]
    fn cli_args_parse_overrides() {
        let args = CliArgs::parse_from([
            "zubot-core",
            "./data",
            "--bind-addr",
            "127.0.0.1:9090",
            "--concurrency",
            "4",
            "--no-autostart",
        ]);
        assert_eq!(args.bind_addr.as_deref(), Some("127.0.0.1:9090"));
        assert_eq!(args.concurrency, Some(4));
        assert!(args.no_autostart);
    }
}
