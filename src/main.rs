// SPDX-License-Identifier: MIT
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use modeld::config::Config;
use modeld::dispatcher::{HostingMode, SessionDispatcher};
use modeld::session::basic::BasicAnalysisFactory;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "modeld",
    about = "Modeling-language analysis host — WebSocket session dispatcher",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// WebSocket listener port
    #[arg(long, env = "MODELD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "MODELD_BIND")]
    bind_address: Option<String>,

    /// Remote transport endpoint override (ws://host:port)
    #[arg(long, env = "MODELD_ENDPOINT")]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MODELD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "MODELD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Path to a TOML config file (default: ./modeld.toml)
    #[arg(long, env = "MODELD_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the analysis host in the foreground (default when no subcommand given).
    ///
    /// Accepts WebSocket connections and runs one analysis session per
    /// connection until Ctrl-C / SIGTERM.
    ///
    /// Examples:
    ///   modeld serve
    ///   modeld
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).with_overrides(
        args.port,
        args.bind_address,
        args.endpoint,
        args.log,
    );

    // Init once — must happen before any tracing calls.
    let _file_guard = setup_logging(
        &config.host.log,
        args.log_file.as_deref(),
        &config.host.log_format,
    );

    match args.command {
        None | Some(Command::Serve) => run_serve(config).await,
    }
}

async fn run_serve(config: Config) -> Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(
        addr = %addr,
        version = env!("CARGO_PKG_VERSION"),
        "modeld listening"
    );

    let dispatcher = SessionDispatcher::new(HostingMode::Multi, Arc::new(BasicAnalysisFactory));
    dispatcher.run(listener).await?;
    info!("modeld stopped");
    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("modeld.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
