//! Mimic - connection worker binary.
//!
//! Started by a controller with one JSON session configuration, either as the
//! first argument or from a file. Connects back to the controller's control
//! socket and serves connection or certificate requests until the control
//! channel closes or the process is interrupted.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use mimic_core::SessionConfig;
use mimic_proxy::WorkerServer;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mimic - browser-shaped TLS connection worker
#[derive(Parser, Debug)]
#[command(name = "mimic", version, about)]
struct Args {
    /// Session configuration as a JSON object
    #[arg(value_name = "CONFIG_JSON", required_unless_present = "config")]
    config_json: Option<String>,

    /// Read the session configuration from a file instead
    #[arg(long, value_name = "PATH", conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let json = match (&self.config_json, &self.config) {
            (Some(json), _) => json.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {:?}", path))?,
            (None, None) => anyhow::bail!("no session configuration given"),
        };
        let mut config = SessionConfig::from_json(&json).context("invalid session configuration")?;
        config.debug |= self.debug;
        Ok(config)
    }
}

/// Initialize logging to stderr and, when possible, a daily log file.
///
/// Stdout stays free of log output.
fn init_logging(args: &Args, config: &SessionConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if config.debug_data {
        "trace"
    } else if config.debug {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mimic={lvl},mimic_core={lvl},mimic_proxy={lvl},warn",
            lvl = log_level
        ))
    });

    let log_dir = config.resolved_storage_dir().ok().map(|dir| dir.join("logs"));
    if let Some(appender) = log_dir.as_deref().and_then(file_appender) {
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();

        tracing::info!("Logging to {:?}", log_dir);
        return Some(guard);
    }

    // Fallback: stderr only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using stderr only");
    None
}

fn file_appender(log_dir: &Path) -> Option<RollingFileAppender> {
    std::fs::create_dir_all(log_dir).ok()?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix("mimic")
        .filename_suffix("log")
        .build(log_dir)
        .ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.session_config()?;
    let _guard = init_logging(&args, &config);

    tracing::info!(
        "Starting mimic {} in {} mode",
        env!("CARGO_PKG_VERSION"),
        config.mode.as_str()
    );

    let handle = WorkerServer::new(config)?.start();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
        _ = handle.stopping() => {}
    }

    handle.stop().await.context("worker failed")?;
    Ok(())
}
