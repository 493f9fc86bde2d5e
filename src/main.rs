//! xss-lock - use an external locker as X screen saver.
//!
//! Runs the locker when the X server reports the session idle, and ties it
//! into systemd-logind so the screen is locked before the system sleeps.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use xss_lock::config::Config;
use xss_lock::orchestrator;

/// Use an external locker as X screen saver.
///
/// Also locks when logind asks for it and before the system goes to sleep.
#[derive(Parser, Debug)]
#[command(name = "xss-lock")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run CMD when the screen saver activates.
    #[arg(short, long, value_name = "CMD")]
    notifier: Option<String>,

    /// Pass the sleep delay lock file descriptor to the locker.
    #[arg(short = 'l', long)]
    transfer_sleep_lock: bool,

    /// Don't delay sleep for locking.
    #[arg(long)]
    ignore_sleep: bool,

    /// logind session id (default: session of this process).
    #[arg(short, long, value_name = "ID")]
    session: Option<String>,

    /// Locker command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "LOCK_CMD")]
    locker: Vec<String>,
}

impl Args {
    /// Command-line values take precedence over the config file.
    fn apply(self, config: &mut Config) {
        if !self.locker.is_empty() {
            config.locker = self.locker;
        }
        if self.notifier.is_some() {
            config.notifier = self.notifier;
        }
        if self.session.is_some() {
            config.session_id = self.session;
        }
        config.transfer_sleep_lock |= self.transfer_sleep_lock;
        config.ignore_sleep |= self.ignore_sleep;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("xss-lock v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    debug!("Configuration: {:?}", config);

    orchestrator::run(&config).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("xss_lock={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}
