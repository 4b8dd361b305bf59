use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use inbox_relay::channels::{DiscordWebhook, ImapMailbox};
use inbox_relay::config::{LOG_DIR_ENV, RelayConfig};
use inbox_relay::error::Error;
use inbox_relay::pipeline::dispatcher::Dispatcher;
use inbox_relay::pipeline::processor::{Relay, RunSummary};
use inbox_relay::store::FileStore;

const LOG_FILE_PREFIX: &str = "inbox-relay.log";

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage. Err means one is
    // already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _log_guard = match init_tracing() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    eprintln!("📬 inbox-relay v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(summary) => {
            println!("{summary}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Relay run aborted");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<RunSummary, Error> {
    let config = RelayConfig::from_env()?;
    let rules = config.rules.load()?;
    info!(
        rules = rules.len(),
        state = %config.state_path.display(),
        mailbox = %config.mailbox.mailbox,
        "Configuration loaded"
    );

    let mailbox = Arc::new(ImapMailbox::new(config.mailbox.clone()));
    let dispatcher = Dispatcher::new(
        Arc::new(DiscordWebhook::new()),
        config.retry.clone(),
        config.post_timeout,
        config.max_concurrency,
    );
    let store = Arc::new(FileStore::new(config.state_path.clone()));
    let relay = Relay::new(rules, mailbox, dispatcher, store, config.run_settings());

    tokio::select! {
        result = relay.run_once() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; processed state was not saved");
            Err(Error::Interrupted)
        }
    }
}

/// Stderr logging, plus a daily-rolling file when `INBOX_RELAY_LOG_DIR` is set.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV).ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let dir = Path::new(&dir);
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}
