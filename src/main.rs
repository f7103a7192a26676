use anyhow::Result;
use clap::{Parser, ValueEnum};
use keyed_throttle::{Batch, CancellationToken, ThrottleConfig, Throttler};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Throttle `key<delimiter>value` lines read from stdin and print each
/// released batch.
#[derive(Debug, Parser)]
#[command(name = "keyed-throttle", version, about)]
struct Cli {
    /// Minimum spacing between two deliveries for the same key
    #[arg(
        long,
        env = "RELEASE_INTERVAL",
        default_value = "10s",
        value_parser = humantime_serde::re::humantime::parse_duration
    )]
    release_interval: Duration,

    /// Separator between key and value on each input line
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Output format for released batches
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log level for the keyed_throttle target
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout only carries deliveries
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("keyed_throttle={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let format = cli.format;
    let throttler = Throttler::new(
        ThrottleConfig::new(cli.release_interval),
        move |_cancel: CancellationToken, batch: Batch<String>| async move {
            print_batch(format, &batch)
        },
    )
    .map_err(|e| anyhow::anyhow!("Failed to create throttler: {}", e))?;

    tracing::info!(
        "Starting keyed-throttle with release_interval={:?}",
        throttler.release_interval()
    );

    let cancel = CancellationToken::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => match parse_line(&line, cli.delimiter) {
                        Some((key, value)) => throttler.submit(&cancel, key, value.to_string()),
                        None => tracing::warn!("Skipping malformed line: {:?}", line),
                    },
                    None => {
                        tracing::info!("Input closed");
                        break;
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    finish(&throttler, &cancel).await;

    Ok(())
}

/// Deliver whatever is still pending, then cancel outstanding work.
async fn finish<T: Send + 'static>(throttler: &Throttler<T>, cancel: &CancellationToken) {
    throttler.shutdown().await;
    cancel.cancel();
}

/// Split a line into its key and value at the first delimiter.
fn parse_line(line: &str, delimiter: char) -> Option<(&str, &str)> {
    let (key, value) = line.trim_end_matches(['\r', '\n']).split_once(delimiter)?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn print_batch(format: OutputFormat, batch: &Batch<String>) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("key[{}] values[{}]", batch.key, batch.items.join(", "));
        }
        OutputFormat::Json => {
            let line = serde_json::json!({
                "key": batch.key,
                "values": batch.items,
                "instant": batch.instant,
            });
            println!("{}", serde_json::to_string(&line)?);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, flushing pending batches");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, flushing pending batches");
        },
    }
}
