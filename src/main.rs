use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;

use cullwatch::{FanInAggregator, NotifyBackend, Settings, log_event};

#[derive(Parser)]
#[command(name = "cullwatch")]
#[command(about = "Watch directory roots and log filesystem changes")]
struct Cli {
    /// Directory roots to watch
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Path to a settings file (defaults to cullwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;

    cullwatch::logging::init_with_config(&settings.logging);

    let aggregator = FanInAggregator::new(Arc::new(NotifyBackend::new()), &settings);

    for root in &cli.roots {
        if let Err(e) = aggregator.watch(root) {
            tracing::warn!("skipping {}: {e}", root.display());
        }
    }
    if aggregator.roots().is_empty() {
        anyhow::bail!("none of the given roots could be watched");
    }

    log_feed(aggregator.subscribe_file_created(), "file created", |e| {
        e.path.display().to_string()
    });
    log_feed(aggregator.subscribe_file_deleted(), "file deleted", |e| {
        e.path.display().to_string()
    });
    log_feed(aggregator.subscribe_file_renamed(), "file renamed", |e| {
        format!("{} -> {}", e.old.path.display(), e.new.path.display())
    });
    log_feed(
        aggregator.subscribe_directory_created(),
        "directory created",
        |e| e.path.display().to_string(),
    );
    log_feed(
        aggregator.subscribe_directory_deleted(),
        "directory deleted",
        |e| e.path.display().to_string(),
    );
    log_feed(
        aggregator.subscribe_directory_renamed(),
        "directory renamed",
        |e| format!("{} -> {}", e.old.path.display(), e.new.path.display()),
    );

    log_event!("cullwatch", "watching", "{} roots", aggregator.roots().len());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    log_event!("cullwatch", "shutting down");
    aggregator.dispose();
    Ok(())
}

fn log_feed<T, F>(mut rx: broadcast::Receiver<T>, label: &'static str, describe: F)
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> String + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    log_event!("fs", label, "{}", describe(&event));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("[fs] {label} feed lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
