use anyhow::{Context, Result};
use clap::Parser;
use news_triage::llm_adapter::classifier_from_config;
use news_triage::notifier::notifier_from_url;
use news_triage::server::{self, AppState};
use news_triage::{Config, FetchConfig, PgLedger, Pipeline, RssFeedSource};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "news-triage",
    about = "Polls a news feed, classifies new entries with a language model, and serves the relevant ones"
)]
struct Cli {
    /// Run a single cycle, wait for pending notifications, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env();
    info!(feed = %config.feed_url, "Starting news-triage");
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, classification calls will fail");
    }

    // the only fatal startup step
    let ledger = Arc::new(
        PgLedger::connect(&config.database)
            .await
            .context("failed to initialise the ledger database")?,
    );

    let fetch_config = FetchConfig {
        timeout: config.fetch_timeout,
        ..FetchConfig::default()
    };
    let source = RssFeedSource::new(config.feed_url.clone(), fetch_config)?
        .with_path_filter(config.path_filter.clone());
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(source),
        ledger.clone(),
        classifier_from_config(&config)?,
        notifier_from_url(config.webhook_url.as_deref())?,
        config.poll_interval,
    ));

    if cli.once {
        let report = pipeline.cycle().await;
        pipeline.drain_notifications().await;
        ledger.close().await;
        info!(?report, "Single cycle complete");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = {
        let state = AppState::new(ledger.clone(), config.max_items);
        let bind_addr = config.bind_addr.clone();
        let mut stop = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind HTTP server on {}: {}", bind_addr, e);
                    return;
                }
            };
            let shutdown = async move {
                let _ = stop.wait_for(|stopped| *stopped).await;
            };
            if let Err(e) = server::serve(listener, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let mut runner = {
        let pipeline = pipeline.clone();
        let stop = shutdown_rx.clone();
        tokio::spawn(async move { pipeline.run(stop).await })
    };

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // In-flight requests get the grace period.
    let grace = config.shutdown_grace;
    let server_abort = server.abort_handle();
    if tokio::time::timeout(grace, server).await.is_err() {
        warn!("HTTP server did not stop within {}s, closing", grace.as_secs());
        server_abort.abort();
    }

    // The in-flight item is allowed to finish; a second signal cancels it.
    tokio::select! {
        _ = &mut runner => {}
        _ = wait_for_shutdown_signal() => {
            warn!("Second signal received, cancelling the in-flight cycle");
            runner.abort();
        }
    }

    if tokio::time::timeout(grace, pipeline.drain_notifications())
        .await
        .is_err()
    {
        warn!("Pending notifications did not finish within {}s", grace.as_secs());
    }

    ledger.close().await;
    info!("news-triage stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM ({}), waiting for Ctrl-C only", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
