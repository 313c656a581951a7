use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockpulse_core::config::Settings;
use stockpulse_core::ingest::provider::{HttpRatingsClient, RatingsSource};
use stockpulse_core::storage::lock::SyncLock;
use stockpulse_core::storage::stocks::PgStockStore;
use stockpulse_core::sync::StockSyncTask;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "stockpulse_worker")]
struct Args {
    /// Run a single sync and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Fetch from upstream and report, without touching the database.
    #[arg(long)]
    dry_run: bool,

    /// Override SYNC_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Override SYNC_BATCH_SIZE.
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let client = Arc::new(HttpRatingsClient::from_settings(&settings)?);
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    if args.dry_run {
        let records = client.fetch_all(&cancel).await?;
        tracing::info!(dry_run = true, records = records.len(), "fetched ratings (dry-run)");
        return Ok(());
    }

    let pool = stockpulse_core::storage::connect(&settings.database_url, 5).await?;
    stockpulse_core::storage::migrate(&pool).await?;

    let Some(lock) = SyncLock::try_acquire(&pool).await? else {
        tracing::warn!("sync lock not acquired; another worker is running");
        return Ok(());
    };

    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(settings.sync_interval);
    let batch_size = args.batch_size.unwrap_or(settings.sync_batch_size);

    let task = Arc::new(
        StockSyncTask::new(client, Arc::new(PgStockStore::new(pool)))
            .with_interval(interval)
            .with_batch_size(batch_size),
    );

    if args.once {
        let result = task.sync_once(&cancel).await;
        let _ = lock.release().await;
        let report = result.map_err(|err| {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            err
        })?;
        tracing::info!(fetched = report.fetched, chunks = report.chunks, "sync complete");
        return Ok(());
    }

    let mut handle = {
        let task = task.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { task.run(cancel).await })
    };

    tokio::select! {
        res = &mut handle => {
            if let Err(err) = res {
                tracing::error!(error = %err, "sync task panicked");
            }
        }
        _ = cancel.cancelled() => {
            tracing::info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "waiting for sync task to stop");
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => tracing::info!("graceful shutdown completed"),
                Err(_) => {
                    tracing::warn!("shutdown timed out; abandoning in-flight sync");
                    handle.abort();
                }
            }
        }
    }

    if let Err(err) = lock.release().await {
        tracing::warn!(error = %err, "failed to release sync lock");
    }
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
    cancel.cancel();
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(settings.environment.clone().into()),
            ..Default::default()
        },
    )))
}
