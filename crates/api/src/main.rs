use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockpulse_core::config::Settings;
use stockpulse_core::query::StockQueryService;
use stockpulse_core::scoring::ScoringEngine;
use stockpulse_core::storage::stocks::PgStockStore;

mod envelope;
mod routes;

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

    let query = match init_pool(&settings).await {
        Ok(pool) => Some(StockQueryService::new(
            Arc::new(PgStockStore::new(pool)),
            ScoringEngine::default(),
        )),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            let reason = format!("{e:#}");
            tracing::error!(error = %reason, "database init failed; starting API in degraded mode");
            None
        }
    };

    let mut app = routes::router(routes::AppState { query })
        .layer(routes::cors_layer(&settings.allowed_origins));
    if settings.enable_request_logs {
        app = app.layer(TraceLayer::new_for_http());
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    tracing::info!(%addr, environment = %settings.environment, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn init_pool(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let pool = stockpulse_core::storage::connect(&settings.database_url, 10).await?;
    stockpulse_core::storage::migrate(&pool).await?;
    Ok(pool)
}

async fn shutdown_signal() {
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
