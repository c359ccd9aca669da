use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;

use soko_core::config::Config;
use soko_core::mpesa::{DarajaClient, DarajaCredentials};
use soko_core::services::{
    ListingLifecycle, Notifier, PaymentService, ReconciliationEngine, run_sweeper,
};
use soko_core::{AppState, create_app, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("database migrations completed");

    let gateway = DarajaClient::new(
        config.mpesa_base_url.clone(),
        DarajaCredentials {
            consumer_key: config.mpesa_consumer_key.clone(),
            consumer_secret: config.mpesa_consumer_secret.clone(),
            shortcode: config.mpesa_shortcode.clone(),
            passkey: config.mpesa_passkey.clone(),
            callback_url: config.mpesa_callback_url.clone(),
        },
    );
    tracing::info!(base_url = config.mpesa_base_url, "Daraja client initialized");

    let notifier = Notifier::new();
    let lifecycle = ListingLifecycle::new(pool.clone(), notifier.clone());
    let payments = PaymentService::new(pool.clone(), gateway, notifier.clone());
    let reconciliation = ReconciliationEngine::new(pool.clone(), notifier.clone());

    tokio::spawn(run_sweeper(
        pool.clone(),
        lifecycle.clone(),
        payments.clone(),
        notifier,
    ));

    let state = AppState {
        db: pool,
        lifecycle,
        payments,
        reconciliation,
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
