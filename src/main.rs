//! OpenSASE Checkout - order lifecycle and inventory reservation service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_checkout::api::{self, AppState};
use opensase_checkout::services::{EventPublisher, NatsPublisher, Notifier, NoopPublisher, PgContacts};
use opensase_checkout::store::{PgStore, Store};
use opensase_checkout::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => {
                info!(%url, "publishing order events to NATS");
                Arc::new(NatsPublisher::new(client))
            }
            Err(e) => {
                warn!(%url, error = %e, "NATS unreachable, order events disabled");
                Arc::new(NoopPublisher)
            }
        },
        None => Arc::new(NoopPublisher),
    };

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.clone()));
    let state = AppState::new(
        store,
        Arc::new(PgContacts::new(db)),
        Notifier::new(publisher),
        config.engine.clone(),
    );
    let app = api::router(state);

    info!("🚀 OpenSASE Checkout listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}
