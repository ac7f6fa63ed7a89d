//! Serve the product records and accept price corrections over HTTP.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use product_api::config::Config;
use product_api::handlers::{add_routes, AppState};
use product_common::app::service_router;
use product_common::health::HealthRegistry;
use product_common::metrics::{serve, setup_metrics_recorder};
use product_common::prices::{PriceStatusPolicy, PriceUpdater};
use product_common::store::{PgRecordStore, RecordStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let store = PgRecordStore::new(&config.database_url, config.max_pg_connections)
        .await?
        .with_list_statement(config.list_statement.clone());
    store.migrate().await?;
    let store: Arc<dyn RecordStore + Send + Sync> = Arc::new(store);

    let policy = PriceStatusPolicy::from_marks_updated(config.price_update_marks_updated);
    let state = AppState {
        store: store.clone(),
        prices: Arc::new(PriceUpdater::new(store, policy)),
        hide_status: config.hide_status,
    };

    let liveness = HealthRegistry::new("liveness");
    let http_liveness = liveness
        .register("http".to_string(), time::Duration::seconds(60))
        .await;
    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            http_liveness.report_healthy().await;
        }
    });

    let recorder_handle = setup_metrics_recorder()?;
    let router = add_routes(
        service_router("product-api", liveness, Some(recorder_handle)),
        state,
    );

    serve(router, &config.bind()).await?;

    Ok(())
}
