//! Periodically reconcile the source feed into the product store.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use product_common::app::service_router;
use product_common::feed::HttpSourceFeed;
use product_common::health::HealthRegistry;
use product_common::metrics::{serve, setup_metrics_recorder};
use product_common::schedule::run_stage_loop;
use product_common::store::PgRecordStore;
use product_ingest::config::Config;
use product_ingest::ingest::IngestStage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    // A run may take the whole period, allow for one missed tick on top of it
    let stage_liveness = liveness
        .register(
            "ingest".to_string(),
            time::Duration::try_from(config.ingest_interval_secs.0 * 2)?,
        )
        .await;

    let store = PgRecordStore::new(&config.database_url, config.max_pg_connections).await?;
    store.migrate().await?;
    let feed = HttpSourceFeed::new(&config.source_feed_url, config.source_feed_timeout_ms.0)?;
    let stage = Arc::new(IngestStage::new(Arc::new(feed), Arc::new(store)));

    let recorder_handle = setup_metrics_recorder()?;
    let router = service_router("product-ingest", liveness, Some(recorder_handle));
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    run_stage_loop(
        "ingest",
        config.ingest_interval_secs.0,
        config.run_on_startup,
        stage_liveness,
        move || {
            let stage = stage.clone();
            async move {
                // Failures are logged and counted by the stage, the next tick retries
                drop(stage.run().await);
            }
        },
    )
    .await;

    Ok(())
}
