//! Periodically forward pending product changes to the event sink.
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use product_common::app::service_router;
use product_common::health::HealthRegistry;
use product_common::metrics::{serve, setup_metrics_recorder};
use product_common::schedule::run_stage_loop;
use product_common::sink::{EventSink, KafkaEventSink, PrintSink};
use product_common::store::PgRecordStore;
use product_publisher::config::{Config, SinkKind};
use product_publisher::publisher::PublishStage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let stage_liveness = liveness
        .register(
            "publish".to_string(),
            time::Duration::try_from(config.publish_interval_secs.0 * 2)?,
        )
        .await;

    let sink: Arc<dyn EventSink + Send + Sync> = match config.sink {
        SinkKind::Kafka => {
            let kafka_liveness = liveness
                .register("rdkafka".to_string(), time::Duration::seconds(30))
                .await;
            Arc::new(KafkaEventSink::new(&config.kafka, kafka_liveness)?)
        }
        SinkKind::Print => {
            info!("printing product events instead of producing them");
            Arc::new(PrintSink {})
        }
    };

    let store = PgRecordStore::new(&config.database_url, config.max_pg_connections).await?;
    store.migrate().await?;
    let stage = Arc::new(PublishStage::new(Arc::new(store), sink, config.label()));

    let recorder_handle = setup_metrics_recorder()?;
    let router = service_router("product-publisher", liveness, Some(recorder_handle));
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    run_stage_loop(
        "publish",
        config.publish_interval_secs.0,
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
