use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info, instrument};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;
use crate::sink::{EventSink, OutboundMessage, SinkError};

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // The main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();

        gauge!("product_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("product_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "product_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            counter!(
                "product_kafka_broker_tx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.txerrs);
        }
    }
}

pub fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext { liveness })?;

    Ok(producer)
}

/// Headers carried next to the JSON payload.
fn message_headers(message: &OutboundMessage) -> OwnedHeaders {
    let message_id = message.message_id.to_string();
    OwnedHeaders::new()
        .insert(Header {
            key: "content-type",
            value: Some(message.content_type.as_str()),
        })
        .insert(Header {
            key: "label",
            value: Some(message.label.as_str()),
        })
        .insert(Header {
            key: "message-id",
            value: Some(message_id.as_str()),
        })
}

/// Publishes product events to a Kafka topic, keyed by record id.
#[derive(Clone)]
pub struct KafkaEventSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaEventSink {
    pub fn new(config: &KafkaConfig, liveness: HealthHandle) -> Result<Self, KafkaError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);
        let producer = create_kafka_producer(config, liveness)?;

        // Fail start-up if no broker answers within 10 seconds
        drop(producer.client().fetch_metadata(
            Some("__consumer_offsets"),
            Timeout::After(Duration::new(10, 0)),
        )?);
        info!("connected to Kafka brokers");

        Ok(Self {
            producer,
            topic: config.kafka_topic.to_owned(),
        })
    }
}

fn classify(error: &KafkaError) -> SinkError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageSizeTooLarge) => SinkError::NonRetryable(error.to_string()),
        _ => SinkError::Retryable(error.to_string()),
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    #[instrument(skip_all, fields(key = %message.key, message_id = %message.message_id))]
    async fn send(&self, message: OutboundMessage) -> Result<(), SinkError> {
        let record = FutureRecord {
            topic: self.topic.as_str(),
            payload: Some(&message.payload),
            partition: None,
            key: Some(message.key.as_str()),
            timestamp: None,
            headers: Some(message_headers(&message)),
        };

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                counter!("product_kafka_produce_errors_total").increment(1);
                error!("failed to produce product event: {}", err);
                return Err(classify(&err));
            }
        };

        match delivery.await {
            Err(_) => {
                // Cancelled due to timeout while retrying
                counter!("product_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka before write timeout");
                Err(SinkError::Retryable(
                    "delivery cancelled before acknowledgement".to_owned(),
                ))
            }
            Ok(Err((err, _))) => {
                counter!("product_kafka_produce_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", err);
                Err(classify(&err))
            }
            Ok(Ok(_)) => {
                counter!("product_sink_messages_total", "sink" => "kafka").increment(1);
                Ok(())
            }
        }
    }
}
