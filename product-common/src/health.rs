//! Liveness of the stage loops and the Kafka producer.
//!
//! Each long-running component registers with a deadline and must report again before it
//! runs out. The process is live while every component has a fresh report, so a registry
//! with nothing registered yet is not live.

use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let code = match self.healthy {
            true => StatusCode::OK,
            false => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, format!("{:?}", self)).into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, no report yet
    Starting,
    HealthyUntil(OffsetDateTime),
    /// Past its deadline
    Stalled,
}

type Report = (String, ComponentStatus);

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<Report>,
}

impl HealthHandle {
    fn healthy(&self) -> Report {
        (
            self.component.clone(),
            ComponentStatus::HealthyUntil(OffsetDateTime::now_utc().add(self.deadline)),
        )
    }

    pub async fn report_healthy(&self) {
        if let Err(err) = self.sender.send(self.healthy()).await {
            warn!(component = %self.component, "failed to report health: {}", err)
        }
    }

    /// For rdkafka callbacks, which run outside the tokio runtime.
    pub fn report_healthy_blocking(&self) {
        if let Err(err) = self.sender.blocking_send(self.healthy()) {
            warn!(component = %self.component, "failed to report health: {}", err)
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<Report>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Report>(16);
        let components: Arc<RwLock<HashMap<String, ComponentStatus>>> = Default::default();

        let updated = components.clone();
        tokio::spawn(async move {
            while let Some((component, status)) = receiver.recv().await {
                match updated.write() {
                    Ok(mut map) => _ = map.insert(component, status),
                    Err(_) => warn!("poisoned HealthRegistry lock"),
                }
            }
        });

        Self {
            name: name.to_owned(),
            components,
            sender,
        }
    }

    /// The component starts out as `Starting` and must report within every `deadline`.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        if let Err(err) = self
            .sender
            .send((component.clone(), ComponentStatus::Starting))
            .await
        {
            warn!(%component, "failed to register: {}", err)
        }

        HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let components: HashMap<String, ComponentStatus> = components
            .iter()
            .map(|(name, status)| {
                let status = match status {
                    ComponentStatus::HealthyUntil(until) if *until <= now => {
                        ComponentStatus::Stalled
                    }
                    other => other.clone(),
                };
                (name.clone(), status)
            })
            .collect();
        let healthy = !components.is_empty()
            && components
                .values()
                .all(|status| matches!(status, ComponentStatus::HealthyUntil(_)));

        match healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, components),
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}
