//! Shared test harness for E2E integration tests.
//!
//! Wires the real pipeline, registry, and correlator through a shared
//! `MockChannel`, exercising the same code paths the gateway runs
//! against a broker.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rtk_adapters::{AdapterRegistry, SiteDefaults, profiles};
use rtk_gateway::correlator::{Correlator, CorrelatorConfig};
use rtk_gateway::metrics::Metrics;
use rtk_gateway::pipeline::{Outcome, Pipeline, PipelineConfig};
use rtk_mqtt_channel::MockChannel;
use rtk_protocol::RawMessage;

/// End-to-end harness: pipeline + registry + correlator over a mock
/// channel.
pub struct TestHarness {
    pub mqtt: Arc<MockChannel>,
    pub pipeline: Arc<Pipeline>,
    pub correlator: Arc<Correlator>,
    pub metrics: Arc<Metrics>,
}

impl TestHarness {
    /// Harness with every built-in vendor profile enabled.
    pub fn with_builtin_profiles() -> Self {
        let mut registry = AdapterRegistry::new();
        for profile in profiles::builtin_profiles() {
            registry.register(profile).expect("unique builtin names");
        }
        Self::with_registry(registry)
    }

    /// Harness over a caller-provided registry.
    pub fn with_registry(registry: AdapterRegistry) -> Self {
        let mqtt = Arc::new(MockChannel::new());
        let metrics = Arc::new(Metrics::new());
        let correlator = Arc::new(Correlator::new(
            CorrelatorConfig::default(),
            metrics.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(RwLock::new(registry)),
            mqtt.clone(),
            correlator.clone(),
            metrics.clone(),
            PipelineConfig {
                uplink_deadline: Duration::from_secs(5),
                downlink_deadline: Duration::from_secs(10),
                defaults: SiteDefaults {
                    tenant: "home".into(),
                    site: "main".into(),
                },
            },
        ));
        Self {
            mqtt,
            pipeline,
            correlator,
            metrics,
        }
    }

    /// Feed one delivery through the pipeline, as the session would.
    pub async fn deliver(&self, topic: &str, payload: &str) -> Outcome {
        self.pipeline
            .process(RawMessage::new(topic, payload.as_bytes().to_vec(), 1, false))
            .await
    }

    /// Same, with the retained flag set.
    pub async fn deliver_retained(&self, topic: &str, payload: &str) -> Outcome {
        let mut raw = RawMessage::new(topic, payload.as_bytes().to_vec(), 1, false);
        raw.retained = true;
        self.pipeline.process(raw).await
    }

    /// Parse the envelope of the last message published to `topic`.
    pub fn last_envelope_on(&self, topic: &str) -> serde_json::Value {
        let published = self.mqtt.on_topic(topic);
        let last = published.last().unwrap_or_else(|| {
            panic!("nothing published to '{topic}'");
        });
        serde_json::from_slice(&last.payload).expect("published envelope is JSON")
    }
}
