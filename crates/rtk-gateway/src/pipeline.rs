//! Translation pipeline: ingest, classify, match, transform, publish.
//!
//! A fixed pool of workers consumes raw deliveries; the dispatcher pins
//! each source topic to one worker by consistent hash, so messages from
//! the same topic publish in arrival order while distinct topics run in
//! parallel. Every accepted message ends as exactly one of: a publish,
//! a recorded drop with a stable reason, or a correlation update.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use rtk_adapters::{AdapterRegistry, InflightMessage, SiteDefaults, TransformError,
    TransformErrorKind};
use rtk_mqtt_channel::Channel;
use rtk_protocol::{
    CanonicalEnvelope, CmdStage, Direction, MsgType, PublishClass, RawMessage, TopicCoordinates,
    topics,
};

use crate::correlator::Correlator;
use crate::metrics::Metrics;

/// Delay before the single retry of a retryable transform.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub uplink_deadline: Duration,
    pub downlink_deadline: Duration,
    pub defaults: SiteDefaults,
}

/// Terminal disposition of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Translated and handed to the session for publish.
    Published,
    /// Consumed for correlation only (RTK-side ack/result).
    Correlated,
    /// Dropped with a stable reason string.
    Dropped(String),
}

enum UplinkFailure {
    NoAdapter,
    Transform(TransformError),
}

/// Per-message workflow shared by all workers.
pub struct Pipeline {
    registry: Arc<RwLock<AdapterRegistry>>,
    channel: Arc<dyn Channel>,
    correlator: Arc<Correlator>,
    metrics: Arc<Metrics>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        registry: Arc<RwLock<AdapterRegistry>>,
        channel: Arc<dyn Channel>,
        correlator: Arc<Correlator>,
        metrics: Arc<Metrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            channel,
            correlator,
            metrics,
            config,
        }
    }

    /// Run one raw delivery through the full workflow.
    pub async fn process(&self, raw: RawMessage) -> Outcome {
        let start = Instant::now();
        let mut msg = InflightMessage::from_raw(raw);
        let deadline = match msg.direction {
            Direction::Uplink => self.config.uplink_deadline,
            Direction::Downlink => self.config.downlink_deadline,
        };

        let outcome = match tokio::time::timeout(deadline, self.process_inner(&mut msg)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Dropped("deadline".to_string()),
        };

        match &outcome {
            Outcome::Published => {
                self.metrics.record_published(
                    msg.direction == Direction::Uplink,
                    start.elapsed().as_millis() as u64,
                );
                tracing::debug!(
                    topic = %msg.raw.topic,
                    direction = msg.direction.as_str(),
                    profile = msg.meta.get("profile").map(String::as_str).unwrap_or(""),
                    "message translated"
                );
            }
            Outcome::Correlated => {
                tracing::debug!(topic = %msg.raw.topic, "correlation update");
            }
            Outcome::Dropped(reason) => {
                self.metrics.record_drop(reason);
                if reason == "no_adapter" {
                    tracing::debug!(topic = %msg.raw.topic, reason = %reason, "message dropped");
                } else {
                    tracing::warn!(topic = %msg.raw.topic, reason = %reason, "message dropped");
                }
            }
        }
        outcome
    }

    async fn process_inner(&self, msg: &mut InflightMessage) -> Outcome {
        match msg.direction {
            Direction::Uplink => self.process_uplink(msg).await,
            Direction::Downlink => self.process_downlink(msg).await,
        }
    }

    // ── Uplink: vendor topic to RTK ───────────────────────────

    async fn process_uplink(&self, msg: &mut InflightMessage) -> Outcome {
        // Uplink transforms need a JSON tree; null is as useless as a
        // parse failure here.
        let parsed_ok = matches!(msg.payload.json(), Some(v) if !v.is_null());
        if !parsed_ok {
            if let Some(parse_error) = msg.payload.last_error() {
                tracing::debug!(topic = %msg.raw.topic, error = %parse_error, "unparseable payload");
            }
            return Outcome::Dropped("bad_payload".to_string());
        }

        let mut attempt = self.try_transform_uplink(msg);
        if let Err(UplinkFailure::Transform(e)) = &attempt {
            if e.kind == TransformErrorKind::Retryable {
                self.metrics.transform_retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(RETRY_DELAY).await;
                attempt = self.try_transform_uplink(msg);
            }
        }

        let (mut envelope, coords, profile_name) = match attempt {
            Ok(out) => out,
            Err(UplinkFailure::NoAdapter) => return Outcome::Dropped("no_adapter".to_string()),
            Err(UplinkFailure::Transform(e)) => {
                tracing::warn!(topic = %msg.raw.topic, error = %e, "uplink transform failed");
                return Outcome::Dropped(e.kind.as_str().to_string());
            }
        };
        msg.annotate("profile", &profile_name);
        msg.annotate("device_id", &coords.device_id);

        // Vendor results rarely echo the command name; restore it from
        // the tracked request so the round trip preserves it.
        if matches!(coords.msg_type, MsgType::Cmd(CmdStage::Result)) {
            self.restore_command_name(&mut envelope);
        }

        // Retained telemetry is suspicious but not fatal.
        if msg.raw.retained && matches!(coords.msg_type, MsgType::Telemetry(_)) {
            self.metrics
                .retained_telemetry
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(topic = %msg.raw.topic, "retained flag on telemetry");
        }

        let (qos, retained) = publish_policy(&envelope.schema);
        let target = coords.topic();
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "envelope serialization failed");
                return Outcome::Dropped("publish.serialization".to_string());
            }
        };
        if let Err(e) = self.channel.publish(&target, &bytes, qos, retained).await {
            return Outcome::Dropped(e.reason().to_string());
        }

        // Device-side acks/results resolve outstanding commands.
        match &coords.msg_type {
            MsgType::Cmd(CmdStage::Ack) => self.observe_ack(&envelope),
            MsgType::Cmd(CmdStage::Result) => self.observe_result(&envelope),
            _ => {}
        }

        Outcome::Published
    }

    fn try_transform_uplink(
        &self,
        msg: &InflightMessage,
    ) -> Result<(CanonicalEnvelope, TopicCoordinates, String), UplinkFailure> {
        let registry = self.registry.read().unwrap();
        let profile = registry
            .resolve_uplink(&msg.raw.topic, &msg.payload)
            .ok_or(UplinkFailure::NoAdapter)?;
        let (envelope, coords) = profile
            .transform_uplink(msg, &self.config.defaults)
            .map_err(UplinkFailure::Transform)?;
        Ok((envelope, coords, profile.name.clone()))
    }

    /// Insert the originating command name into a result envelope when
    /// the device's payload did not carry one.
    fn restore_command_name(&self, envelope: &mut CanonicalEnvelope) {
        if envelope.payload.get("command").is_some() {
            return;
        }
        let Some(command_id) = envelope.command_id().map(str::to_string) else {
            return;
        };
        let Some(entry) = self.correlator.get(&command_id) else {
            return;
        };
        if let serde_json::Value::Object(map) = &mut envelope.payload {
            map.insert(
                "command".to_string(),
                serde_json::Value::String(entry.command),
            );
        }
    }

    fn observe_ack(&self, envelope: &CanonicalEnvelope) {
        let Some(command_id) = envelope.command_id() else {
            return;
        };
        if !self.correlator.on_ack(command_id) {
            self.metrics
                .uncorrelated_responses
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn observe_result(&self, envelope: &CanonicalEnvelope) {
        let Some(command_id) = envelope.command_id() else {
            return;
        };
        let ok = envelope
            .payload
            .get("ok")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if !self
            .correlator
            .on_result(command_id, ok, envelope.payload.clone())
        {
            self.metrics
                .uncorrelated_responses
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // ── Downlink: RTK topic to vendor ─────────────────────────

    async fn process_downlink(&self, msg: &mut InflightMessage) -> Outcome {
        let coords = match topics::parse(&msg.raw.topic) {
            Ok(coords) => coords,
            Err(e) => {
                tracing::warn!(topic = %msg.raw.topic, error = %e, "unparseable RTK topic");
                return Outcome::Dropped("bad_topic".to_string());
            }
        };

        match coords.msg_type {
            MsgType::Cmd(CmdStage::Request) => self.process_command_request(msg, &coords).await,
            // Acks/results on the RTK side are observed for correlation
            // only; republishing them would loop our own output back.
            MsgType::Cmd(CmdStage::Ack) | MsgType::Cmd(CmdStage::Result) => {
                let envelope = match CanonicalEnvelope::from_slice(msg.raw.payload.as_slice()) {
                    Ok(envelope) => envelope,
                    Err(_) => return Outcome::Dropped("bad_payload".to_string()),
                };
                if coords.msg_type == MsgType::Cmd(CmdStage::Ack) {
                    self.observe_ack(&envelope);
                } else {
                    self.observe_result(&envelope);
                }
                Outcome::Correlated
            }
            _ => Outcome::Dropped("no_adapter".to_string()),
        }
    }

    async fn process_command_request(
        &self,
        msg: &mut InflightMessage,
        coords: &TopicCoordinates,
    ) -> Outcome {
        let envelope = match CanonicalEnvelope::from_slice(msg.raw.payload.as_slice()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic = %msg.raw.topic, error = %e, "bad command envelope");
                return Outcome::Dropped("bad_payload".to_string());
            }
        };

        let mut attempt = self.try_transform_downlink(msg, coords);
        if let Err(UplinkFailure::Transform(e)) = &attempt {
            if e.kind == TransformErrorKind::Retryable {
                self.metrics.transform_retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(RETRY_DELAY).await;
                attempt = self.try_transform_downlink(msg, coords);
            }
        }

        let (publish, profile_name) = match attempt {
            Ok(out) => out,
            Err(UplinkFailure::NoAdapter) => return Outcome::Dropped("no_adapter".to_string()),
            Err(UplinkFailure::Transform(e)) => {
                tracing::warn!(topic = %msg.raw.topic, error = %e, "downlink transform failed");
                return Outcome::Dropped(e.kind.as_str().to_string());
            }
        };
        msg.annotate("profile", &profile_name);

        if let Err(e) = self
            .channel
            .publish(&publish.topic, &publish.payload, publish.qos, publish.retained)
            .await
        {
            return Outcome::Dropped(e.reason().to_string());
        }

        let command_id = envelope
            .command_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let command = command_name(&envelope);
        self.correlator.on_request(
            &command_id,
            &coords.device_id,
            &command,
            topics::cmd_result(&coords.tenant, &coords.site, &coords.device_id),
            publish.topic.clone(),
            envelope.timeout_ms(),
        );

        Outcome::Published
    }

    fn try_transform_downlink(
        &self,
        msg: &InflightMessage,
        coords: &TopicCoordinates,
    ) -> Result<(rtk_adapters::DownlinkPublish, String), UplinkFailure> {
        let registry = self.registry.read().unwrap();
        let profile = registry
            .resolve_downlink(&msg.raw.topic, &msg.payload)
            .ok_or(UplinkFailure::NoAdapter)?;
        let publish = profile
            .transform_downlink(msg, coords)
            .map_err(UplinkFailure::Transform)?;
        Ok((publish, profile.name.clone()))
    }
}

/// Default QoS/retained for a canonical schema, with a safe fallback
/// for schemas outside the known classes.
fn publish_policy(schema: &str) -> (u8, bool) {
    match PublishClass::of_schema(schema) {
        Some(class) => (class.qos(), class.retained()),
        None => (1, false),
    }
}

/// Command name of a request envelope: the explicit `payload.command`
/// field, or the schema name with its `cmd.` prefix stripped.
fn command_name(envelope: &CanonicalEnvelope) -> String {
    if let Some(command) = envelope.payload.get("command").and_then(|v| v.as_str()) {
        return command.to_string();
    }
    envelope
        .schema
        .split_once('/')
        .map(|(name, _)| name)
        .unwrap_or(&envelope.schema)
        .trim_start_matches("cmd.")
        .to_string()
}

// ── Worker pool ───────────────────────────────────────────────

/// Consistent hash pinning a topic to one worker.
pub fn worker_index(topic: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    (hasher.finish() as usize) % workers.max(1)
}

/// Fixed pool of worker tasks, each fed by its own FIFO channel.
pub struct WorkerPool {
    senders: Vec<mpsc::Sender<RawMessage>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks processing messages through the pipeline.
    pub fn spawn(pipeline: Arc<Pipeline>, workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, mut rx) = mpsc::channel::<RawMessage>(queue_depth.max(1));
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                while let Some(raw) = rx.recv().await {
                    pipeline.process(raw).await;
                }
                tracing::debug!(worker, "pipeline worker drained");
            }));
            senders.push(tx);
        }
        Self { senders, handles }
    }

    /// Route a delivery to its topic's worker, preserving per-topic
    /// order. Awaits when that worker's queue is full.
    pub async fn dispatch(&self, raw: RawMessage) {
        let index = worker_index(&raw.topic, self.senders.len());
        if self.senders[index].send(raw).await.is_err() {
            tracing::warn!(worker = index, "worker channel closed, message lost");
        }
    }

    /// Close the input side and hand back the worker handles so the
    /// caller can await the drain.
    pub fn shutdown(self) -> Vec<JoinHandle<()>> {
        drop(self.senders);
        self.handles
    }
}
