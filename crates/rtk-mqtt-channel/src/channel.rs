//! MQTT session: publish/subscribe abstraction over rumqttc.
//!
//! `MqttSession` owns the `AsyncClient` and the outbound queues; the
//! `SessionDriver` returned from `connect()` must be spawned to drive
//! the event loop, reconnect with backoff, and replay subscriptions.
//! A separate publisher pump drains the outbound queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};

use rtk_protocol::RawMessage;

use crate::config::{MqttConfig, ReconnectConfig};
use crate::error::{MqttError, MqttResult};
use crate::outbound::{OutboundMessage, OutboundQueue};
use crate::tls;

const ONLINE_STATUS: &[u8] = br#"{"status":"online"}"#;
const OFFLINE_STATUS: &[u8] = br#"{"status":"offline"}"#;

/// How long one broker publish may take before it counts as timed out.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const PUBLISH_ATTEMPTS: u32 = 3;

// ── Channel trait ─────────────────────────────────────────────

/// Point-in-time channel-side drop counters, surfaced so the gateway
/// metrics can fold them into its snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Inbound deliveries dropped because the inbox was full.
    pub inbox_overflow: u64,
    /// Telemetry publishes evicted by the drop-oldest queue.
    pub telemetry_dropped: u64,
}

/// Abstraction for MQTT message publishing and subscribing.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload. QoS is numeric (0/1/2).
    async fn publish(&self, topic: &str, payload: &[u8], qos: u8, retained: bool)
    -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: u8) -> MqttResult<()>;

    /// Channel-side drop counters; zero for channels that cannot drop.
    fn stats(&self) -> ChannelStats {
        ChannelStats::default()
    }
}

/// Map a numeric QoS onto the rumqttc enum. Out-of-range clamps to 1.
pub fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

fn qos_number(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

// ── MqttSession ───────────────────────────────────────────────

/// Single logical broker session.
///
/// Publish is non-blocking: messages land in a bounded per-class queue
/// (telemetry drops-oldest, commands wait a bounded time). Subscriptions
/// are recorded so the driver can re-establish them after reconnect.
pub struct MqttSession {
    client: AsyncClient,
    outbound: OutboundQueue,
    subscriptions: Mutex<Vec<(String, u8)>>,
    healthy_tx: watch::Sender<bool>,
    status_topic: Option<String>,
    publish_block: Duration,
    inbox_overflow: AtomicU64,
}

/// Drives the rumqttc event loop; must be spawned by the caller.
pub struct SessionDriver {
    eventloop: EventLoop,
    session: Arc<MqttSession>,
    inbox_tx: mpsc::Sender<RawMessage>,
    reconnect: ReconnectConfig,
}

impl MqttSession {
    /// Open a session.
    ///
    /// Returns the session handle, the driver to spawn, and the inbox
    /// receiving inbound deliveries. Nothing flows until the driver
    /// task runs.
    pub fn connect(
        config: &MqttConfig,
    ) -> MqttResult<(Arc<Self>, SessionDriver, mpsc::Receiver<RawMessage>)> {
        let mut options = MqttOptions::new(
            &config.client_id,
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        options.set_clean_session(config.clean_session);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }
        if config.use_tls {
            options.set_transport(tls::load_tls_transport(config)?);
        }
        if let Some(status_topic) = &config.status_topic {
            options.set_last_will(LastWill::new(
                status_topic,
                OFFLINE_STATUS.to_vec(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (healthy_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            client,
            outbound: OutboundQueue::new(config.telemetry_queue_cap, config.command_queue_cap),
            subscriptions: Mutex::new(Vec::new()),
            healthy_tx,
            status_topic: config.status_topic.clone(),
            publish_block: Duration::from_millis(config.publish_block_ms),
            inbox_overflow: AtomicU64::new(0),
        });

        let driver = SessionDriver {
            eventloop,
            session: session.clone(),
            inbox_tx,
            reconnect: config.reconnect.clone(),
        };

        Ok((session, driver, inbox_rx))
    }

    /// Watch that flips true once connected and subscribed.
    pub fn healthy(&self) -> watch::Receiver<bool> {
        self.healthy_tx.subscribe()
    }

    pub fn is_healthy(&self) -> bool {
        *self.healthy_tx.borrow()
    }

    /// Currently recorded subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, u8)> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Publish the retained offline status and disconnect.
    pub async fn close(&self) -> MqttResult<()> {
        self.healthy_tx.send_replace(false);
        if let Some(status_topic) = &self.status_topic {
            let _ = self
                .client
                .publish(status_topic, QoS::AtLeastOnce, true, OFFLINE_STATUS.to_vec())
                .await;
        }
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::Connection(e.to_string()))
    }

    /// Re-establish subscriptions and announce the session online.
    /// Called by the driver on every CONNACK.
    async fn on_connected(&self) {
        let subscriptions = self.subscriptions();
        for (filter, qos) in &subscriptions {
            if let Err(e) = self.client.subscribe(filter, qos_level(*qos)).await {
                tracing::warn!(filter = %filter, error = %e, "resubscribe failed");
            }
        }
        if let Some(status_topic) = &self.status_topic {
            if let Err(e) = self
                .client
                .publish(status_topic, QoS::AtLeastOnce, true, ONLINE_STATUS.to_vec())
                .await
            {
                tracing::warn!(error = %e, "failed to publish online status");
            }
        }
        // Subscriptions are replayed before the session reports healthy.
        self.healthy_tx.send_replace(true);
        tracing::info!(
            subscription_count = subscriptions.len(),
            "MQTT session connected"
        );
    }

    /// Deliver one outbound message to the broker, with timeout and
    /// bounded retries for QoS >= 1.
    async fn deliver(&self, msg: OutboundMessage) {
        let attempts = if msg.qos == 0 { 1 } else { PUBLISH_ATTEMPTS };
        for attempt in 1..=attempts {
            let publish = self.client.publish(
                &msg.topic,
                qos_level(msg.qos),
                msg.retained,
                msg.payload.clone(),
            );
            match tokio::time::timeout(PUBLISH_TIMEOUT, publish).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    tracing::warn!(topic = %msg.topic, attempt, error = %e, "publish error");
                }
                Err(_) => {
                    tracing::warn!(topic = %msg.topic, attempt, "publish timeout");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        tracing::error!(topic = %msg.topic, "publish dropped after {attempts} attempts");
    }
}

#[async_trait]
impl Channel for MqttSession {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> MqttResult<()> {
        let msg = OutboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retained,
        };
        if qos == 0 {
            if self.outbound.enqueue_telemetry(msg) {
                tracing::debug!(topic = %topic, "telemetry queue full, dropped oldest");
            }
            return Ok(());
        }
        self.outbound
            .enqueue_standard(msg, self.publish_block)
            .await
            .map_err(|msg| {
                MqttError::Backpressure(format!("outbound queue full for '{}'", msg.topic))
            })
    }

    async fn subscribe(&self, filter: &str, qos: u8) -> MqttResult<()> {
        {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            if !subscriptions.iter().any(|(f, _)| f == filter) {
                subscriptions.push((filter.to_string(), qos));
            }
        }
        self.client
            .subscribe(filter, qos_level(qos))
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            inbox_overflow: self.inbox_overflow.load(Ordering::Relaxed),
            telemetry_dropped: self.outbound.telemetry_dropped(),
        }
    }
}

// ── Driver and publisher tasks ────────────────────────────────

impl SessionDriver {
    /// Drive the event loop until reconnect attempts are exhausted.
    ///
    /// Intended to be spawned as a background tokio task; the returned
    /// error is always `MqttError::Fatal` and should be escalated.
    pub async fn run(mut self) -> MqttError {
        let mut failures: u32 = 0;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    self.session.on_connected().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let raw = RawMessage::new(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                        qos_number(publish.qos),
                        publish.retain,
                    );
                    match self.inbox_tx.try_send(raw) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(raw)) => {
                            // Inbox overflow drops the newest message.
                            self.session.inbox_overflow.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(topic = %raw.topic, "inbox full, dropping message");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::info!("inbox closed, stopping session driver");
                            return MqttError::Fatal("inbox receiver dropped".into());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    self.session.healthy_tx.send_replace(false);
                    failures += 1;
                    if failures > self.reconnect.max_attempts {
                        tracing::error!(error = %e, failures, "reconnect attempts exhausted");
                        return MqttError::Fatal(e.to_string());
                    }
                    let delay = self.reconnect.delay_ms(failures);
                    tracing::warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay,
                        "MQTT connection error, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
}

/// Drain the outbound queues into the broker. Runs until the session
/// is dropped; intended to be spawned alongside the driver.
pub async fn run_publisher(session: Arc<MqttSession>) {
    loop {
        let msg = session.outbound.next().await;
        session.deliver(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttConfig {
        toml::from_str(
            r#"
broker_host = "localhost"
client_id = "test-gw"
status_topic = "rtk/v1/home/main/test-gw/lwt"
"#,
        )
        .unwrap()
    }

    #[test]
    fn qos_mapping_roundtrip() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_number(qos_level(7)), 1);
    }

    #[tokio::test]
    async fn subscriptions_are_recorded_once() {
        let (session, _driver, _inbox) = MqttSession::connect(&test_config()).unwrap();
        session.subscribe("tasmota/+/SENSOR", 0).await.unwrap();
        session.subscribe("rtk/v1/+/+/+/cmd/req", 2).await.unwrap();
        session.subscribe("tasmota/+/SENSOR", 0).await.unwrap();

        let subs = session.subscriptions();
        assert_eq!(subs.len(), 2);
        assert!(subs.contains(&("tasmota/+/SENSOR".into(), 0)));
        assert!(subs.contains(&("rtk/v1/+/+/+/cmd/req".into(), 2)));
    }

    #[tokio::test]
    async fn reconnect_replays_subscriptions_before_healthy() {
        let (session, _driver, _inbox) = MqttSession::connect(&test_config()).unwrap();
        session.subscribe("a/+", 1).await.unwrap();
        session.subscribe("b/#", 0).await.unwrap();
        assert!(!session.is_healthy());

        // Simulate the CONNACK path: subscriptions replay, then healthy.
        session.on_connected().await;
        assert!(session.is_healthy());
        assert_eq!(session.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn telemetry_publish_never_blocks() {
        let (session, _driver, _inbox) = MqttSession::connect(&test_config()).unwrap();
        // Far beyond the telemetry cap; publish must stay non-blocking.
        for i in 0..200 {
            session
                .publish(&format!("t/{i}"), b"{}", 0, false)
                .await
                .unwrap();
        }
        assert!(session.stats().telemetry_dropped > 0);
        assert_eq!(session.stats().inbox_overflow, 0);
    }

    #[tokio::test]
    async fn command_publish_backpressure_errors() {
        let mut config = test_config();
        config.command_queue_cap = 1;
        config.publish_block_ms = 10;
        let (session, _driver, _inbox) = MqttSession::connect(&config).unwrap();

        session.publish("c/1", b"{}", 1, false).await.unwrap();
        let err = session.publish("c/2", b"{}", 1, false).await.unwrap_err();
        assert_eq!(err.reason(), "publish.backpressure");
    }
}
