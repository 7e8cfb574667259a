//! Periodic gateway status publisher.
//!
//! Publishes a retained state envelope on the gateway's own RTK topic
//! so controllers can watch the gateway like any other device, and
//! logs a metrics snapshot on the same cadence.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time;

use rtk_mqtt_channel::Channel;
use rtk_protocol::CanonicalEnvelope;

use crate::metrics::Metrics;

/// Run the status loop, publishing at `interval`.
///
/// Runs forever until the task is cancelled. Intended to be spawned as
/// a background tokio task.
pub async fn run(
    channel: Arc<dyn Channel>,
    metrics: Arc<Metrics>,
    topic: String,
    gateway_id: String,
    interval: Duration,
) {
    let start = time::Instant::now();
    let mut ticker = time::interval(interval);
    // Skip the first tick (fires immediately).
    ticker.tick().await;

    loop {
        ticker.tick().await;

        metrics.absorb_channel(channel.stats());
        let snapshot = metrics.snapshot();
        let envelope = CanonicalEnvelope::new(
            "state/1.0",
            &gateway_id,
            json!({
                "health": "ok",
                "uptime_secs": start.elapsed().as_secs(),
                "uplink_published": snapshot.uplink_published,
                "downlink_published": snapshot.downlink_published,
                "dropped": metrics.total_dropped(),
                "inbox_overflow": snapshot.inbox_overflow,
                "command_timeouts": snapshot.command_timeouts,
            }),
        );

        match serde_json::to_vec(&envelope) {
            Ok(bytes) => {
                if let Err(e) = channel.publish(&topic, &bytes, 1, true).await {
                    tracing::warn!(error = %e, "failed to publish gateway status");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize gateway status");
            }
        }
        metrics.log_snapshot();
    }
}
