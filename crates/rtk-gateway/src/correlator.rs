//! Command correlator: request to terminal outcome.
//!
//! Tracks outbound RTK commands by id and matches the eventual ack and
//! result so the controller always observes a terminal state. Entries
//! live in a sharded map; a single timer task walks a min-heap of
//! deadlines instead of spawning a task per command. Stale heap entries
//! are skipped on pop (each state change pushes a fresh deadline).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::time::Instant;

use rtk_mqtt_channel::Channel;
use rtk_protocol::{CanonicalEnvelope, TraceContext};

use crate::metrics::Metrics;

/// How often the timer task scans for expired entries.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Correlator tuning knobs.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Applied when the command envelope carries no timeout.
    pub default_timeout_ms: u64,
    /// Deadline extension granted once a command is acked.
    pub ack_grace_ms: u64,
    /// How long terminal entries linger to absorb duplicates.
    pub observation_window_ms: u64,
    /// Map size cap; oldest entries are evicted beyond it.
    pub capacity: usize,
    /// Number of independent map shards.
    pub shard_count: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            ack_grace_ms: 5_000,
            observation_window_ms: 30_000,
            capacity: 4096,
            shard_count: 8,
        }
    }
}

/// Lifecycle state of a tracked command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    Acked,
    Completed,
    TimedOut,
    Failed,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Failed)
    }
}

/// One tracked command.
#[derive(Debug, Clone)]
pub struct OutstandingCommand {
    pub command_id: String,
    pub device_id: String,
    /// Canonical command name from the request (`turn_on`, ...), echoed
    /// into synthesized and forwarded results.
    pub command: String,
    /// RTK `cmd/res` topic used for synthesized failures.
    pub result_topic: String,
    /// Vendor topic the translated command was published on.
    pub device_topic: String,
    pub issued_at_ms: i64,
    pub timeout_ms: u64,
    pub state: CommandState,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Next state deadline, or retention expiry once terminal.
    deadline: Instant,
    /// Monotonic insertion order, used for capacity eviction.
    seq: u64,
}

/// A timeout that needs a synthesized `cmd/res` publish.
struct TimeoutJob {
    result_topic: String,
    device_id: String,
    command_id: String,
    command: String,
}

/// Sharded command tracker with a single deadline heap.
pub struct Correlator {
    config: CorrelatorConfig,
    shards: Vec<Mutex<HashMap<String, OutstandingCommand>>>,
    timers: Mutex<BinaryHeap<Reverse<(Instant, String)>>>,
    metrics: Arc<Metrics>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig, metrics: Arc<Metrics>) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            config,
            shards,
            timers: Mutex::new(BinaryHeap::new()),
            metrics,
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn shard(&self, command_id: &str) -> &Mutex<HashMap<String, OutstandingCommand>> {
        let mut hasher = DefaultHasher::new();
        command_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn push_timer(&self, deadline: Instant, command_id: &str) {
        self.timers
            .lock()
            .unwrap()
            .push(Reverse((deadline, command_id.to_string())));
    }

    /// Total tracked entries, terminal included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries still awaiting an outcome.
    pub fn open_len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap()
                    .values()
                    .filter(|e| !e.state.is_terminal())
                    .count()
            })
            .sum()
    }

    pub fn get(&self, command_id: &str) -> Option<OutstandingCommand> {
        self.shard(command_id)
            .lock()
            .unwrap()
            .get(command_id)
            .cloned()
    }

    /// Start tracking a published command request.
    pub fn on_request(
        &self,
        command_id: &str,
        device_id: &str,
        command: &str,
        result_topic: String,
        device_topic: String,
        timeout_ms: Option<u64>,
    ) {
        if self.len() >= self.config.capacity {
            self.evict_oldest();
        }

        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let entry = OutstandingCommand {
            command_id: command_id.to_string(),
            device_id: device_id.to_string(),
            command: command.to_string(),
            result_topic,
            device_topic,
            issued_at_ms: Utc::now().timestamp_millis(),
            timeout_ms,
            state: CommandState::Pending,
            result: None,
            error: None,
            deadline,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.shard(command_id)
            .lock()
            .unwrap()
            .insert(command_id.to_string(), entry);
        self.push_timer(deadline, command_id);
        self.metrics.correlated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acknowledgement. Returns false for unknown ids.
    pub fn on_ack(&self, command_id: &str) -> bool {
        let mut shard = self.shard(command_id).lock().unwrap();
        let Some(entry) = shard.get_mut(command_id) else {
            return false;
        };
        if entry.state == CommandState::Pending {
            entry.state = CommandState::Acked;
            entry.deadline = Instant::now() + Duration::from_millis(self.config.ack_grace_ms);
            let deadline = entry.deadline;
            drop(shard);
            self.push_timer(deadline, command_id);
        }
        true
    }

    /// Record a result. Returns false for unknown ids; duplicates on
    /// terminal entries are absorbed.
    pub fn on_result(&self, command_id: &str, ok: bool, result: Value) -> bool {
        let mut shard = self.shard(command_id).lock().unwrap();
        let Some(entry) = shard.get_mut(command_id) else {
            return false;
        };
        if entry.state.is_terminal() {
            return true;
        }
        if ok {
            entry.state = CommandState::Completed;
            entry.result = Some(result);
        } else {
            entry.state = CommandState::Failed;
            entry.error = Some(
                result
                    .get("error")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "command failed".to_string()),
            );
            entry.result = Some(result);
        }
        entry.deadline =
            Instant::now() + Duration::from_millis(self.config.observation_window_ms);
        let deadline = entry.deadline;
        drop(shard);
        self.push_timer(deadline, command_id);
        true
    }

    /// Evict the oldest entry to stay under the capacity cap.
    fn evict_oldest(&self) {
        let mut oldest: Option<(String, u64)> = None;
        for shard in &self.shards {
            let shard = shard.lock().unwrap();
            for entry in shard.values() {
                let older = match &oldest {
                    Some((_, seq)) => entry.seq < *seq,
                    None => true,
                };
                if older {
                    oldest = Some((entry.command_id.clone(), entry.seq));
                }
            }
        }
        if let Some((command_id, _)) = oldest {
            self.shard(&command_id).lock().unwrap().remove(&command_id);
            self.metrics
                .correlator_evictions
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                command_id = %command_id,
                capacity = self.config.capacity,
                "correlator at capacity, evicted oldest entry"
            );
        }
    }

    /// Process due timers: time out overdue commands (collecting the
    /// synthesized publishes) and evict terminal entries past their
    /// observation window.
    fn expire_due(&self, now: Instant) -> Vec<TimeoutJob> {
        let mut jobs = Vec::new();
        loop {
            let command_id = {
                let mut timers = self.timers.lock().unwrap();
                match timers.pop() {
                    Some(Reverse((deadline, id))) if deadline <= now => id,
                    Some(entry) => {
                        timers.push(entry);
                        break;
                    }
                    None => break,
                }
            };

            let mut shard = self.shard(&command_id).lock().unwrap();
            let Some(entry) = shard.get_mut(&command_id) else {
                continue;
            };
            // A refreshed deadline means this heap entry is stale.
            if entry.deadline > now {
                continue;
            }
            if entry.state.is_terminal() {
                shard.remove(&command_id);
                continue;
            }

            entry.state = CommandState::TimedOut;
            entry.error = Some("timeout".to_string());
            entry.deadline = now + Duration::from_millis(self.config.observation_window_ms);
            let deadline = entry.deadline;
            jobs.push(TimeoutJob {
                result_topic: entry.result_topic.clone(),
                device_id: entry.device_id.clone(),
                command_id: command_id.clone(),
                command: entry.command.clone(),
            });
            drop(shard);
            self.push_timer(deadline, &command_id);
        }
        jobs
    }

    /// One timer pass: expire entries and publish synthesized failures.
    pub async fn tick(&self, channel: &dyn Channel) {
        let jobs = self.expire_due(Instant::now());
        for job in jobs {
            self.metrics.command_timeouts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                command_id = %job.command_id,
                device_id = %job.device_id,
                "command timed out, synthesizing failure result"
            );
            self.publish_failure(channel, &job, "timeout").await;
        }
    }

    /// Run the timer loop forever. Intended to be spawned.
    pub async fn run(self: Arc<Self>, channel: Arc<dyn Channel>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            self.tick(channel.as_ref()).await;
        }
    }

    /// Shutdown path: every open command becomes `TimedOut` and gets a
    /// synthesized failure so no observer is left hanging.
    pub async fn flush(&self, channel: &dyn Channel) {
        let mut jobs = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            for entry in shard.values_mut() {
                if !entry.state.is_terminal() {
                    entry.state = CommandState::TimedOut;
                    entry.error = Some("timeout".to_string());
                    entry.deadline =
                        Instant::now() + Duration::from_millis(self.config.observation_window_ms);
                    jobs.push(TimeoutJob {
                        result_topic: entry.result_topic.clone(),
                        device_id: entry.device_id.clone(),
                        command_id: entry.command_id.clone(),
                        command: entry.command.clone(),
                    });
                }
            }
        }
        for job in jobs {
            self.metrics.command_timeouts.fetch_add(1, Ordering::Relaxed);
            self.publish_failure(channel, &job, "timeout").await;
        }
    }

    async fn publish_failure(&self, channel: &dyn Channel, job: &TimeoutJob, kind: &str) {
        let mut envelope = CanonicalEnvelope::new(
            "cmd.result/1.0",
            &job.device_id,
            json!({
                "ok": false,
                "error": { "kind": kind },
                "command": job.command,
                "command_id": job.command_id,
            }),
        );
        envelope.trace = Some(TraceContext {
            req_id: Some(job.command_id.clone()),
            session_id: None,
        });

        match serde_json::to_vec(&envelope) {
            Ok(bytes) => {
                if let Err(e) = channel.publish(&job.result_topic, &bytes, 1, false).await {
                    tracing::warn!(
                        command_id = %job.command_id,
                        error = %e,
                        "failed to publish synthesized result"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize synthesized result");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtk_mqtt_channel::MockChannel;

    fn correlator(default_timeout_ms: u64, ack_grace_ms: u64, window_ms: u64) -> Correlator {
        Correlator::new(
            CorrelatorConfig {
                default_timeout_ms,
                ack_grace_ms,
                observation_window_ms: window_ms,
                capacity: 8,
                shard_count: 4,
            },
            Arc::new(Metrics::new()),
        )
    }

    fn track(c: &Correlator, id: &str) {
        c.on_request(
            id,
            "plug01",
            "turn_on",
            "rtk/v1/home/main/plug01/cmd/res".into(),
            "tasmota/plug01/cmnd/POWER".into(),
            None,
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_command_times_out_and_synthesizes_result() {
        let c = correlator(1_000, 500, 30_000);
        let mock = MockChannel::new();
        track(&c, "c1");
        assert_eq!(c.get("c1").unwrap().state, CommandState::Pending);

        tokio::time::advance(Duration::from_millis(1_100)).await;
        c.tick(&mock).await;

        let entry = c.get("c1").unwrap();
        assert_eq!(entry.state, CommandState::TimedOut);
        assert_eq!(entry.error.as_deref(), Some("timeout"));

        let published = mock.publishes();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "rtk/v1/home/main/plug01/cmd/res");
        assert_eq!(published[0].qos, 1);

        let envelope: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(envelope["schema"], "cmd.result/1.0");
        assert_eq!(envelope["payload"]["ok"], false);
        assert_eq!(envelope["payload"]["error"]["kind"], "timeout");
        assert_eq!(envelope["payload"]["command"], "turn_on");
        assert_eq!(envelope["payload"]["command_id"], "c1");
        assert_eq!(envelope["trace"]["req_id"], "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn ack_refreshes_the_deadline() {
        let c = correlator(1_000, 5_000, 30_000);
        let mock = MockChannel::new();
        track(&c, "c1");

        tokio::time::advance(Duration::from_millis(800)).await;
        assert!(c.on_ack("c1"));
        assert_eq!(c.get("c1").unwrap().state, CommandState::Acked);

        // Past the original timeout, within the ack grace.
        tokio::time::advance(Duration::from_millis(1_000)).await;
        c.tick(&mock).await;
        assert_eq!(c.get("c1").unwrap().state, CommandState::Acked);
        assert!(mock.publishes().is_empty());

        // Past the ack grace too.
        tokio::time::advance(Duration::from_millis(5_000)).await;
        c.tick(&mock).await;
        assert_eq!(c.get("c1").unwrap().state, CommandState::TimedOut);
        assert_eq!(mock.publishes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_result_completes_without_synthesis() {
        let c = correlator(1_000, 500, 30_000);
        let mock = MockChannel::new();
        track(&c, "c1");
        assert!(c.on_ack("c1"));
        assert!(c.on_result("c1", true, json!({"power": "on"})));

        let entry = c.get("c1").unwrap();
        assert_eq!(entry.state, CommandState::Completed);
        assert_eq!(entry.result.unwrap()["power"], "on");

        // Timers that fire later must not resurrect the entry.
        tokio::time::advance(Duration::from_millis(2_000)).await;
        c.tick(&mock).await;
        assert_eq!(c.get("c1").unwrap().state, CommandState::Completed);
        assert!(mock.publishes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_result_records_error() {
        let c = correlator(1_000, 500, 30_000);
        track(&c, "c1");
        assert!(c.on_result(
            "c1",
            false,
            json!({"error": {"kind": "unsupported"}})
        ));
        let entry = c.get("c1").unwrap();
        assert_eq!(entry.state, CommandState::Failed);
        assert!(entry.error.unwrap().contains("unsupported"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ids_are_not_correlated() {
        let c = correlator(1_000, 500, 30_000);
        assert!(!c.on_ack("ghost"));
        assert!(!c.on_result("ghost", true, json!({})));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_results_are_absorbed_in_observation_window() {
        let c = correlator(1_000, 500, 30_000);
        track(&c, "c1");
        assert!(c.on_result("c1", true, json!({"n": 1})));
        assert!(c.on_result("c1", false, json!({"n": 2})));

        // First result wins; the duplicate is absorbed.
        let entry = c.get("c1").unwrap();
        assert_eq!(entry.state, CommandState::Completed);
        assert_eq!(entry.result.unwrap()["n"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_entries_evicted_after_observation_window() {
        let c = correlator(1_000, 500, 2_000);
        let mock = MockChannel::new();
        track(&c, "c1");
        assert!(c.on_result("c1", true, json!({})));

        tokio::time::advance(Duration::from_millis(2_100)).await;
        c.tick(&mock).await;
        assert!(c.get("c1").is_none());
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_eviction_removes_oldest() {
        let c = correlator(60_000, 500, 30_000);
        for i in 0..9 {
            track(&c, &format!("c{i}"));
        }
        // Capacity is 8; the first entry should have been evicted.
        assert_eq!(c.len(), 8);
        assert!(c.get("c0").is_none());
        assert!(c.get("c8").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_synthesizes_for_all_open_commands() {
        let c = correlator(60_000, 500, 30_000);
        let mock = MockChannel::new();
        track(&c, "c1");
        track(&c, "c2");
        assert!(c.on_result("c2", true, json!({})));
        track(&c, "c3");
        assert!(c.on_ack("c3"));

        c.flush(&mock).await;

        assert_eq!(c.get("c1").unwrap().state, CommandState::TimedOut);
        assert_eq!(c.get("c2").unwrap().state, CommandState::Completed);
        assert_eq!(c.get("c3").unwrap().state, CommandState::TimedOut);
        assert_eq!(mock.publishes().len(), 2);
        assert_eq!(c.open_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn envelope_timeout_overrides_default() {
        let c = correlator(60_000, 500, 30_000);
        let mock = MockChannel::new();
        c.on_request(
            "quick",
            "plug01",
            "turn_on",
            "rtk/v1/home/main/plug01/cmd/res".into(),
            "tasmota/plug01/cmnd/POWER".into(),
            Some(200),
        );

        tokio::time::advance(Duration::from_millis(300)).await;
        c.tick(&mock).await;
        assert_eq!(c.get("quick").unwrap().state, CommandState::TimedOut);
    }
}
