//! Outbound publish queues with per-class back-pressure.
//!
//! Telemetry (QoS 0) gets a small queue that drops its oldest entry on
//! overflow; everything else gets a larger queue whose producers wait
//! a bounded time for space before failing. A single pump task drains
//! both, commands first.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};

/// One queued publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

/// Bounded two-class outbound queue.
pub struct OutboundQueue {
    telemetry: Mutex<VecDeque<OutboundMessage>>,
    standard: Mutex<VecDeque<OutboundMessage>>,
    telemetry_cap: usize,
    standard_cap: usize,
    /// Signalled when any queue gains a message.
    data: Notify,
    /// Signalled when the standard queue frees a slot.
    space: Notify,
    telemetry_dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(telemetry_cap: usize, standard_cap: usize) -> Self {
        Self {
            telemetry: Mutex::new(VecDeque::new()),
            standard: Mutex::new(VecDeque::new()),
            telemetry_cap: telemetry_cap.max(1),
            standard_cap: standard_cap.max(1),
            data: Notify::new(),
            space: Notify::new(),
            telemetry_dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue telemetry, dropping the oldest entry when full.
    /// Returns true when an entry was evicted.
    pub fn enqueue_telemetry(&self, msg: OutboundMessage) -> bool {
        let mut queue = self.telemetry.lock().unwrap();
        let mut evicted = false;
        if queue.len() >= self.telemetry_cap {
            queue.pop_front();
            self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
            evicted = true;
        }
        queue.push_back(msg);
        drop(queue);
        self.data.notify_one();
        evicted
    }

    /// Try to enqueue a command/state publish without waiting.
    /// Hands the message back when the queue is full.
    pub fn try_enqueue_standard(&self, msg: OutboundMessage) -> Result<(), OutboundMessage> {
        let mut queue = self.standard.lock().unwrap();
        if queue.len() >= self.standard_cap {
            return Err(msg);
        }
        queue.push_back(msg);
        drop(queue);
        self.data.notify_one();
        Ok(())
    }

    /// Enqueue a command/state publish, waiting up to `max_wait` for a
    /// free slot. On timeout the message is handed back.
    pub async fn enqueue_standard(
        &self,
        msg: OutboundMessage,
        max_wait: Duration,
    ) -> Result<(), OutboundMessage> {
        let deadline = Instant::now() + max_wait;
        let mut pending = msg;
        loop {
            match self.try_enqueue_standard(pending) {
                Ok(()) => return Ok(()),
                Err(back) => {
                    pending = back;
                    if timeout_at(deadline, self.space.notified()).await.is_err() {
                        return Err(pending);
                    }
                }
            }
        }
    }

    /// Next message to publish; commands drain before telemetry.
    pub async fn next(&self) -> OutboundMessage {
        loop {
            if let Some(msg) = self.standard.lock().unwrap().pop_front() {
                self.space.notify_one();
                return msg;
            }
            if let Some(msg) = self.telemetry.lock().unwrap().pop_front() {
                return msg;
            }
            self.data.notified().await;
        }
    }

    /// Telemetry entries evicted by drop-oldest so far.
    pub fn telemetry_dropped(&self) -> u64 {
        self.telemetry_dropped.load(Ordering::Relaxed)
    }

    pub fn depths(&self) -> (usize, usize) {
        (
            self.telemetry.lock().unwrap().len(),
            self.standard.lock().unwrap().len(),
        )
    }
}
