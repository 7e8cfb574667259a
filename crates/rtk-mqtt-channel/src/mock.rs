//! In-memory `Channel` for exercising the gateway without a broker.
//!
//! Gateway tests care about three things: which topic a translation
//! landed on, the QoS/retained policy it carried, and the subscription
//! set built at startup. The mock records exactly that, in order, and
//! offers accessors shaped around those assertions.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::channel::Channel;
use crate::error::MqttResult;

/// One publish as the broker would have seen it.
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

impl Publication {
    /// Payload as text, for assertions on raw vendor bodies like `ON`.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Recording stand-in for the MQTT session.
pub struct MockChannel {
    publishes: Mutex<Vec<Publication>>,
    filters: Mutex<Vec<(String, u8)>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            publishes: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
        }
    }

    /// Every publish so far, oldest first.
    pub fn publishes(&self) -> Vec<Publication> {
        self.publishes.lock().unwrap().clone()
    }

    /// Publishes that landed on one topic, oldest first.
    pub fn on_topic(&self, topic: &str) -> Vec<Publication> {
        self.publishes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// The one publish expected on a topic. Panics when the topic saw
    /// none or several, so tests fail loudly on duplicates.
    pub fn only_on(&self, topic: &str) -> Publication {
        let matching = self.on_topic(topic);
        match matching.len() {
            1 => matching.into_iter().next().unwrap(),
            n => panic!("expected exactly one publish on '{topic}', saw {n}"),
        }
    }

    /// Topics that received at least one retained publish (state,
    /// attr, LWT under the default policy).
    pub fn retained_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        for publication in self.publishes.lock().unwrap().iter() {
            if publication.retained && !topics.contains(&publication.topic) {
                topics.push(publication.topic.clone());
            }
        }
        topics
    }

    /// Subscription filters with their QoS, in subscribe order.
    pub fn filters(&self) -> Vec<(String, u8)> {
        self.filters.lock().unwrap().clone()
    }

    /// Whether the given filter was ever subscribed.
    pub fn has_filter(&self, filter: &str) -> bool {
        self.filters.lock().unwrap().iter().any(|(f, _)| f == filter)
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.publishes.lock().unwrap().clear();
        self.filters.lock().unwrap().clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> MqttResult<()> {
        self.publishes.lock().unwrap().push(Publication {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retained,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: u8) -> MqttResult<()> {
        self.filters
            .lock()
            .unwrap()
            .push((filter.to_string(), qos));
        Ok(())
    }
}
