//! Message records flowing through the gateway.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::topics;

/// Immutable record of one MQTT delivery.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
    /// Arrival time, milliseconds since epoch.
    pub received_at_ms: i64,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: u8, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained,
            received_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Translation direction, derived from the source topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Device vendor topic, translating toward RTK.
    Uplink,
    /// RTK topic, translating toward a device.
    Downlink,
}

impl Direction {
    /// Tag a topic: anything under `rtk/v1/` is downlink.
    pub fn of_topic(topic: &str) -> Self {
        if topics::is_rtk(topic) {
            Self::Downlink
        } else {
            Self::Uplink
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uplink => "uplink",
            Self::Downlink => "downlink",
        }
    }
}

/// Which side originated the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Device,
    Rtk,
}

impl From<Direction> for MessageSource {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Uplink => Self::Device,
            Direction::Downlink => Self::Rtk,
        }
    }
}

/// Destination address computed by a transform, before publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTarget {
    pub topic: String,
    pub qos: u8,
    pub retained: bool,
    /// Schema governing the QoS/retained defaults above.
    pub schema: String,
}
