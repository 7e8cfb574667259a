//! In-flight message record used across the pipeline and transforms.

use std::collections::HashMap;

use rtk_protocol::{Direction, FlexiblePayload, MessageSource, MessageTarget, RawMessage};

/// Working record for one message moving through the gateway.
///
/// Owns the raw delivery plus its parsed payload, direction tag, and an
/// open `meta` map for adapter annotations (resolved profile, extracted
/// device id, vendor fields).
#[derive(Debug)]
pub struct InflightMessage {
    pub raw: RawMessage,
    pub payload: FlexiblePayload,
    pub direction: Direction,
    pub source: MessageSource,
    pub target: Option<MessageTarget>,
    pub meta: HashMap<String, String>,
}

impl InflightMessage {
    /// Wrap a raw delivery: parse the payload and tag the direction
    /// from the topic prefix.
    pub fn from_raw(raw: RawMessage) -> Self {
        let payload = FlexiblePayload::parse(raw.payload.clone());
        let direction = Direction::of_topic(&raw.topic);
        Self {
            raw,
            payload,
            direction,
            source: direction.into(),
            target: None,
            meta: HashMap::new(),
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_tags_direction_and_parses() {
        let raw = RawMessage::new(
            "homeassistant/light/x/state",
            br#"{"state":"on"}"#.to_vec(),
            1,
            false,
        );
        let msg = InflightMessage::from_raw(raw);
        assert_eq!(msg.direction, Direction::Uplink);
        assert_eq!(msg.source, MessageSource::Device);
        assert_eq!(msg.payload.get_str("state"), Some("on"));
        assert!(msg.target.is_none());
    }

    #[test]
    fn downlink_detection() {
        let raw = RawMessage::new("rtk/v1/home/main/plug01/cmd/req", b"{}".to_vec(), 2, false);
        let msg = InflightMessage::from_raw(raw);
        assert_eq!(msg.direction, Direction::Downlink);
        assert_eq!(msg.source, MessageSource::Rtk);
    }

    #[test]
    fn annotations_accumulate() {
        let raw = RawMessage::new("t", b"{}".to_vec(), 0, false);
        let mut msg = InflightMessage::from_raw(raw);
        msg.annotate("profile", "tasmota");
        msg.annotate("device_id", "plug01");
        assert_eq!(msg.meta["profile"], "tasmota");
        assert_eq!(msg.meta["device_id"], "plug01");
    }
}
