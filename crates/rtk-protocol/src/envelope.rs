//! Canonical RTK JSON envelope shared by every translated message.
//!
//! Uplink transforms produce envelopes, downlink transforms consume
//! them. The `schema` string (`<name>/<major.minor>`) carries the
//! message kind and drives the default QoS/retained policy.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope wrapping every message published on the RTK side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEnvelope {
    /// Schema identifier, e.g. `state/1.0` or `cmd.turn_on/1.0`.
    pub schema: String,
    /// Milliseconds since epoch at translation time.
    pub ts: i64,
    /// Canonical device identifier.
    pub device_id: String,
    /// Message body; shape depends on the schema.
    pub payload: serde_json::Value,
    /// Optional tracing context, round-trips when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceContext>,
}

/// Correlation metadata carried end-to-end through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CanonicalEnvelope {
    /// Build an envelope timestamped now.
    pub fn new(
        schema: impl Into<String>,
        device_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            schema: schema.into(),
            ts: Utc::now().timestamp_millis(),
            device_id: device_id.into(),
            payload,
            trace: None,
        }
    }

    /// Parse an envelope from raw bytes, validating the schema string.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        parse_schema(&envelope.schema)?;
        Ok(envelope)
    }

    /// Command id for correlation: `trace.req_id` if set, otherwise
    /// the payload's top-level `command_id` field.
    pub fn command_id(&self) -> Option<&str> {
        if let Some(req_id) = self.trace.as_ref().and_then(|t| t.req_id.as_deref()) {
            return Some(req_id);
        }
        self.payload.get("command_id").and_then(|v| v.as_str())
    }

    /// Per-command timeout override, milliseconds.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.payload.get("timeout_ms").and_then(|v| v.as_u64())
    }
}

/// Errors raised while parsing or validating envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("bad schema '{0}': expected <name>/<major.minor>")]
    BadSchema(String),
}

/// Split and validate a schema string into `(name, major, minor)`.
pub fn parse_schema(schema: &str) -> Result<(&str, u32, u32), EnvelopeError> {
    let bad = || EnvelopeError::BadSchema(schema.to_string());

    let (name, version) = schema.split_once('/').ok_or_else(bad)?;
    if name.is_empty() {
        return Err(bad());
    }
    let (major, minor) = version.split_once('.').ok_or_else(bad)?;
    let major: u32 = major.parse().map_err(|_| bad())?;
    let minor: u32 = minor.parse().map_err(|_| bad())?;
    Ok((name, major, minor))
}

// ── Publish-class policy ──────────────────────────────────────

/// Message class derived from the envelope schema.
///
/// Determines the default QoS and retained flag for the publish,
/// overridable per adapter profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishClass {
    State,
    Attr,
    Lwt,
    Telemetry,
    Event,
    CmdRequest,
    CmdAck,
    CmdResult,
}

impl PublishClass {
    /// Classify a schema string. Returns `None` for unknown schema names.
    pub fn of_schema(schema: &str) -> Option<Self> {
        let (name, _, _) = parse_schema(schema).ok()?;
        let class = match name {
            "state" => Self::State,
            "attr" => Self::Attr,
            "lwt" => Self::Lwt,
            "cmd.ack" => Self::CmdAck,
            "cmd.result" => Self::CmdResult,
            _ if name.starts_with("telemetry.") => Self::Telemetry,
            _ if name.starts_with("evt.") => Self::Event,
            _ if name.starts_with("cmd.") => Self::CmdRequest,
            _ => return None,
        };
        Some(class)
    }

    /// Default QoS level (0/1/2).
    pub fn qos(self) -> u8 {
        match self {
            Self::Telemetry => 0,
            Self::State | Self::Attr | Self::Lwt => 1,
            Self::Event | Self::CmdAck | Self::CmdResult => 1,
            Self::CmdRequest => 2,
        }
    }

    /// Default retained flag.
    pub fn retained(self) -> bool {
        matches!(self, Self::State | Self::Attr | Self::Lwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_roundtrip() {
        let envelope = CanonicalEnvelope::new(
            "state/1.0",
            "living_room_light",
            json!({"power_state": "on", "brightness": 100}),
        );
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let parsed = CanonicalEnvelope::from_slice(&bytes).unwrap();
        assert_eq!(parsed.schema, "state/1.0");
        assert_eq!(parsed.device_id, "living_room_light");
        assert_eq!(parsed.payload["brightness"], 100);
        assert!(parsed.trace.is_none());
    }

    #[test]
    fn trace_roundtrips_when_present() {
        let mut envelope =
            CanonicalEnvelope::new("cmd.turn_on/1.0", "plug01", json!({"command": "turn_on"}));
        envelope.trace = Some(TraceContext {
            req_id: Some("c1".into()),
            session_id: Some("s9".into()),
        });

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""req_id":"c1""#));

        let parsed = CanonicalEnvelope::from_slice(json.as_bytes()).unwrap();
        let trace = parsed.trace.unwrap();
        assert_eq!(trace.req_id.as_deref(), Some("c1"));
        assert_eq!(trace.session_id.as_deref(), Some("s9"));
    }

    #[test]
    fn trace_absent_is_not_serialized() {
        let envelope = CanonicalEnvelope::new("attr/1.0", "d", json!({}));
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("trace"));
    }

    #[test]
    fn command_id_prefers_trace() {
        let mut envelope = CanonicalEnvelope::new(
            "cmd.turn_on/1.0",
            "plug01",
            json!({"command_id": "payload-id"}),
        );
        assert_eq!(envelope.command_id(), Some("payload-id"));

        envelope.trace = Some(TraceContext {
            req_id: Some("trace-id".into()),
            session_id: None,
        });
        assert_eq!(envelope.command_id(), Some("trace-id"));
    }

    #[test]
    fn schema_parsing() {
        assert_eq!(parse_schema("state/1.0").unwrap(), ("state", 1, 0));
        assert_eq!(
            parse_schema("evt.wifi.roam_miss/1.0").unwrap(),
            ("evt.wifi.roam_miss", 1, 0)
        );
        assert!(parse_schema("state").is_err());
        assert!(parse_schema("state/1").is_err());
        assert!(parse_schema("/1.0").is_err());
        assert!(parse_schema("state/x.y").is_err());
    }

    #[test]
    fn publish_class_policy_table() {
        let cases = [
            ("state/1.0", PublishClass::State, 1, true),
            ("attr/1.0", PublishClass::Attr, 1, true),
            ("lwt/1.0", PublishClass::Lwt, 1, true),
            ("telemetry.power/1.0", PublishClass::Telemetry, 0, false),
            ("evt.motion/1.0", PublishClass::Event, 1, false),
            ("cmd.turn_on/1.0", PublishClass::CmdRequest, 2, false),
            ("cmd.ack/1.0", PublishClass::CmdAck, 1, false),
            ("cmd.result/1.0", PublishClass::CmdResult, 1, false),
        ];
        for (schema, class, qos, retained) in cases {
            let got = PublishClass::of_schema(schema).unwrap();
            assert_eq!(got, class, "{schema}");
            assert_eq!(got.qos(), qos, "{schema}");
            assert_eq!(got.retained(), retained, "{schema}");
        }
    }

    #[test]
    fn unknown_schema_name_is_unclassified() {
        assert!(PublishClass::of_schema("mystery/1.0").is_none());
        assert!(PublishClass::of_schema("not-a-schema").is_none());
    }

    #[test]
    fn malformed_envelope_rejected() {
        assert!(CanonicalEnvelope::from_slice(b"not json").is_err());
        // Valid JSON, invalid schema string.
        let bad = br#"{"schema":"nope","ts":0,"device_id":"d","payload":{}}"#;
        assert!(matches!(
            CanonicalEnvelope::from_slice(bad),
            Err(EnvelopeError::BadSchema(_))
        ));
    }
}
