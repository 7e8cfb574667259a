//! RTK topic builders and parsers.
//!
//! Topic structure:
//! ```text
//! rtk/v1/{tenant}/{site}/{device_id}/state
//! rtk/v1/{tenant}/{site}/{device_id}/telemetry/{metric}
//! rtk/v1/{tenant}/{site}/{device_id}/evt/{event_type}
//! rtk/v1/{tenant}/{site}/{device_id}/attr
//! rtk/v1/{tenant}/{site}/{device_id}/cmd/{req|ack|res}
//! rtk/v1/{tenant}/{site}/{device_id}/lwt
//! ```

use thiserror::Error;

/// Root prefix shared by every RTK topic.
pub const PREFIX: &str = "rtk/v1";

/// True when a topic belongs to the RTK hierarchy.
pub fn is_rtk(topic: &str) -> bool {
    topic == PREFIX || topic.starts_with("rtk/v1/")
}

// ─── Topic builders ───

pub fn state(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/state")
}

pub fn telemetry(tenant: &str, site: &str, device_id: &str, metric: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/telemetry/{metric}")
}

pub fn event(tenant: &str, site: &str, device_id: &str, event_type: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/evt/{event_type}")
}

pub fn attr(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/attr")
}

pub fn cmd_request(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/cmd/req")
}

pub fn cmd_ack(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/cmd/ack")
}

pub fn cmd_result(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/cmd/res")
}

pub fn lwt(tenant: &str, site: &str, device_id: &str) -> String {
    format!("{PREFIX}/{tenant}/{site}/{device_id}/lwt")
}

// ─── Subscription filters (with MQTT wildcards) ───

/// All command requests, any tenant/site/device.
pub fn cmd_request_filter() -> String {
    format!("{PREFIX}/+/+/+/cmd/req")
}

/// All command acknowledgements (correlation only).
pub fn cmd_ack_filter() -> String {
    format!("{PREFIX}/+/+/+/cmd/ack")
}

/// All command results (correlation only).
pub fn cmd_result_filter() -> String {
    format!("{PREFIX}/+/+/+/cmd/res")
}

// ─── Topic parsing ───

/// Stage of a command exchange, from the trailing topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStage {
    Request,
    Ack,
    Result,
}

impl CmdStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "req",
            Self::Ack => "ack",
            Self::Result => "res",
        }
    }
}

/// Message type carried in the topic suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    State,
    Telemetry(String),
    Event(String),
    Attr,
    Cmd(CmdStage),
    Lwt,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Telemetry(metric) => write!(f, "telemetry/{metric}"),
            Self::Event(event_type) => write!(f, "evt/{event_type}"),
            Self::Attr => write!(f, "attr"),
            Self::Cmd(stage) => write!(f, "cmd/{}", stage.as_str()),
            Self::Lwt => write!(f, "lwt"),
        }
    }
}

/// Address parsed out of an RTK topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCoordinates {
    pub tenant: String,
    pub site: String,
    pub device_id: String,
    pub msg_type: MsgType,
}

impl TopicCoordinates {
    /// Format back into the full RTK topic.
    pub fn topic(&self) -> String {
        format!(
            "{PREFIX}/{}/{}/{}/{}",
            self.tenant, self.site, self.device_id, self.msg_type
        )
    }
}

/// Errors raised while parsing RTK topics.
#[derive(Debug, Error)]
pub enum TopicError {
    #[error("not an RTK topic: {0}")]
    NotRtk(String),

    #[error("bad topic '{0}': {1}")]
    BadTopic(String, String),
}

/// Parse an RTK topic into coordinates.
///
/// Empty segments and unknown message types are rejected, not skipped;
/// the pipeline reports them as `bad_topic` drops.
pub fn parse(topic: &str) -> Result<TopicCoordinates, TopicError> {
    if !is_rtk(topic) {
        return Err(TopicError::NotRtk(topic.to_string()));
    }

    let bad = |detail: &str| TopicError::BadTopic(topic.to_string(), detail.to_string());

    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 6 {
        return Err(bad("too few segments"));
    }
    if parts.iter().any(|s| s.is_empty()) {
        return Err(bad("empty segment"));
    }

    let (tenant, site, device_id) = (parts[2], parts[3], parts[4]);

    let msg_type = match (parts[5], parts.len()) {
        ("state", 6) => MsgType::State,
        ("attr", 6) => MsgType::Attr,
        ("lwt", 6) => MsgType::Lwt,
        ("telemetry", 7) => MsgType::Telemetry(parts[6].to_string()),
        ("evt", 7) => MsgType::Event(parts[6].to_string()),
        ("cmd", 7) => match parts[6] {
            "req" => MsgType::Cmd(CmdStage::Request),
            "ack" => MsgType::Cmd(CmdStage::Ack),
            "res" => MsgType::Cmd(CmdStage::Result),
            other => return Err(bad(&format!("unknown cmd stage '{other}'"))),
        },
        (other, _) => return Err(bad(&format!("unknown message type '{other}'"))),
    };

    Ok(TopicCoordinates {
        tenant: tenant.to_string(),
        site: site.to_string(),
        device_id: device_id.to_string(),
        msg_type,
    })
}
