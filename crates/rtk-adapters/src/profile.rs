//! Declarative per-vendor adapter profiles.
//!
//! A profile is data: topic patterns, field mappings, command tables,
//! and value transforms. The transform contract is two pure functions,
//! `transform_uplink` and `transform_downlink`, driven entirely by that
//! data. Profiles deserialize from TOML so vendors can be added or
//! adjusted without code.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use rtk_protocol::{
    CanonicalEnvelope, CmdStage, FlexiblePayload, MsgType, PublishClass, Specificity,
    TopicCoordinates, TopicPattern, TraceContext, parse_schema, topics,
};

use crate::condition::{MatchCondition, RegexField, all_hold};
use crate::error::TransformError;
use crate::message::InflightMessage;
use crate::transform::ValueTransform;

fn default_true() -> bool {
    true
}

fn default_downlink_qos() -> u8 {
    1
}

fn default_downlink_topics() -> Vec<TopicPattern> {
    // Constant template, cannot fail to compile.
    vec![TopicPattern::compile("rtk/v1/{tenant}/{site}/{device_id}/cmd/req").unwrap()]
}

/// Gateway-level tenant/site used when a profile does not override them.
#[derive(Debug, Clone)]
pub struct SiteDefaults {
    pub tenant: String,
    pub site: String,
}

/// Errors raised while loading profile configuration.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile parse error: {0}")]
    Parse(String),
}

/// One vendor family's translation rules.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterProfile {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher wins when several profiles claim the same message.
    #[serde(default)]
    pub priority: i32,
    /// Tenant/site stamped on uplinks; falls back to gateway defaults.
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    /// Downlink claim filter on the canonical device id.
    #[serde(default)]
    pub device_match: Option<RegexField>,
    /// RTK-side patterns this profile listens on for downlinks.
    #[serde(default = "default_downlink_topics")]
    pub downlink_topics: Vec<TopicPattern>,
    #[serde(default)]
    pub uplink: Vec<UplinkRule>,
    #[serde(default)]
    pub downlink: Vec<DownlinkRule>,
}

/// One uplink translation: vendor topic pattern to canonical envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkRule {
    pub topic: TopicPattern,
    /// Canonical schema; placeholders allowed, e.g. `telemetry.{metric}/1.0`.
    pub schema: String,
    /// Canonical device id template over bindings and payload fields,
    /// e.g. `{name}_light` or `{device}`.
    pub device_id: String,
    #[serde(default)]
    pub when: Vec<MatchCondition>,
    #[serde(default)]
    pub fields: Vec<FieldMap>,
    /// Constants merged into the canonical payload before mapped fields.
    #[serde(default)]
    pub static_fields: Map<String, Value>,
    /// Forward the whole payload object as the canonical body.
    #[serde(default)]
    pub passthrough: bool,
}

/// Source path to canonical key, with an optional value transform.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMap {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub transform: Option<ValueTransform>,
    #[serde(default)]
    pub required: bool,
}

/// One downlink translation: canonical command to vendor publish.
#[derive(Debug, Clone, Deserialize)]
pub struct DownlinkRule {
    /// Command name matched against the envelope schema (`cmd.<command>/..`).
    pub command: String,
    /// Vendor topic template over `{tenant}`, `{site}`, `{device_id}`
    /// and named args.
    pub topic: String,
    /// Vendor body template. A bare string publishes raw bytes; any
    /// other JSON shape is serialized. String leaves substitute
    /// `{name}` placeholders.
    pub payload: Value,
    #[serde(default = "default_downlink_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retained: bool,
    #[serde(default)]
    pub when: Vec<MatchCondition>,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

/// Named template argument extracted from the inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    /// Path into the envelope JSON, e.g. `payload.brightness`,
    /// `device_id`, `trace.req_id`.
    pub from: String,
    #[serde(default)]
    pub transform: Option<ValueTransform>,
}

/// Result of a downlink transform, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

impl AdapterProfile {
    /// Load a profile from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        toml::from_str(text).map_err(|e| ProfileError::Parse(e.to_string()))
    }

    // ── Uplink side ───────────────────────────────────────────

    /// Subscription filters covering every uplink pattern (deduplicated).
    pub fn uplink_subscribe_filters(&self) -> Vec<String> {
        let mut filters = Vec::new();
        for rule in &self.uplink {
            let filter = rule.topic.subscribe_filter();
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        filters
    }

    /// Most specific uplink rule whose pattern and conditions match.
    /// Declaration order breaks specificity ties.
    pub fn best_uplink_rule(
        &self,
        topic: &str,
        payload: &FlexiblePayload,
    ) -> Option<(&UplinkRule, HashMap<String, String>)> {
        let mut best: Option<(&UplinkRule, HashMap<String, String>, Specificity)> = None;
        for rule in &self.uplink {
            let Some(bindings) = rule.topic.matches(topic) else {
                continue;
            };
            if !all_hold(&rule.when, payload) {
                continue;
            }
            let specificity = rule.topic.specificity();
            let better = match &best {
                Some((_, _, current)) => specificity > *current,
                None => true,
            };
            if better {
                best = Some((rule, bindings, specificity));
            }
        }
        best.map(|(rule, bindings, _)| (rule, bindings))
    }

    pub fn can_handle_uplink(&self, topic: &str, payload: &FlexiblePayload) -> bool {
        self.best_uplink_rule(topic, payload).is_some()
    }

    /// Specificity of the winning uplink rule, for registry scoring.
    pub fn uplink_specificity(&self, topic: &str, payload: &FlexiblePayload) -> Option<Specificity> {
        self.best_uplink_rule(topic, payload)
            .map(|(rule, _)| rule.topic.specificity())
    }

    /// Translate a vendor message into a canonical envelope plus the
    /// RTK coordinates to publish it under.
    pub fn transform_uplink(
        &self,
        msg: &InflightMessage,
        defaults: &SiteDefaults,
    ) -> Result<(CanonicalEnvelope, TopicCoordinates), TransformError> {
        let (rule, bindings) = self
            .best_uplink_rule(&msg.raw.topic, &msg.payload)
            .ok_or_else(|| {
                TransformError::validation(format!(
                    "no uplink rule in '{}' matches '{}'",
                    self.name, msg.raw.topic
                ))
            })?;

        let device_id = render_template(&rule.device_id, &bindings, &msg.payload)?;
        let schema = render_template(&rule.schema, &bindings, &msg.payload)?;
        parse_schema(&schema)
            .map_err(|e| TransformError::validation(format!("rule schema: {e}")))?;

        let mut body = rule.static_fields.clone();
        if rule.passthrough {
            if let Some(Value::Object(map)) = msg.payload.json() {
                for (key, value) in map {
                    body.insert(key.clone(), value.clone());
                }
            }
        }
        for field in &rule.fields {
            let Some(value) = msg.payload.get_value(&field.from) else {
                if field.required {
                    return Err(TransformError::missing_field(format!(
                        "'{}' absent from payload",
                        field.from
                    )));
                }
                continue;
            };
            let value = match &field.transform {
                Some(transform) => transform.apply(value)?,
                None => value.clone(),
            };
            body.insert(field.to.clone(), value);
        }

        let msg_type = msg_type_of_schema(&schema)?;
        let mut envelope = CanonicalEnvelope::new(&schema, &device_id, Value::Object(body));

        // Command acks/results carry their correlation id in the trace.
        if matches!(msg_type, MsgType::Cmd(_)) {
            if let Some(id) = envelope
                .payload
                .get("command_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
            {
                envelope.trace = Some(TraceContext {
                    req_id: Some(id),
                    session_id: None,
                });
            }
        }

        let coords = TopicCoordinates {
            tenant: self.tenant.clone().unwrap_or_else(|| defaults.tenant.clone()),
            site: self.site.clone().unwrap_or_else(|| defaults.site.clone()),
            device_id,
            msg_type,
        };

        Ok((envelope, coords))
    }

    // ── Downlink side ─────────────────────────────────────────

    /// RTK-side subscription filters for this profile's downlinks.
    pub fn downlink_subscribe_filters(&self) -> Vec<String> {
        let mut filters = Vec::new();
        for pattern in &self.downlink_topics {
            let filter = pattern.subscribe_filter();
            if !filters.contains(&filter) {
                filters.push(filter);
            }
        }
        filters
    }

    /// Specificity of the best matching downlink pattern.
    pub fn downlink_specificity(&self, topic: &str) -> Option<Specificity> {
        self.downlink_topics
            .iter()
            .filter(|p| p.matches(topic).is_some())
            .map(|p| p.specificity())
            .max()
    }

    pub fn can_handle_downlink(&self, topic: &str, payload: &FlexiblePayload) -> bool {
        if self.downlink_specificity(topic).is_none() {
            return false;
        }
        let Ok(coords) = topics::parse(topic) else {
            return false;
        };
        if coords.msg_type != MsgType::Cmd(CmdStage::Request) {
            return false;
        }
        if let Some(device_match) = &self.device_match {
            if !device_match.is_match(&coords.device_id) {
                return false;
            }
        }
        self.downlink_rule_for(payload).is_some()
    }

    /// Translate a canonical command request into a vendor publish.
    pub fn transform_downlink(
        &self,
        msg: &InflightMessage,
        coords: &TopicCoordinates,
    ) -> Result<DownlinkPublish, TransformError> {
        let envelope = CanonicalEnvelope::from_slice(msg.raw.payload.as_slice())
            .map_err(|e| TransformError::validation(format!("bad command envelope: {e}")))?;

        let rule = self.downlink_rule_for(&msg.payload).ok_or_else(|| {
            TransformError::validation(format!(
                "profile '{}' has no mapping for schema '{}'",
                self.name, envelope.schema
            ))
        })?;

        let mut ctx: HashMap<String, Value> = HashMap::new();
        ctx.insert("tenant".into(), Value::String(coords.tenant.clone()));
        ctx.insert("site".into(), Value::String(coords.site.clone()));
        ctx.insert("device_id".into(), Value::String(coords.device_id.clone()));

        for arg in &rule.args {
            let Some(value) = msg.payload.get_value(&arg.from) else {
                continue;
            };
            let value = match &arg.transform {
                Some(transform) => transform.apply(value)?,
                None => value.clone(),
            };
            ctx.insert(arg.name.clone(), value);
        }

        let topic = render_downlink_string(&rule.topic, &ctx)?;
        let rendered = render_downlink_value(&rule.payload, &ctx)?;
        let payload = match rendered {
            Value::String(s) => s.into_bytes(),
            other => serde_json::to_vec(&other)
                .map_err(|e| TransformError::validation(format!("body serialization: {e}")))?,
        };

        Ok(DownlinkPublish {
            topic,
            payload,
            qos: rule.qos,
            retained: rule.retained,
        })
    }

    /// Command rule matching the inbound request payload, if any.
    fn downlink_rule_for(&self, payload: &FlexiblePayload) -> Option<&DownlinkRule> {
        let schema = payload.get_str("schema")?;
        let (name, _, _) = parse_schema(schema).ok()?;
        let command = name.strip_prefix("cmd.")?;
        self.downlink
            .iter()
            .find(|rule| rule.command == command && all_hold(&rule.when, payload))
    }
}

/// Derive the RTK message type from a canonical schema string.
fn msg_type_of_schema(schema: &str) -> Result<MsgType, TransformError> {
    let class = PublishClass::of_schema(schema).ok_or_else(|| {
        TransformError::validation(format!("unclassifiable schema '{schema}'"))
    })?;
    let (name, _, _) =
        parse_schema(schema).map_err(|e| TransformError::validation(e.to_string()))?;
    let msg_type = match class {
        PublishClass::State => MsgType::State,
        PublishClass::Attr => MsgType::Attr,
        PublishClass::Lwt => MsgType::Lwt,
        PublishClass::Telemetry => {
            let metric = name.strip_prefix("telemetry.").unwrap_or(name);
            MsgType::Telemetry(metric.to_string())
        }
        PublishClass::Event => {
            let event = name.strip_prefix("evt.").unwrap_or(name);
            MsgType::Event(event.to_string())
        }
        PublishClass::CmdRequest => MsgType::Cmd(CmdStage::Request),
        PublishClass::CmdAck => MsgType::Cmd(CmdStage::Ack),
        PublishClass::CmdResult => MsgType::Cmd(CmdStage::Result),
    };
    Ok(msg_type)
}

/// Substitute `{name}` from topic bindings first, then payload fields.
fn render_template(
    template: &str,
    bindings: &HashMap<String, String>,
    payload: &FlexiblePayload,
) -> Result<String, TransformError> {
    expand(template, |name| {
        if let Some(bound) = bindings.get(name) {
            return Some(bound.clone());
        }
        payload.get_value(name).and_then(scalar_to_string)
    })
}

/// Substitute `{name}` from a downlink context of JSON values.
fn render_downlink_string(
    template: &str,
    ctx: &HashMap<String, Value>,
) -> Result<String, TransformError> {
    expand(template, |name| ctx.get(name).and_then(scalar_to_string))
}

/// Walk a JSON body template, substituting placeholders in strings.
/// A string that is exactly one placeholder takes the typed value.
fn render_downlink_value(
    template: &Value,
    ctx: &HashMap<String, Value>,
) -> Result<Value, TransformError> {
    match template {
        Value::String(s) => {
            if let Some(name) = lone_placeholder(s) {
                return ctx
                    .get(name)
                    .cloned()
                    .ok_or_else(|| missing_placeholder(name));
            }
            Ok(Value::String(render_downlink_string(s, ctx)?))
        }
        Value::Array(items) => {
            let rendered: Result<Vec<Value>, TransformError> = items
                .iter()
                .map(|item| render_downlink_value(item, ctx))
                .collect();
            Ok(Value::Array(rendered?))
        }
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_downlink_value(value, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn missing_placeholder(name: &str) -> TransformError {
    TransformError::missing_field(format!("no value for placeholder '{{{name}}}'"))
}

/// `"{value}"` exactly, nothing around it.
fn lone_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?;
    if !inner.is_empty() && !inner.contains(['{', '}']) {
        Some(inner)
    } else {
        None
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Expand `{name}` placeholders via a lookup, erroring on unknowns.
fn expand<F>(template: &str, lookup: F) -> Result<String, TransformError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(TransformError::validation(format!(
                "unbalanced braces in template '{template}'"
            )));
        };
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| missing_placeholder(name))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
