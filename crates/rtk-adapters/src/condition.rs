//! Declarative payload match conditions.
//!
//! Profiles use these to discriminate sub-profiles sharing one topic
//! pattern, e.g. a Tasmota dimmer is a switch payload that also carries
//! a `Dimmer` field.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use rtk_protocol::FlexiblePayload;

/// A compiled regex that deserializes from its pattern string.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct RegexField(pub Regex);

impl TryFrom<String> for RegexField {
    type Error = regex::Error;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        Ok(Self(Regex::new(&pattern)?))
    }
}

impl RegexField {
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

/// One condition over the inbound payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCondition {
    /// The path resolves to any value.
    Present { path: String },
    /// The path resolves to nothing.
    Absent { path: String },
    /// The path resolves to exactly this value.
    Equals { path: String, value: Value },
    /// The path resolves to a string matching the regex.
    Matches { path: String, regex: RegexField },
}

impl MatchCondition {
    pub fn evaluate(&self, payload: &FlexiblePayload) -> bool {
        match self {
            Self::Present { path } => payload.contains(path),
            Self::Absent { path } => !payload.contains(path),
            Self::Equals { path, value } => payload.get_value(path) == Some(value),
            Self::Matches { path, regex } => payload
                .get_str(path)
                .is_some_and(|s| regex.is_match(s)),
        }
    }
}

/// True when every condition holds (vacuously true for an empty list).
pub fn all_hold(conditions: &[MatchCondition], payload: &FlexiblePayload) -> bool {
    conditions.iter().all(|c| c.evaluate(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> FlexiblePayload {
        FlexiblePayload::from_value(v)
    }

    #[test]
    fn present_and_absent() {
        let p = payload(json!({"Dimmer": 75}));
        assert!(MatchCondition::Present {
            path: "Dimmer".into()
        }
        .evaluate(&p));
        assert!(!MatchCondition::Absent {
            path: "Dimmer".into()
        }
        .evaluate(&p));
        assert!(MatchCondition::Absent {
            path: "POWER".into()
        }
        .evaluate(&p));
    }

    #[test]
    fn equals_compares_values() {
        let p = payload(json!({"state": "on", "level": 3}));
        assert!(MatchCondition::Equals {
            path: "state".into(),
            value: json!("on")
        }
        .evaluate(&p));
        assert!(!MatchCondition::Equals {
            path: "level".into(),
            value: json!(4)
        }
        .evaluate(&p));
    }

    #[test]
    fn regex_matches_strings_only() {
        let p = payload(json!({"model": "lumi.sensor_motion.v2", "n": 5}));
        let cond = MatchCondition::Matches {
            path: "model".into(),
            regex: RegexField::try_from("^lumi\\.".to_string()).unwrap(),
        };
        assert!(cond.evaluate(&p));

        let cond = MatchCondition::Matches {
            path: "n".into(),
            regex: RegexField::try_from(".*".to_string()).unwrap(),
        };
        assert!(!cond.evaluate(&p));
    }

    #[test]
    fn empty_condition_list_holds() {
        assert!(all_hold(&[], &payload(json!({}))));
    }

    #[test]
    fn deserializes_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            when: Vec<MatchCondition>,
        }
        let holder: Holder = toml::from_str(
            r#"
[[when]]
present = { path = "Dimmer" }

[[when]]
matches = { path = "model", regex = "^lumi\\." }
"#,
        )
        .unwrap();
        assert_eq!(holder.when.len(), 2);
    }
}
