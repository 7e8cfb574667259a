//! Parameterized topic templates with MQTT wildcard support.
//!
//! A pattern like `homeassistant/{class}/{name}/state` both tests a
//! topic and extracts named segments. Patterns also convert into plain
//! MQTT subscription filters (placeholders become `+`).

use std::collections::HashMap;

use thiserror::Error;

/// One compiled template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `{name}`: matches one segment and captures it.
    Placeholder(String),
    /// `+`: matches one segment, not captured.
    SingleWildcard,
    /// `#`: matches zero or more trailing segments. Final segment only.
    MultiWildcard,
}

/// Errors raised while compiling or instantiating patterns.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("empty segment in pattern '{0}'")]
    EmptySegment(String),

    #[error("bad placeholder '{0}': names are [A-Za-z0-9_]+")]
    BadPlaceholder(String),

    #[error("'#' must be the final segment in '{0}'")]
    HashNotLast(String),

    #[error("duplicate placeholder '{{{0}}}'")]
    DuplicatePlaceholder(String),

    #[error("missing binding for '{{{0}}}'")]
    MissingBinding(String),

    #[error("cannot instantiate wildcard segment in '{0}'")]
    UnboundWildcard(String),
}

/// Specificity ordering on patterns: fewer wildcards beat more, then
/// more literal segments beat fewer. Greater means more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    wildcards: usize,
    literals: usize,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .wildcards
            .cmp(&self.wildcards)
            .then(self.literals.cmp(&other.literals))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Compiled topic template.
///
/// Deserializes from its template string, so patterns can sit directly
/// in profile configuration files.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct TopicPattern {
    template: String,
    segments: Vec<Segment>,
}

impl TryFrom<String> for TopicPattern {
    type Error = PatternError;

    fn try_from(template: String) -> Result<Self, Self::Error> {
        Self::compile(&template)
    }
}

impl std::str::FromStr for TopicPattern {
    type Err = PatternError;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        Self::compile(template)
    }
}

impl TopicPattern {
    /// Compile a template string.
    pub fn compile(template: &str) -> Result<Self, PatternError> {
        if template.is_empty() {
            return Err(PatternError::Empty);
        }

        let raw: Vec<&str> = template.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        let mut seen = Vec::new();

        for (i, part) in raw.iter().enumerate() {
            let segment = match *part {
                "" => return Err(PatternError::EmptySegment(template.to_string())),
                "+" => Segment::SingleWildcard,
                "#" => {
                    if i != raw.len() - 1 {
                        return Err(PatternError::HashNotLast(template.to_string()));
                    }
                    Segment::MultiWildcard
                }
                p if p.starts_with('{') && p.ends_with('}') => {
                    let name = &p[1..p.len() - 1];
                    if name.is_empty()
                        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(PatternError::BadPlaceholder(p.to_string()));
                    }
                    if seen.contains(&name) {
                        return Err(PatternError::DuplicatePlaceholder(name.to_string()));
                    }
                    seen.push(name);
                    Segment::Placeholder(name.to_string())
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// Source template string.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Test a topic, returning placeholder bindings on match.
    pub fn matches(&self, topic: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = topic.split('/').collect();
        let mut bindings = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::MultiWildcard => {
                    // Matches zero or more trailing segments.
                    return Some(bindings);
                }
                _ if i >= parts.len() => return None,
                Segment::Literal(lit) => {
                    if parts[i] != lit {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    bindings.insert(name.clone(), parts[i].to_string());
                }
                Segment::SingleWildcard => {}
            }
        }

        if parts.len() != self.segments.len() {
            return None;
        }
        Some(bindings)
    }

    /// Substitute bindings back into the template to build a topic.
    pub fn instantiate(&self, bindings: &HashMap<String, String>) -> Result<String, PatternError> {
        let mut out = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push(lit.clone()),
                Segment::Placeholder(name) => {
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| PatternError::MissingBinding(name.clone()))?;
                    out.push(value.clone());
                }
                Segment::SingleWildcard | Segment::MultiWildcard => {
                    return Err(PatternError::UnboundWildcard(self.template.clone()));
                }
            }
        }
        Ok(out.join("/"))
    }

    /// Specificity used for tie-breaking between matching patterns.
    pub fn specificity(&self) -> Specificity {
        let mut wildcards = 0;
        let mut literals = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => literals += 1,
                Segment::Placeholder(_) | Segment::SingleWildcard => wildcards += 1,
                // `#` spans many segments; weigh it as two.
                Segment::MultiWildcard => wildcards += 2,
            }
        }
        Specificity {
            wildcards,
            literals,
        }
    }

    /// MQTT subscription filter covering every topic this pattern
    /// matches (placeholders widen to `+`).
    pub fn subscribe_filter(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(lit) => lit.as_str(),
                Segment::Placeholder(_) | Segment::SingleWildcard => "+",
                Segment::MultiWildcard => "#",
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}
