//! Shared protocol types for the RTK MQTT translation gateway.
//!
//! Everything that both sides of the gateway agree on lives here: the
//! canonical JSON envelope, the RTK topic grammar, the schema-free
//! payload wrapper, and the parameterized topic pattern matcher.

pub mod envelope;
pub mod message;
pub mod pattern;
pub mod payload;
pub mod topics;

pub use envelope::{CanonicalEnvelope, EnvelopeError, PublishClass, TraceContext, parse_schema};
pub use message::{Direction, MessageSource, MessageTarget, RawMessage};
pub use pattern::{PatternError, Specificity, TopicPattern};
pub use payload::FlexiblePayload;
pub use topics::{CmdStage, MsgType, TopicCoordinates, TopicError};
