//! MQTT session layer for the RTK gateway.
//!
//! Provides a typed MQTT abstraction over rumqttc:
//! - `Channel` trait for publish/subscribe (mockable in tests)
//! - `MqttSession` with reconnect, resubscribe, LWT, and per-class
//!   outbound queues with back-pressure
//! - `MockChannel` for testing without a broker

pub mod channel;
pub mod config;
pub mod error;
pub mod mock;
pub mod outbound;
pub mod tls;

pub use channel::{Channel, ChannelStats, MqttSession, SessionDriver, qos_level, run_publisher};
pub use config::{MqttConfig, ReconnectConfig};
pub use error::{MqttError, MqttResult};
pub use mock::{MockChannel, Publication};
pub use outbound::{OutboundMessage, OutboundQueue};
