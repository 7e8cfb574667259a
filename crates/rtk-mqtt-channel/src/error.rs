//! MQTT channel error types.

use thiserror::Error;

/// Errors that can occur during MQTT operations.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("publish timeout: {0}")]
    PublishTimeout(String),

    #[error("outbound queue full: {0}")]
    Backpressure(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("reconnect attempts exhausted: {0}")]
    Fatal(String),
}

impl MqttError {
    /// Stable reason string for metrics and drop records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Connection(_) => "session.disconnected",
            Self::Publish(_) => "publish.error",
            Self::PublishTimeout(_) => "publish.timeout",
            Self::Backpressure(_) => "publish.backpressure",
            Self::Subscribe(_) => "subscribe.error",
            Self::Tls(_) => "session.tls",
            Self::Serialization(_) => "publish.serialization",
            Self::Fatal(_) => "session.fatal",
        }
    }
}

/// Convenience alias for MQTT results.
pub type MqttResult<T> = Result<T, MqttError>;
