//! MQTT session configuration, loadable from TOML.

use serde::Deserialize;

/// MQTT connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname.
    pub broker_host: String,
    /// Broker port (default 1883; use 8883 with TLS).
    #[serde(default = "default_port")]
    pub broker_port: u16,
    /// Client ID (unique per gateway instance).
    pub client_id: String,
    /// Optional username/password authentication.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Enable TLS. When true, certificate paths below apply.
    #[serde(default)]
    pub use_tls: bool,
    /// Path to CA certificate (PEM).
    #[serde(default)]
    pub ca_cert_path: String,
    /// Path to client certificate (PEM), for mTLS. Optional.
    #[serde(default)]
    pub client_cert_path: String,
    /// Path to client private key (PEM), for mTLS. Optional.
    #[serde(default)]
    pub client_key_path: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u16,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Retained status topic for LWT; online overwrites on connect.
    #[serde(default)]
    pub status_topic: Option<String>,
    /// Reconnect backoff policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Inbound delivery channel capacity; overflow drops the newest.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Outbound telemetry queue cap (drop-oldest on overflow).
    #[serde(default = "default_telemetry_cap")]
    pub telemetry_queue_cap: usize,
    /// Outbound command/state queue cap (bounded wait on overflow).
    #[serde(default = "default_command_cap")]
    pub command_queue_cap: usize,
    /// How long a QoS 1/2 publish may wait for queue space, ms.
    #[serde(default = "default_publish_block_ms")]
    pub publish_block_ms: u64,
}

/// Exponential backoff settings for broker reconnection.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Consecutive failures before the session is declared fatal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `n` (1-based), capped.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_ms as f64 * factor) as u64;
        delay.min(self.max_ms)
    }
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    30
}

fn default_true() -> bool {
    true
}

fn default_inbox_capacity() -> usize {
    1024
}

fn default_telemetry_cap() -> usize {
    64
}

fn default_command_cap() -> usize {
    256
}

fn default_publish_block_ms() -> u64 {
    200
}

fn default_initial_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config() {
        let toml = r#"
broker_host = "broker.local"
client_id = "rtk-gateway-1"
"#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_port, 1883);
        assert!(!config.use_tls);
        assert_eq!(config.keepalive_secs, 30);
        assert!(config.clean_session);
        assert_eq!(config.reconnect.initial_ms, 1000);
        assert_eq!(config.reconnect.max_ms, 30_000);
        assert_eq!(config.telemetry_queue_cap, 64);
        assert_eq!(config.command_queue_cap, 256);
        assert_eq!(config.publish_block_ms, 200);
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
broker_host = "broker.example.com"
broker_port = 8883
client_id = "gw-2"
username = "gateway"
password = "secret"
use_tls = true
ca_cert_path = "/certs/ca.pem"
keepalive_secs = 60
clean_session = false
status_topic = "rtk/v1/home/main/gateway/lwt"

[reconnect]
initial_ms = 500
multiplier = 3.0
max_ms = 10000
max_attempts = 5
"#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.username.as_deref(), Some("gateway"));
        assert!(config.use_tls);
        assert!(!config.clean_session);
        assert_eq!(
            config.status_topic.as_deref(),
            Some("rtk/v1/home/main/gateway/lwt")
        );
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay_ms(1), 1000);
        assert_eq!(reconnect.delay_ms(2), 2000);
        assert_eq!(reconnect.delay_ms(3), 4000);
        // 1s * 2^9 = 512s, capped at 30s.
        assert_eq!(reconnect.delay_ms(10), 30_000);
    }
}
