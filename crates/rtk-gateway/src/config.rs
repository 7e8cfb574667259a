//! Gateway configuration, loadable from TOML.

use serde::Deserialize;

use rtk_adapters::{AdapterProfile, AdapterRegistry, profiles};
use rtk_mqtt_channel::MqttConfig;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Identifier used for the gateway's own status/LWT topics.
    #[serde(default = "default_gateway_id")]
    pub gateway_id: String,
    /// Tenant stamped on uplinks when the vendor payload has none.
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    /// Site stamped on uplinks when the vendor payload has none.
    #[serde(default = "default_site")]
    pub default_site: String,
    /// MQTT connection settings.
    pub mqtt: MqttConfig,
    /// Worker pool size; 0 means one per available core (capped).
    #[serde(default)]
    pub workers: usize,
    /// Per-message deadline for uplink translation, ms.
    #[serde(default = "default_uplink_deadline_ms")]
    pub uplink_deadline_ms: u64,
    /// Per-message deadline for downlink translation, ms.
    #[serde(default = "default_downlink_deadline_ms")]
    pub downlink_deadline_ms: u64,
    /// Default command timeout when the envelope carries none, ms.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Extra time allowed between ack and result, ms.
    #[serde(default = "default_ack_grace_ms")]
    pub ack_grace_ms: u64,
    /// How long terminal correlator entries linger, ms.
    #[serde(default = "default_observation_window_ms")]
    pub observation_window_ms: u64,
    /// Correlator map size cap; oldest entries evicted beyond it.
    #[serde(default = "default_correlator_capacity")]
    pub correlator_capacity: usize,
    /// Gateway status publish interval, seconds. 0 disables.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Shutdown drain deadline for in-flight work, ms.
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
    /// Enabled adapter profiles. Empty means all built-ins.
    #[serde(default)]
    pub profiles: Vec<ProfileRef>,
}

/// One profile entry in the gateway config.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRef {
    /// Built-in name, or the name expected in `config_path`.
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional TOML file overriding the built-in definition.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Optional priority override.
    #[serde(default)]
    pub priority: Option<i32>,
}

impl GatewayConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Worker pool size after resolving the "0 = auto" default.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(16)
    }

    /// Build the adapter registry from this config.
    ///
    /// With no `profiles` entries, every built-in profile is enabled.
    /// Otherwise each entry names a built-in or a TOML file, with
    /// optional enabled/priority overrides.
    pub fn build_registry(&self) -> anyhow::Result<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();

        if self.profiles.is_empty() {
            for profile in profiles::builtin_profiles() {
                registry.register(profile)?;
            }
            return Ok(registry);
        }

        for reference in &self.profiles {
            let mut profile = match &reference.config_path {
                Some(path) => {
                    let contents = std::fs::read_to_string(path)?;
                    AdapterProfile::from_toml_str(&contents)?
                }
                None => profiles::builtin(&reference.name).ok_or_else(|| {
                    anyhow::anyhow!("unknown built-in profile '{}'", reference.name)
                })?,
            };
            profile.enabled = reference.enabled;
            if let Some(priority) = reference.priority {
                profile.priority = priority;
            }
            registry.register(profile)?;
        }
        Ok(registry)
    }
}

fn default_gateway_id() -> String {
    "rtk-gateway".to_string()
}

fn default_tenant() -> String {
    "home".to_string()
}

fn default_site() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_uplink_deadline_ms() -> u64 {
    5_000
}

fn default_downlink_deadline_ms() -> u64 {
    10_000
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_ack_grace_ms() -> u64 {
    5_000
}

fn default_observation_window_ms() -> u64 {
    30_000
}

fn default_correlator_capacity() -> usize {
    4096
}

fn default_status_interval_secs() -> u64 {
    30
}

fn default_drain_deadline_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config() {
        let toml = r#"
[mqtt]
broker_host = "broker.local"
client_id = "gw-1"
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway_id, "rtk-gateway");
        assert_eq!(config.default_tenant, "home");
        assert_eq!(config.default_site, "main");
        assert_eq!(config.uplink_deadline_ms, 5_000);
        assert_eq!(config.downlink_deadline_ms, 10_000);
        assert_eq!(config.command_timeout_ms, 10_000);
        assert_eq!(config.observation_window_ms, 30_000);
        assert!(config.profiles.is_empty());
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
gateway_id = "gw-basement"
default_tenant = "acme"
default_site = "plant7"
workers = 4
command_timeout_ms = 2000
status_interval_secs = 10

[mqtt]
broker_host = "broker.example.com"
client_id = "gw-basement"

[[profiles]]
name = "tasmota"

[[profiles]]
name = "homeassistant"
enabled = false
priority = 10
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_tenant, "acme");
        assert_eq!(config.effective_workers(), 4);
        assert_eq!(config.profiles.len(), 2);
        assert!(!config.profiles[1].enabled);
        assert_eq!(config.profiles[1].priority, Some(10));
    }

    #[test]
    fn empty_profiles_enables_all_builtins() {
        let toml = r#"
[mqtt]
broker_host = "b"
client_id = "c"
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.list(true).len(), 4);
    }

    #[test]
    fn profile_overrides_apply() {
        let toml = r#"
[mqtt]
broker_host = "b"
client_id = "c"

[[profiles]]
name = "tasmota"
priority = 5

[[profiles]]
name = "zigbee"
enabled = false
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("tasmota").unwrap().priority, 5);
        assert!(!registry.get("zigbee").unwrap().enabled);
        assert_eq!(registry.list(true).len(), 1);
    }

    #[test]
    fn unknown_builtin_is_an_error() {
        let toml = r#"
[mqtt]
broker_host = "b"
client_id = "c"

[[profiles]]
name = "betamax"
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.build_registry().is_err());
    }
}
