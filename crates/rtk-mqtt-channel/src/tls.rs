//! TLS configuration for broker connections.
//!
//! Loads a CA certificate and optional client certificate/key from PEM
//! files and configures rumqttc's TLS transport. Client auth (mTLS) is
//! enabled only when both client paths are set.

use rumqttc::Transport;

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};

/// Build a TLS transport from certificate file paths in the config.
pub fn load_tls_transport(config: &MqttConfig) -> MqttResult<Transport> {
    let ca = std::fs::read(&config.ca_cert_path).map_err(|e| {
        MqttError::Tls(format!(
            "failed to read CA cert '{}': {e}",
            config.ca_cert_path
        ))
    })?;

    let client_auth = if !config.client_cert_path.is_empty() && !config.client_key_path.is_empty()
    {
        let cert = std::fs::read(&config.client_cert_path).map_err(|e| {
            MqttError::Tls(format!(
                "failed to read client cert '{}': {e}",
                config.client_cert_path
            ))
        })?;
        let key = std::fs::read(&config.client_key_path).map_err(|e| {
            MqttError::Tls(format!(
                "failed to read client key '{}': {e}",
                config.client_key_path
            ))
        })?;
        Some((cert, key))
    } else {
        None
    };

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        },
    ))
}
