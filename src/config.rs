//! Configuration file support for the publisher
//!
//! A publisher is described by a TOML file with an `[mqtt]` section (how to
//! reach the broker) and a `[publish]` section (what to send). The file is
//! turned into a validated [`ConnectionConfig`] before any network activity.

use crate::session::QualityOfService;
use crate::transport::mqtt::{ConnectionConfig, ConnectionConfigBuilder, CredentialSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Publisher configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub publish: PublishSection,
}

/// Broker connection section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MqttSection {
    /// Broker endpoint: host, host:port, mqtt://... or mqtts://...
    pub endpoint: String,
    /// Port override
    pub port: Option<u16>,
    /// Client identifier; a `test-<uuid>` id is generated when absent
    pub client_id: Option<String>,
    /// Client certificate (PEM)
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Trusted CA bundle (PEM)
    pub ca_path: Option<PathBuf>,
    #[serde(default)]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
}

fn default_keep_alive_secs() -> u16 {
    crate::transport::mqtt::connection::DEFAULT_KEEP_ALIVE_SECS
}

/// What the publisher sends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Device file the reading is taken from
    #[serde(default = "default_sensor_path")]
    pub sensor_path: PathBuf,
    /// QoS level 0, 1 or 2
    #[serde(default = "default_qos")]
    pub qos: u8,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            sensor_path: default_sensor_path(),
            qos: default_qos(),
        }
    }
}

fn default_topic() -> String {
    "sdk/test/temp".to_string()
}

fn default_sensor_path() -> PathBuf {
    PathBuf::from("/dev/tempdriver")
}

fn default_qos() -> u8 {
    1
}

/// Configuration errors, raised before any connection attempt
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid client id: {0}")]
    InvalidClientId(String),
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("Credentials supplied for plaintext endpoint {0}")]
    UnexpectedCredentials(String),
    #[error("Failed to read {what} from {}: {source}", path.display())]
    CredentialRead {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid {what}: {reason}")]
    InvalidCredential { what: &'static str, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PublisherConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PublisherConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check fields that TOML typing cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingField("mqtt.endpoint"));
        }
        if self.publish.topic.is_empty() {
            return Err(ConfigError::MissingField("publish.topic"));
        }
        self.qos()?;
        Ok(())
    }

    pub fn qos(&self) -> Result<QualityOfService, ConfigError> {
        QualityOfService::from_level(self.publish.qos).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "publish.qos must be 0, 1 or 2, got {}",
                self.publish.qos
            ))
        })
    }

    /// Client id from the file, or a generated `test-<uuid>`
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id)
    }

    /// Build the validated connection config; credential files are read here
    pub fn to_connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut builder = ConnectionConfigBuilder::new()
            .with_endpoint(self.mqtt.endpoint.clone())
            .with_client_id(self.client_id())
            .with_clean_session(self.mqtt.clean_session)
            .with_keep_alive_secs(self.mqtt.keep_alive_secs);

        if let Some(port) = self.mqtt.port {
            builder = builder.with_port(port);
        }
        if let Some(cert) = &self.mqtt.cert_path {
            builder = builder.with_certificate(CredentialSource::file(cert));
        }
        if let Some(key) = &self.mqtt.key_path {
            builder = builder.with_private_key(CredentialSource::file(key));
        }
        if let Some(ca) = &self.mqtt.ca_path {
            builder = builder.with_certificate_authority(CredentialSource::file(ca));
        }

        builder.build()
    }
}

/// Client id in the style of the AWS IoT samples
pub fn generate_client_id() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let toml_content = r#"
[mqtt]
endpoint = "mqtt://localhost:1883"
"#;

        let config: PublisherConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.endpoint, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.keep_alive_secs, 1000);
        assert!(!config.mqtt.clean_session);
        assert_eq!(config.publish.topic, "sdk/test/temp");
        assert_eq!(config.publish.sensor_path, PathBuf::from("/dev/tempdriver"));
        assert_eq!(config.qos().unwrap(), QualityOfService::AtLeastOnce);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_client_id() {
        let config: PublisherConfig = toml::from_str("[mqtt]\nendpoint = \"mqtt://localhost\"\n").unwrap();
        let id = config.client_id();
        assert!(id.starts_with("test-"));
        assert_eq!(id.len(), "test-".len() + 36);
    }

    #[test]
    fn test_invalid_qos() {
        let toml_content = r#"
[mqtt]
endpoint = "mqtt://localhost"

[publish]
qos = 3
"#;
        let config: PublisherConfig = toml::from_str(toml_content).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_plaintext_connection_config() {
        let toml_content = r#"
[mqtt]
endpoint = "mqtt://localhost"
port = 1884
client_id = "bench-device"
clean_session = true
keep_alive_secs = 30
"#;
        let config: PublisherConfig = toml::from_str(toml_content).unwrap();
        let connection = config.to_connection_config().unwrap();
        assert_eq!(connection.client_id(), "bench-device");
        assert_eq!(connection.endpoint().port(), 1884);
        assert!(connection.clean_session());
        assert!(connection.credentials().is_none());
    }

    #[test]
    fn test_error_display() {
        let errors = vec![
            ConfigError::MissingField("mqtt.endpoint"),
            ConfigError::InvalidEndpoint("x".to_string()),
            ConfigError::InvalidClientId("x".to_string()),
            ConfigError::MissingCredential("certificate"),
            ConfigError::UnexpectedCredentials("mqtt://localhost:1883".to_string()),
            ConfigError::InvalidCredential {
                what: "private key",
                reason: "x".to_string(),
            },
            ConfigError::InvalidConfig("x".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
