//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RSTOMP_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Templated log/error messages, keyed by name.
    pub messages: MessageTemplates,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RSTOMP_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.tls.apply_env_overrides();
    }

    /// Looks up a message template by key.
    pub fn message(&self, key: &str) -> Option<&str> {
        self.messages.get(key)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections (0 = unthrottled).
    pub max_connections: usize,
    /// Evict connections idle longer than this, in seconds (0 = never).
    pub client_timeout_secs: u64,
    /// STOMP level spoken when interpreting client frames.
    pub protocol_version: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", rstomp_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            max_connections: 1000,
            client_timeout_secs: 300,
            protocol_version: "1.2".to_string(),
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RSTOMP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(max) = std::env::var("RSTOMP_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("RSTOMP_CLIENT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.client_timeout_secs = secs;
            }
        }

        if let Ok(version) = std::env::var("RSTOMP_PROTOCOL_VERSION") {
            self.protocol_version = version;
        }
    }

    /// Returns the idle client timeout as a Duration.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// Returns the configured STOMP level, defaulting to 1.2 when the
    /// string does not parse.
    pub fn protocol_version(&self) -> rstomp_protocol::ProtocolVersion {
        self.protocol_version.parse().unwrap_or_default()
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded server certificate file.
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded private key file.
    pub key_path: Option<PathBuf>,
    /// Require client certificate authentication (mTLS).
    pub require_client_cert: bool,
    /// Path to PEM-encoded CA certificate(s) for verifying client certs.
    /// Required if require_client_cert is true.
    pub client_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("RSTOMP_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("RSTOMP_TLS_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("RSTOMP_TLS_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
        if let Ok(require) = std::env::var("RSTOMP_TLS_REQUIRE_CLIENT_CERT") {
            self.require_client_cert = require == "1" || require.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("RSTOMP_TLS_CLIENT_CA") {
            self.client_ca_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.cert_path.is_none() {
            return Err(ConfigError::ValidationError(
                "TLS enabled but cert_path not set".to_string(),
            ));
        }
        if self.key_path.is_none() {
            return Err(ConfigError::ValidationError(
                "TLS enabled but key_path not set".to_string(),
            ));
        }
        if self.require_client_cert && self.client_ca_path.is_none() {
            return Err(ConfigError::ValidationError(
                "mTLS enabled but client_ca_path not set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Templated human-readable messages, looked up by key and formatted with
/// positional arguments (each `{}` consumes one argument).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplates {
    templates: HashMap<String, String>,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        let mut templates = HashMap::new();
        for (key, template) in [
            ("client_connected", "client {} connected from {}"),
            ("client_disconnected", "client {} disconnected"),
            ("client_evicted", "client {} evicted after {}s idle"),
            ("server_listening", "listening on {}"),
            ("server_stopped", "server stopped"),
        ] {
            templates.insert(key.to_string(), template.to_string());
        }
        Self { templates }
    }
}

impl MessageTemplates {
    /// Looks up a raw template.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.templates.get(key).map(String::as_str)
    }

    /// Renders a template, substituting each `{}` with the next argument.
    /// An unknown key renders as the key itself so log lines never vanish.
    pub fn render(&self, key: &str, args: &[&dyn fmt::Display]) -> String {
        let Some(template) = self.get(key) else {
            return key.to_string();
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut args = args.iter();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match args.next() {
                Some(arg) => out.push_str(&arg.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), rstomp_protocol::DEFAULT_PORT);
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.network.client_timeout(), Duration::from_secs(300));
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.network.max_connections, config.network.max_connections);
    }

    #[test]
    fn test_tls_validation() {
        let config = TlsConfig::default();
        assert!(config.validate().is_ok());

        let config = TlsConfig {
            enabled: true,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cert_path"));

        let config = TlsConfig {
            enabled: true,
            cert_path: Some("/some/cert.pem".into()),
            key_path: Some("/some/key.pem".into()),
            require_client_cert: true,
            client_ca_path: None,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_ca_path"));
    }

    #[test]
    fn test_protocol_version_lookup() {
        let mut network = NetworkConfig::default();
        assert_eq!(
            network.protocol_version(),
            rstomp_protocol::ProtocolVersion::V1_2
        );

        network.protocol_version = "1.0".to_string();
        assert_eq!(
            network.protocol_version(),
            rstomp_protocol::ProtocolVersion::V1_0
        );

        // unparseable values fall back to the default level
        network.protocol_version = "9.9".to_string();
        assert_eq!(
            network.protocol_version(),
            rstomp_protocol::ProtocolVersion::V1_2
        );
    }

    #[test]
    fn test_message_templates() {
        let messages = MessageTemplates::default();
        assert!(messages.get("client_connected").is_some());

        let rendered = messages.render("client_connected", &[&7u64, &"10.0.0.9:4242"]);
        assert_eq!(rendered, "client 7 connected from 10.0.0.9:4242");

        // too few arguments leaves the placeholder visible
        let rendered = messages.render("client_connected", &[&7u64]);
        assert_eq!(rendered, "client 7 connected from {}");

        // unknown key falls back to the key
        assert_eq!(messages.render("no_such_key", &[]), "no_such_key");
    }

    #[test]
    fn test_config_file_parse() {
        let yaml = r#"
network:
  bind_addr: "0.0.0.0:9999"
  max_connections: 5
  client_timeout_secs: 30
tls:
  enabled: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.network.bind_addr.port(), 9999);
        assert_eq!(config.network.max_connections, 5);
        assert_eq!(config.network.client_timeout_secs, 30);
    }
}
