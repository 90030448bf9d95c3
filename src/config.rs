//! Configuration loading for the emberd binary.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and registration text.
    pub server: ServerSection,
    /// Plain TCP listener.
    #[serde(default)]
    pub listen: ListenSection,
    /// Optional TLS listener.
    pub tls: Option<TlsSection>,
    /// Diagnostics.
    #[serde(default)]
    pub log: LogSection,
}

/// `[server]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Host label used as the source of server replies.
    pub hostname: String,
    /// Network name advertised through ISUPPORT.
    #[serde(default)]
    pub network: String,
    /// Message of the day.
    #[serde(default)]
    pub motd: String,
    /// Text carried by the 001 welcome.
    #[serde(default)]
    pub welcome: String,
}

/// `[listen]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenSection {
    /// Plain listen address.
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ListenSection {
    fn default() -> Self {
        ListenSection {
            address: default_address(),
        }
    }
}

/// `[tls]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSection {
    /// TLS listen address.
    #[serde(default = "default_tls_address")]
    pub address: String,
    /// PEM certificate chain path.
    pub cert: String,
    /// PEM private key path.
    pub key: String,
}

/// `[log]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    /// Default tracing filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        LogSection {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "localhost:6667".to_owned()
}

fn default_tls_address() -> String {
    "localhost:6697".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Load and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            hostname = "irc.example.net"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.hostname, "irc.example.net");
        assert_eq!(config.listen.address, "localhost:6667");
        assert!(config.tls.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn parses_a_full_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            hostname = "irc.example.net"
            network = "examplenet"
            motd = "Hello."
            welcome = "Welcome to examplenet!"

            [listen]
            address = "0.0.0.0:6667"

            [tls]
            address = "0.0.0.0:6697"
            cert = "server.pem"
            key = "server.key"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.network, "examplenet");
        let tls = config.tls.unwrap();
        assert_eq!(tls.address, "0.0.0.0:6697");
        assert_eq!(tls.cert, "server.pem");
        assert_eq!(config.log.level, "debug");
    }
}
