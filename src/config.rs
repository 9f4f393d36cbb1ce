// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker configuration, read from a TOML file.
//!
//! ```toml
//! [general]
//! connect_timeout = 30
//!
//! [[listeners]]
//! protocol = "mqtt"
//! address = "0.0.0.0:1883"
//!
//! [security]
//! allow_anonymous = true
//!
//! [log]
//! console_log = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    general: General,

    #[serde(default)]
    listeners: Vec<Listener>,

    #[serde(default)]
    security: Security,

    #[serde(default)]
    log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: General::default(),
            listeners: vec![Listener::default()],
            security: Security::default(),
            log: Log::default(),
        }
    }
}

impl Config {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = std::fs::read_to_string(&path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("config: failed to read {:?}: {err}", path.as_ref()),
            )
        })?;
        Self::parse(&content)
    }

    /// Parse configuration content.
    ///
    /// # Errors
    ///
    /// Returns error if `content` is not valid TOML.
    pub fn parse(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|err| {
            Error::from_string(ErrorKind::ConfigError, format!("config: {err}"))
        })
    }

    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    /// Configured listeners; a default TCP listener when the file names
    /// none.
    #[must_use]
    pub fn listeners(&self) -> Vec<Listener> {
        if self.listeners.is_empty() {
            vec![Listener::default()]
        } else {
            self.listeners.clone()
        }
    }

    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// Seconds a connection may stay silent before CONNECT.
    #[serde(default = "General::default_connect_timeout")]
    connect_timeout: u64,

    /// Our receive limit on total frame size, bytes.
    #[serde(default = "General::default_max_packet_size")]
    max_packet_size: usize,

    /// Highest topic alias accepted from clients.
    #[serde(default = "General::default_topic_alias_maximum")]
    topic_alias_maximum: u16,

    /// Offline queue bound per session; zero means unbounded.
    #[serde(default)]
    max_offline_messages: usize,

    /// Whether a CONNECT with a zero-length client id gets a generated
    /// one.
    #[serde(default = "General::default_allow_empty_client_id")]
    allow_empty_client_id: bool,
}

impl General {
    const fn default_connect_timeout() -> u64 {
        30
    }

    const fn default_max_packet_size() -> usize {
        codec::MAX_PACKET_LEN
    }

    const fn default_topic_alias_maximum() -> u16 {
        32
    }

    const fn default_allow_empty_client_id() -> bool {
        true
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> u64 {
        self.connect_timeout
    }

    #[must_use]
    pub const fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> u16 {
        self.topic_alias_maximum
    }

    #[must_use]
    pub const fn max_offline_messages(&self) -> usize {
        self.max_offline_messages
    }

    #[must_use]
    pub const fn allow_empty_client_id(&self) -> bool {
        self.allow_empty_client_id
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            connect_timeout: Self::default_connect_timeout(),
            max_packet_size: Self::default_max_packet_size(),
            topic_alias_maximum: Self::default_topic_alias_maximum(),
            max_offline_messages: 0,
            allow_empty_client_id: Self::default_allow_empty_client_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP.
    Mqtt,

    /// TCP + TLS.
    Mqtts,

    /// WebSocket.
    Ws,

    /// WebSocket over TLS.
    Wss,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Listener {
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    #[serde(default = "Listener::default_address")]
    address: String,

    /// PEM certificate chain, TLS listeners only.
    #[serde(default)]
    cert_file: Option<PathBuf>,

    /// PEM private key, TLS listeners only.
    #[serde(default)]
    key_file: Option<PathBuf>,
}

impl Listener {
    const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    fn default_address() -> String {
        "127.0.0.1:1883".to_string()
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn cert_file(&self) -> Option<&PathBuf> {
        self.cert_file.as_ref()
    }

    #[must_use]
    pub const fn key_file(&self) -> Option<&PathBuf> {
        self.key_file.as_ref()
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Protocol::Mqtt,
            address: Self::default_address(),
            cert_file: None,
            key_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Security {
    #[serde(default = "Security::default_allow_anonymous")]
    allow_anonymous: bool,

    /// `username:password` lines; when set, anonymous connections are
    /// refused.
    #[serde(default)]
    password_file: Option<PathBuf>,
}

impl Security {
    const fn default_allow_anonymous() -> bool {
        true
    }

    #[must_use]
    pub const fn allow_anonymous(&self) -> bool {
        self.allow_anonymous
    }

    #[must_use]
    pub const fn password_file(&self) -> Option<&PathBuf> {
        self.password_file.as_ref()
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            password_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default = "Log::default_console_log")]
    console_log: bool,
}

impl Log {
    const fn default_console_log() -> bool {
        true
    }

    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }
}

impl Default for Log {
    fn default() -> Self {
        Self { console_log: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.listeners().len(), 1);
        assert_eq!(config.listeners()[0].protocol(), Protocol::Mqtt);
        assert!(config.security().allow_anonymous());
    }

    #[test]
    fn test_parse_full() {
        let content = r#"
[general]
connect_timeout = 5
max_offline_messages = 100

[[listeners]]
protocol = "mqtt"
address = "0.0.0.0:1889"

[[listeners]]
protocol = "mqtts"
address = "0.0.0.0:8883"
cert_file = "/etc/corvid/cert.pem"
key_file = "/etc/corvid/key.pem"

[security]
allow_anonymous = false

[log]
console_log = false
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.general().connect_timeout(), 5);
        assert_eq!(config.general().max_offline_messages(), 100);
        assert_eq!(config.listeners().len(), 2);
        assert_eq!(config.listeners()[1].protocol(), Protocol::Mqtts);
        assert!(!config.security().allow_anonymous());
        assert!(!config.log().console_log());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("[general]\nbogus = 1\n").is_err());
    }
}
