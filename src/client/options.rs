// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::utils::random_client_id;
use codec::{ProtocolVersion, QoS};
use std::time::Duration;

/// Will message attached to the CONNECT packet.
#[derive(Debug, Clone)]
pub struct WillOptions {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,

    /// Will Delay Interval in seconds, v5 only.
    pub delay_interval: Option<u32>,

    /// Message Expiry Interval of the will, v5 only.
    pub message_expiry_interval: Option<u32>,
}

impl WillOptions {
    #[must_use]
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
            delay_interval: None,
            message_expiry_interval: None,
        }
    }
}

/// Connection parameters of an [`crate::client::AsyncClient`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    address: String,
    version: ProtocolVersion,
    client_id: String,
    username: Option<String>,
    password: Option<Vec<u8>>,
    keep_alive: u16,
    clean_session: bool,
    session_expiry_interval: Option<u32>,
    receive_maximum: Option<u16>,
    topic_alias_maximum: u16,
    request_response_information: bool,
    will: Option<WillOptions>,

    /// Override of the PINGREQ emission interval; `None` follows the keep
    /// alive value.
    pingreq_interval: Option<Duration>,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            version: ProtocolVersion::V311,
            client_id: random_client_id(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            session_expiry_interval: None,
            receive_maximum: None,
            topic_alias_maximum: 0,
            request_response_information: false,
            will: None,
            pingreq_interval: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_version(&mut self, version: ProtocolVersion) -> &mut Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_username(&mut self, username: &str) -> &mut Self {
        self.username = Some(username.to_string());
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn set_password(&mut self, password: &[u8]) -> &mut Self {
        self.password = Some(password.to_vec());
        self
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Clean session (v3.1.1) / clean start (v5).
    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_session_expiry_interval(&mut self, seconds: u32) -> &mut Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> Option<u32> {
        self.session_expiry_interval
    }

    pub fn set_receive_maximum(&mut self, maximum: u16) -> &mut Self {
        self.receive_maximum = Some(maximum);
        self
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> Option<u16> {
        self.receive_maximum
    }

    /// Highest topic alias this client accepts from the server.
    pub fn set_topic_alias_maximum(&mut self, maximum: u16) -> &mut Self {
        self.topic_alias_maximum = maximum;
        self
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> u16 {
        self.topic_alias_maximum
    }

    pub fn set_request_response_information(&mut self, on: bool) -> &mut Self {
        self.request_response_information = on;
        self
    }

    #[must_use]
    pub const fn request_response_information(&self) -> bool {
        self.request_response_information
    }

    pub fn set_will(&mut self, will: WillOptions) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&WillOptions> {
        self.will.as_ref()
    }

    pub fn set_pingreq_interval(&mut self, interval: Duration) -> &mut Self {
        self.pingreq_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn pingreq_interval(&self) -> Option<Duration> {
        self.pingreq_interval
    }
}
