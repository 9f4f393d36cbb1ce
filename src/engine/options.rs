// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ProtocolVersion, MAX_PACKET_LEN};
use std::time::Duration;

/// Which half of the conversation this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Sends CONNECT, receives CONNACK, emits PINGREQ.
    Client,

    /// Receives CONNECT, sends CONNACK, answers PINGREQ, enforces the
    /// 1.5x keep alive silence cutoff.
    Server,
}

/// Static configuration of an [`crate::engine::Endpoint`].
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub role: EndpointRole,

    /// Known up front for a client; a server learns it from CONNECT.
    pub version: Option<ProtocolVersion>,

    /// When true the engine answers PUBLISH/PUBREL/PINGREQ itself; when
    /// false those packets are surfaced and the caller acknowledges them.
    pub auto_response: bool,

    /// Our own receive limit on total frame size.
    pub max_packet_size: usize,

    /// Highest topic alias we accept from the peer; zero disables inbound
    /// aliases.
    pub topic_alias_maximum: u16,

    /// Our own bound on concurrent inbound QoS 2 exchanges.
    pub receive_maximum: u16,

    /// Interval between PINGREQ packets, client role. `None` means derive
    /// it from the keep alive value of the CONNECT packet; a test may pin
    /// it above the keep alive to force a server-side timeout.
    pub pingreq_interval: Option<Duration>,

    /// How long to wait for PINGRESP before treating the connection dead.
    pub pingresp_timeout: Duration,

    /// When true, writes are gathered in the outbound buffer until
    /// [`crate::engine::Endpoint::flush`] is called; when false every send
    /// flushes.
    pub bulk_write: bool,
}

impl EndpointConfig {
    #[must_use]
    pub fn client(version: ProtocolVersion) -> Self {
        Self {
            role: EndpointRole::Client,
            version: Some(version),
            auto_response: true,
            max_packet_size: MAX_PACKET_LEN,
            topic_alias_maximum: 0,
            receive_maximum: u16::MAX,
            pingreq_interval: None,
            pingresp_timeout: Duration::from_secs(30),
            bulk_write: false,
        }
    }

    #[must_use]
    pub fn server() -> Self {
        Self {
            role: EndpointRole::Server,
            version: None,
            auto_response: false,
            max_packet_size: MAX_PACKET_LEN,
            topic_alias_maximum: 32,
            receive_maximum: u16::MAX,
            pingreq_interval: None,
            pingresp_timeout: Duration::from_secs(30),
            bulk_write: true,
        }
    }
}
