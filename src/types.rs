// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{v5, QoS};
use tokio::time::Instant;

pub type ListenerId = u32;
pub type SessionId = u64;

/// Global session id, a (listener, session) pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionGid {
    listener_id: ListenerId,
    session_id: SessionId,
}

impl SessionGid {
    #[must_use]
    pub const fn new(listener_id: ListenerId, session_id: SessionId) -> Self {
        Self {
            listener_id,
            session_id,
        }
    }

    #[must_use]
    pub const fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// A session is identified by its canonical username plus client id; the
/// same client id under two usernames is two sessions.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    pub username: String,
    pub client_id: String,
}

impl SessionKey {
    #[must_use]
    pub const fn new(username: String, client_id: String) -> Self {
        Self {
            username,
            client_id,
        }
    }
}

/// Version-neutral application message, used for fan-out, the retained
/// store, offline queues and will messages.
///
/// v5 properties travel with the message; a v3 receiver simply does not
/// serialize them. Payload and user properties are forwarded unaltered
/// [MQTT-3.3.2-17].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub properties: v5::Properties,

    /// Absolute deadline derived from the Message Expiry Interval.
    pub expire_at: Option<Instant>,
}

impl PublishMessage {
    #[must_use]
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain: false,
            properties: v5::Properties::new(),
            expire_at: None,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.map_or(false, |deadline| deadline <= now)
    }
}

/// Will message taken from a CONNECT packet, published by the broker on
/// abnormal disconnect after the will delay.
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub message: PublishMessage,

    /// Will Delay Interval in seconds; capped by the session expiry when
    /// the timer is armed.
    pub delay: u32,
}

/// How a session ended, which decides whether the will is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Clean DISCONNECT with normal disconnection; the will is discarded
    /// [MQTT-3.14.4-3].
    Normal,

    /// v5 DISCONNECT with `DisconnectWithWillMessage`; the will is still
    /// published after the delay.
    WithWill,

    /// Connection dropped, keep alive expired or protocol error; the will
    /// is published after the delay.
    Abnormal,

    /// The session was taken over by a new connection with the same id.
    TakenOver,
}
