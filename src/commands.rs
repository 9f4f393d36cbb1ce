// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Command messages exchanged between the broker actors.
//!
//! Session actors own their connection; the dispatcher actor owns every
//! piece of broker-wide state. All interaction goes through these enums
//! over mpsc channels, which serializes access without locks.

use codec::{v5, PacketId, ProtocolVersion, QoS};
use tokio::sync::mpsc::Sender;

use crate::engine::SessionPersistState;
use crate::types::{DisconnectReason, PublishMessage, SessionGid, WillMessage};

/// Parameters of an accepted CONNECT, normalized across versions.
#[derive(Debug)]
pub struct ConnectContext {
    pub version: ProtocolVersion,
    pub client_id: String,

    /// Canonical username returned by the authenticator; empty for
    /// anonymous.
    pub username: String,

    pub clean_start: bool,
    pub keep_alive: u16,

    /// Session expiry in seconds; `u32::MAX` means the session never
    /// expires (v3.1.1 with `clean_session=false`).
    pub session_expiry: u32,

    pub will: Option<WillMessage>,
    pub request_response_information: bool,
}

/// One filter of a SUBSCRIBE packet, with the session-side authorization
/// verdict already applied.
#[derive(Debug)]
pub struct SubscribeEntry {
    pub filter: String,
    pub options: v5::SubscribeOptions,
    pub subscription_id: Option<usize>,
    pub allowed: bool,
}

/// One message prepared for a specific subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: PublishMessage,

    /// min(message qos, subscription qos), maximized over the overlapping
    /// subscriptions of this subscriber.
    pub qos: QoS,

    /// RETAIN flag to put on the outgoing packet.
    pub retain: bool,

    /// Subscription identifiers of every matching subscription
    /// [MQTT-3.3.4-4].
    pub subscription_ids: Vec<usize>,
}

#[derive(Debug)]
pub enum SessionToDispatcherCmd {
    /// CONNECT passed authentication; ask for the session verdict.
    Connect {
        gid: SessionGid,
        sender: Sender<DispatcherToSessionCmd>,
        context: ConnectContext,
    },

    /// Inbound application message to fan out.
    Publish {
        gid: SessionGid,
        message: PublishMessage,
    },

    Subscribe {
        gid: SessionGid,
        packet_id: PacketId,
        entries: Vec<SubscribeEntry>,
    },

    Unsubscribe {
        gid: SessionGid,
        packet_id: PacketId,
        filters: Vec<String>,
    },

    /// The connection ended; `state` carries the durable protocol state
    /// when a CONNECT had been accepted.
    SessionClosed {
        gid: SessionGid,
        reason: DisconnectReason,
        state: Option<SessionPersistState>,

        /// Session expiry update from a v5 DISCONNECT.
        session_expiry: Option<u32>,
    },
}

#[derive(Debug)]
pub enum DispatcherToSessionCmd {
    /// Session verdict for the CONNECT.
    ConnectAck {
        session_present: bool,

        /// In-flight state of the inherited session, replayed by the
        /// engine after the CONNACK goes out.
        resumed: Option<SessionPersistState>,

        /// Drained offline queue, delivered after the replay.
        pending: Vec<Delivery>,

        /// Response topic prefix when the client requested response
        /// information.
        response_information: Option<String>,
    },

    Publish(Delivery),

    SubscribeAck {
        packet_id: PacketId,
        reason_codes: Vec<v5::ReasonCode>,

        /// Retained messages matching the new subscriptions.
        retained: Vec<Delivery>,
    },

    UnsubscribeAck {
        packet_id: PacketId,
        reason_codes: Vec<v5::ReasonCode>,
    },

    /// A newer connection claimed this client id [MQTT-3.1.4-3].
    Takeover,
}
