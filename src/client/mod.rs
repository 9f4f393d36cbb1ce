// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Request/response client facade over the endpoint engine.
//!
//! Each operation sends its request and awaits the correlated response:
//! SUBSCRIBE waits for the SUBACK with the same packet id, QoS 1 PUBLISH
//! for its PUBACK, QoS 2 for the full PUBREC/PUBREL/PUBCOMP walk. Packets
//! that belong to the application stream (PUBLISH, DISCONNECT, AUTH)
//! arriving in between are buffered for [`AsyncClient::recv`].

mod options;

pub use options::{ConnectOptions, WillOptions};

use std::collections::VecDeque;

use codec::{
    v3, v5, GenericPacket, PacketId, PacketType, ProtocolVersion, QoS, U16Data, U32Data,
};
use tokio::time::sleep_until;

use crate::engine::{Endpoint, EndpointConfig, SessionPersistState};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;

/// Typed view of the CONNACK result.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub session_present: bool,

    /// v3 return codes are mapped onto the nearest v5 reason code.
    pub reason_code: v5::ReasonCode,

    pub assigned_client_id: Option<String>,
    pub response_information: Option<String>,
    pub server_keep_alive: Option<u16>,
}

impl ConnectResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !self.reason_code.is_error()
    }
}

/// Result of a publish operation; which acknowledgements are present
/// depends on the `QoS`.
#[derive(Debug, Default, Clone)]
pub struct PublishResult {
    pub packet_id: Option<PacketId>,
    pub puback: Option<GenericPacket>,
    pub pubrec: Option<GenericPacket>,
    pub pubcomp: Option<GenericPacket>,
}

impl PublishResult {
    /// Whether the exchange completed without a failure reason code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        let rec_failed = match &self.pubrec {
            Some(GenericPacket::V5(v5::Packet::PublishReceived(p))) => {
                p.reason_code().is_error()
            }
            _ => false,
        };
        let ack_failed = match &self.puback {
            Some(GenericPacket::V5(v5::Packet::PublishAck(p))) => p.reason_code().is_error(),
            _ => false,
        };
        !rec_failed && !ack_failed
    }
}

/// Result of a subscribe operation, one reason code per filter.
#[derive(Debug, Clone)]
pub struct SubscribeResult {
    pub packet_id: PacketId,
    pub reason_codes: Vec<v5::ReasonCode>,
}

/// Result of an unsubscribe operation.
#[derive(Debug, Clone)]
pub struct UnsubscribeResult {
    pub packet_id: PacketId,
    pub reason_codes: Vec<v5::ReasonCode>,
}

/// An inbound application message.
#[derive(Debug, Clone)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,

    /// Empty for a v3 connection.
    pub properties: v5::Properties,
}

/// What [`AsyncClient::recv`] yields. Automatic responses and PINGRESP are
/// consumed by the engine and never appear here.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Publish(ReceivedPublish),

    /// Server-initiated disconnect; `None` on v3.1.1 where the packet has
    /// no body.
    Disconnect(Option<v5::DisconnectPacket>),

    Auth(v5::AuthPacket),
}

/// One filter of a subscribe request.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub filter: String,
    pub options: v5::SubscribeOptions,
}

impl SubscribeRequest {
    #[must_use]
    pub fn new(filter: &str, qos: QoS) -> Self {
        Self {
            filter: filter.to_string(),
            options: v5::SubscribeOptions::with_qos(qos),
        }
    }
}

enum Awaiting {
    SubAck,
    UnsubAck,
    PubAck,
    PubRec,
    PubComp,
}

/// Asynchronous MQTT client.
pub struct AsyncClient {
    endpoint: Endpoint,
    options: ConnectOptions,
    incoming: VecDeque<ClientEvent>,
}

impl AsyncClient {
    /// Connect to the broker and run the MQTT handshake.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or a non-CONNACK response; a
    /// CONNACK carrying a failure reason code is returned as a normal
    /// [`ConnectResult`].
    pub async fn connect(options: ConnectOptions) -> Result<(Self, ConnectResult), Error> {
        Self::connect_with_state(options, None).await
    }

    /// Connect, restoring the in-flight state of a previous connection of
    /// the same session. On a session-present CONNACK the engine replays
    /// the restored store automatically.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or protocol violation.
    pub async fn connect_with_state(
        options: ConnectOptions,
        state: Option<SessionPersistState>,
    ) -> Result<(Self, ConnectResult), Error> {
        let stream = Stream::connect(options.address()).await?;
        let mut config = EndpointConfig::client(options.version());
        config.pingreq_interval = options.pingreq_interval();
        config.topic_alias_maximum = options.topic_alias_maximum();
        let mut endpoint = Endpoint::new(stream, config);
        if let Some(state) = state {
            endpoint.restore_persist_state(state);
        }

        let connect_packet = build_connect_packet(&options)?;
        endpoint.send(connect_packet).await?;

        let mut client = Self {
            endpoint,
            options,
            incoming: VecDeque::new(),
        };
        let result = client.wait_connack().await?;
        Ok((client, result))
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    #[must_use]
    pub const fn is_v5(&self) -> bool {
        matches!(self.options.version(), ProtocolVersion::V5)
    }

    /// Move the durable session state out for a later
    /// [`Self::connect_with_state`]; the connection is abandoned as-is.
    #[must_use]
    pub fn take_session_state(mut self) -> SessionPersistState {
        self.endpoint.take_persist_state()
    }

    async fn wait_connack(&mut self) -> Result<ConnectResult, Error> {
        match self.recv_packet().await? {
            Some(GenericPacket::V3(v3::Packet::ConnectAck(p))) => Ok(ConnectResult {
                session_present: p.session_present(),
                reason_code: map_v3_return_code(p.return_code()),
                assigned_client_id: None,
                response_information: None,
                server_keep_alive: None,
            }),
            Some(GenericPacket::V5(v5::Packet::ConnectAck(p))) => Ok(ConnectResult {
                session_present: p.session_present(),
                reason_code: p.reason_code(),
                assigned_client_id: p
                    .properties()
                    .assigned_client_identifier()
                    .map(ToString::to_string),
                response_information: p
                    .properties()
                    .response_information()
                    .map(ToString::to_string),
                server_keep_alive: p.properties().server_keep_alive(),
            }),
            Some(other) => {
                let _ret = self.endpoint.close().await;
                Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!(
                        "client: expected CONNACK, got {:?}",
                        other.packet_type()
                    ),
                ))
            }
            None => Err(Error::new(
                ErrorKind::ConnectionReset,
                "client: connection closed before CONNACK",
            )),
        }
    }

    /// Subscribe to a single topic filter.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe_many`].
    pub async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<SubscribeResult, Error> {
        self.subscribe_many(&[SubscribeRequest::new(filter, qos)])
            .await
    }

    /// Subscribe to several filters with one packet.
    ///
    /// # Errors
    ///
    /// Returns `AllErrorDetected` if every reason code reports failure,
    /// `ProtocolError` on a mismatched correlated response, and transport
    /// errors.
    pub async fn subscribe_many(
        &mut self,
        requests: &[SubscribeRequest],
    ) -> Result<SubscribeResult, Error> {
        // Validate the filters before an id is taken from the pool.
        let packet = if self.is_v5() {
            let mut topics = Vec::with_capacity(requests.len());
            for request in requests {
                topics.push(v5::SubscribeTopic::new(&request.filter, request.options)?);
            }
            let packet_id = self.endpoint.acquire_unique_packet_id_wait().await?;
            GenericPacket::V5(v5::Packet::Subscribe(v5::SubscribePacket::with_topics(
                packet_id, topics,
            )))
        } else {
            let mut topics = Vec::with_capacity(requests.len());
            for request in requests {
                topics.push(v3::SubscribeTopic::new(&request.filter, request.options.qos)?);
            }
            let packet_id = self.endpoint.acquire_unique_packet_id_wait().await?;
            GenericPacket::V3(v3::Packet::Subscribe(v3::SubscribePacket::with_topics(
                packet_id, topics,
            )))
        };
        let packet_id = match &packet {
            GenericPacket::V3(v3::Packet::Subscribe(p)) => p.packet_id(),
            GenericPacket::V5(v5::Packet::Subscribe(p)) => p.packet_id(),
            _ => unreachable!(),
        };
        self.endpoint.send(packet).await?;

        let response = self.wait_response(&Awaiting::SubAck, packet_id).await?;
        self.endpoint.release_packet_id(packet_id);
        let reason_codes = match response {
            GenericPacket::V3(v3::Packet::SubscribeAck(p)) => p
                .acks()
                .iter()
                .map(|ack| match ack {
                    v3::SubscribeAck::QoS(QoS::AtMostOnce) => v5::ReasonCode::Success,
                    v3::SubscribeAck::QoS(QoS::AtLeastOnce) => v5::ReasonCode::GrantedQos1,
                    v3::SubscribeAck::QoS(QoS::ExactOnce) => v5::ReasonCode::GrantedQos2,
                    v3::SubscribeAck::Failed => v5::ReasonCode::UnspecifiedError,
                })
                .collect(),
            GenericPacket::V5(v5::Packet::SubscribeAck(p)) => p.reason_codes().to_vec(),
            _ => unreachable!(),
        };

        if !reason_codes.is_empty() && reason_codes.iter().all(v5::ReasonCode::is_error) {
            return Err(Error::new(
                ErrorKind::AllErrorDetected,
                "client: every subscription was refused",
            ));
        }
        Ok(SubscribeResult {
            packet_id,
            reason_codes,
        })
    }

    /// Unsubscribe from topic filters.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` on a mismatched correlated response and
    /// transport errors.
    pub async fn unsubscribe(&mut self, filters: &[&str]) -> Result<UnsubscribeResult, Error> {
        let mut topics = Vec::with_capacity(filters.len());
        for filter in filters {
            topics.push(codec::SubTopic::new(filter)?);
        }
        let packet_id = self.endpoint.acquire_unique_packet_id_wait().await?;
        let packet = if self.is_v5() {
            GenericPacket::V5(v5::Packet::Unsubscribe(v5::UnsubscribePacket::with_topics(
                packet_id, topics,
            )))
        } else {
            GenericPacket::V3(v3::Packet::Unsubscribe(v3::UnsubscribePacket::with_topics(
                packet_id, topics,
            )))
        };
        self.endpoint.send(packet).await?;

        let response = self.wait_response(&Awaiting::UnsubAck, packet_id).await?;
        self.endpoint.release_packet_id(packet_id);
        let reason_codes = match response {
            GenericPacket::V3(v3::Packet::UnsubscribeAck(_)) => {
                vec![v5::ReasonCode::Success; filters.len()]
            }
            GenericPacket::V5(v5::Packet::UnsubscribeAck(p)) => p.reason_codes().to_vec(),
            _ => unreachable!(),
        };
        Ok(UnsubscribeResult {
            packet_id,
            reason_codes,
        })
    }

    /// Publish with default flags.
    ///
    /// # Errors
    ///
    /// See [`Self::publish_v5`] / transport errors.
    pub async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
    ) -> Result<PublishResult, Error> {
        if self.is_v5() {
            let packet = v5::PublishPacket::new(topic, qos, payload)?;
            self.publish_v5(packet).await
        } else {
            let packet = v3::PublishPacket::new(topic, qos, payload)?;
            self.publish_v3(packet).await
        }
    }

    /// Publish a fully prepared v3 packet. A zero packet id on a QoS>0
    /// packet is replaced with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns transport and correlation errors.
    pub async fn publish_v3(
        &mut self,
        mut packet: v3::PublishPacket,
    ) -> Result<PublishResult, Error> {
        let qos = packet.qos();
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else if packet.packet_id().value() == 0 {
            let packet_id = self.endpoint.acquire_unique_packet_id_wait().await?;
            packet.set_packet_id(packet_id);
            Some(packet_id)
        } else {
            Some(packet.packet_id())
        };
        self.publish_inner(GenericPacket::V3(v3::Packet::Publish(packet)), qos, packet_id)
            .await
    }

    /// Publish a fully prepared v5 packet, topic aliases and properties
    /// included.
    ///
    /// # Errors
    ///
    /// Returns transport and correlation errors.
    pub async fn publish_v5(
        &mut self,
        mut packet: v5::PublishPacket,
    ) -> Result<PublishResult, Error> {
        let qos = packet.qos();
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else if packet.packet_id().value() == 0 {
            let packet_id = self.endpoint.acquire_unique_packet_id_wait().await?;
            packet.set_packet_id(packet_id);
            Some(packet_id)
        } else {
            Some(packet.packet_id())
        };
        self.publish_inner(GenericPacket::V5(v5::Packet::Publish(packet)), qos, packet_id)
            .await
    }

    async fn publish_inner(
        &mut self,
        packet: GenericPacket,
        qos: QoS,
        packet_id: Option<PacketId>,
    ) -> Result<PublishResult, Error> {
        self.endpoint.send(packet).await?;
        let mut result = PublishResult {
            packet_id,
            ..PublishResult::default()
        };

        match qos {
            QoS::AtMostOnce => Ok(result),
            QoS::AtLeastOnce => {
                let packet_id = require_packet_id(packet_id)?;
                let response = self.wait_response(&Awaiting::PubAck, packet_id).await?;
                result.puback = Some(response);
                Ok(result)
            }
            QoS::ExactOnce => {
                let packet_id = require_packet_id(packet_id)?;
                let response = self.wait_response(&Awaiting::PubRec, packet_id).await?;
                let failed = matches!(
                    &response,
                    GenericPacket::V5(v5::Packet::PublishReceived(p)) if p.reason_code().is_error()
                );
                result.pubrec = Some(response);
                if failed {
                    // The engine did not send PUBREL; the exchange is over.
                    return Ok(result);
                }
                let response = self.wait_response(&Awaiting::PubComp, packet_id).await?;
                result.pubcomp = Some(response);
                Ok(result)
            }
        }
    }

    /// Run one extended authentication exchange step, v5 only.
    ///
    /// # Errors
    ///
    /// Returns `PacketNotAllowedToSend` on a v3 connection, transport and
    /// correlation errors.
    pub async fn auth(&mut self, packet: v5::AuthPacket) -> Result<v5::AuthPacket, Error> {
        self.endpoint
            .send(GenericPacket::V5(v5::Packet::Auth(packet)))
            .await?;
        loop {
            match self.recv_packet().await? {
                Some(GenericPacket::V5(v5::Packet::Auth(p))) => return Ok(p),
                Some(packet) => self.buffer_event(packet)?,
                None => {
                    return Err(Error::new(
                        ErrorKind::ConnectionReset,
                        "client: connection closed during AUTH",
                    ))
                }
            }
        }
    }

    /// Send DISCONNECT and close the stream.
    ///
    /// # Errors
    ///
    /// Returns error if the stream refuses the final write.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        let packet = if self.is_v5() {
            GenericPacket::V5(v5::Packet::Disconnect(v5::DisconnectPacket::new()))
        } else {
            GenericPacket::V3(v3::Packet::Disconnect(v3::DisconnectPacket::new()))
        };
        let _ret = self.endpoint.send(packet).await;
        self.endpoint.close().await
    }

    /// Close the stream without a DISCONNECT packet, simulating an
    /// abnormal connection loss.
    ///
    /// # Errors
    ///
    /// Returns error if the stream refuses to close.
    pub async fn abort(&mut self) -> Result<(), Error> {
        self.endpoint.close().await
    }

    /// Receive the next application event. `Ok(None)` means the server
    /// closed the stream.
    ///
    /// # Errors
    ///
    /// Returns transport and protocol errors.
    pub async fn recv(&mut self) -> Result<Option<ClientEvent>, Error> {
        loop {
            if let Some(event) = self.incoming.pop_front() {
                return Ok(Some(event));
            }
            match self.recv_packet().await? {
                Some(packet) => self.buffer_event(packet)?,
                None => return Ok(None),
            }
        }
    }

    /// One engine recv with the keep alive timer running.
    async fn recv_packet(&mut self) -> Result<Option<GenericPacket>, Error> {
        loop {
            match self.endpoint.keep_alive_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        result = self.endpoint.recv() => return result,
                        () = sleep_until(deadline) => {
                            self.endpoint.handle_keep_alive().await?;
                        }
                    }
                }
                None => return self.endpoint.recv().await,
            }
        }
    }

    /// Buffer an application packet for [`Self::recv`]; anything else in
    /// the application stream is a protocol violation.
    fn buffer_event(&mut self, packet: GenericPacket) -> Result<(), Error> {
        match packet {
            GenericPacket::V3(v3::Packet::Publish(p)) => {
                self.incoming.push_back(ClientEvent::Publish(ReceivedPublish {
                    topic: p.topic().to_string(),
                    payload: p.message().to_vec(),
                    qos: p.qos(),
                    retain: p.retain(),
                    dup: p.dup(),
                    properties: v5::Properties::new(),
                }));
                Ok(())
            }
            GenericPacket::V5(v5::Packet::Publish(p)) => {
                self.incoming.push_back(ClientEvent::Publish(ReceivedPublish {
                    topic: p.topic().to_string(),
                    payload: p.message().to_vec(),
                    qos: p.qos(),
                    retain: p.retain(),
                    dup: p.dup(),
                    properties: p.properties().clone(),
                }));
                Ok(())
            }
            GenericPacket::V3(v3::Packet::Disconnect(_)) => {
                self.incoming.push_back(ClientEvent::Disconnect(None));
                Ok(())
            }
            GenericPacket::V5(v5::Packet::Disconnect(p)) => {
                self.incoming.push_back(ClientEvent::Disconnect(Some(p)));
                Ok(())
            }
            GenericPacket::V5(v5::Packet::Auth(p)) => {
                self.incoming.push_back(ClientEvent::Auth(p));
                Ok(())
            }
            // Acknowledgements of replayed in-flight packets; the engine
            // already did the bookkeeping.
            GenericPacket::V3(
                v3::Packet::PublishAck(_)
                | v3::Packet::PublishReceived(_)
                | v3::Packet::PublishComplete(_),
            )
            | GenericPacket::V5(
                v5::Packet::PublishAck(_)
                | v5::Packet::PublishReceived(_)
                | v5::Packet::PublishComplete(_),
            ) => Ok(()),
            other => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("client: unexpected {:?}", other.packet_type()),
            )),
        }
    }

    async fn wait_response(
        &mut self,
        awaiting: &Awaiting,
        packet_id: PacketId,
    ) -> Result<GenericPacket, Error> {
        loop {
            let Some(packet) = self.recv_packet().await? else {
                return Err(Error::new(
                    ErrorKind::ConnectionReset,
                    "client: connection closed while awaiting a response",
                ));
            };

            let response = match (&awaiting, &packet) {
                (Awaiting::SubAck, GenericPacket::V3(v3::Packet::SubscribeAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::SubAck, GenericPacket::V5(v5::Packet::SubscribeAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::UnsubAck, GenericPacket::V3(v3::Packet::UnsubscribeAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::UnsubAck, GenericPacket::V5(v5::Packet::UnsubscribeAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubAck, GenericPacket::V3(v3::Packet::PublishAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubAck, GenericPacket::V5(v5::Packet::PublishAck(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubRec, GenericPacket::V3(v3::Packet::PublishReceived(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubRec, GenericPacket::V5(v5::Packet::PublishReceived(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubComp, GenericPacket::V3(v3::Packet::PublishComplete(p))) => {
                    Some(p.packet_id())
                }
                (Awaiting::PubComp, GenericPacket::V5(v5::Packet::PublishComplete(p))) => {
                    Some(p.packet_id())
                }
                _ => None,
            };

            match response {
                Some(id) if id == packet_id => return Ok(packet),
                // An acknowledgement for another outstanding id, e.g. a
                // replayed in-flight publish; the engine handled it.
                Some(_) | None => match packet.packet_type() {
                    PacketType::Publish { .. } | PacketType::Disconnect | PacketType::Auth => {
                        self.buffer_event(packet)?;
                    }
                    PacketType::PublishAck
                    | PacketType::PublishReceived
                    | PacketType::PublishComplete => (),
                    other_type => {
                        let _ret = self.endpoint.close().await;
                        return Err(Error::from_string(
                            ErrorKind::ProtocolError,
                            format!(
                                "client: unexpected {other_type:?} while awaiting a response"
                            ),
                        ));
                    }
                },
            }
        }
    }
}

fn build_connect_packet(options: &ConnectOptions) -> Result<GenericPacket, Error> {
    match options.version() {
        ProtocolVersion::V31 | ProtocolVersion::V311 => {
            let mut packet = v3::ConnectPacket::new(options.client_id())?;
            packet.set_keep_alive(options.keep_alive());
            packet.set_clean_session(options.clean_session());
            if let Some(username) = options.username() {
                packet.set_username(username)?;
            }
            if let Some(password) = options.password() {
                packet.set_password(password)?;
            }
            if let Some(will) = options.will() {
                packet.set_will(&will.topic, &will.payload, will.qos, will.retain)?;
            }
            Ok(GenericPacket::V3(v3::Packet::Connect(packet)))
        }
        ProtocolVersion::V5 => {
            let mut packet = v5::ConnectPacket::new(options.client_id())?;
            packet.set_keep_alive(options.keep_alive());
            packet.set_clean_start(options.clean_session());
            if let Some(username) = options.username() {
                packet.set_username(username)?;
            }
            if let Some(password) = options.password() {
                packet.set_password(password)?;
            }
            if let Some(seconds) = options.session_expiry_interval() {
                packet
                    .properties_mut()
                    .push(v5::Property::SessionExpiryInterval(U32Data::new(seconds)));
            }
            if let Some(maximum) = options.receive_maximum() {
                packet
                    .properties_mut()
                    .push(v5::Property::ReceiveMaximum(U16Data::new(maximum)));
            }
            if options.topic_alias_maximum() > 0 {
                packet.properties_mut().push(v5::Property::TopicAliasMaximum(
                    U16Data::new(options.topic_alias_maximum()),
                ));
            }
            if options.request_response_information() {
                packet
                    .properties_mut()
                    .push(v5::Property::RequestResponseInformation(
                        codec::BoolData::new(true),
                    ));
            }
            if let Some(will) = options.will() {
                packet.set_will(&will.topic, &will.payload, will.qos, will.retain)?;
                if let Some(delay) = will.delay_interval {
                    packet
                        .will_properties_mut()
                        .push(v5::Property::WillDelayInterval(U32Data::new(delay)));
                }
                if let Some(expiry) = will.message_expiry_interval {
                    packet
                        .will_properties_mut()
                        .push(v5::Property::MessageExpiryInterval(U32Data::new(expiry)));
                }
            }
            Ok(GenericPacket::V5(v5::Packet::Connect(packet)))
        }
    }
}

fn require_packet_id(packet_id: Option<PacketId>) -> Result<PacketId, Error> {
    packet_id.ok_or_else(|| {
        Error::new(
            ErrorKind::StatusError,
            "client: QoS>0 publish lost its packet id",
        )
    })
}

fn map_v3_return_code(code: v3::ConnectReturnCode) -> v5::ReasonCode {
    match code {
        v3::ConnectReturnCode::Accepted => v5::ReasonCode::Success,
        v3::ConnectReturnCode::UnacceptedProtocol => v5::ReasonCode::UnsupportedProtocolVersion,
        v3::ConnectReturnCode::IdentifierRejected => v5::ReasonCode::ClientIdentifierNotValid,
        v3::ConnectReturnCode::ServerUnavailable => v5::ReasonCode::ServerUnavailable,
        v3::ConnectReturnCode::MalformedUsernamePassword => v5::ReasonCode::BadUserNameOrPassword,
        v3::ConnectReturnCode::Unauthorized => v5::ReasonCode::NotAuthorized,
    }
}
