// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker-side connection actor.
//!
//! One session actor per accepted connection. It drives a server-role
//! [`Endpoint`], authenticates the CONNECT, acknowledges inbound
//! publishes, and relays everything stateful to the dispatcher over
//! command channels.

mod config;

pub use config::SessionConfig;

use std::sync::Arc;
use std::time::Duration;

use codec::utils::random_client_id;
use codec::{
    v3, v5, GenericPacket, PacketId, ProtocolVersion, QoS, StringData, U16Data, U32Data,
};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::{sleep_until, timeout, Instant};

use crate::auth::Authenticator;
use crate::commands::{
    ConnectContext, Delivery, DispatcherToSessionCmd, SessionToDispatcherCmd, SubscribeEntry,
};
use crate::engine::{Endpoint, EndpointConfig};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::{DisconnectReason, PublishMessage, SessionGid, WillMessage};

const CMD_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Invalid,
    Connecting,
    Connected,
    Disconnected,
}

/// One client connection on the broker.
pub struct Session {
    id: SessionGid,
    config: SessionConfig,
    endpoint: Endpoint,
    status: Status,

    version: ProtocolVersion,
    client_id: String,
    username: String,
    client_id_generated: bool,
    response_topic_prefix: Option<String>,

    auth: Arc<dyn Authenticator>,
    dispatcher_sender: Sender<SessionToDispatcherCmd>,
    sender: Sender<DispatcherToSessionCmd>,
    receiver: Receiver<DispatcherToSessionCmd>,

    closed_reason: DisconnectReason,
    disconnect_session_expiry: Option<u32>,
}

impl Session {
    #[must_use]
    pub fn new(
        id: SessionGid,
        config: SessionConfig,
        stream: Stream,
        dispatcher_sender: Sender<SessionToDispatcherCmd>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let mut endpoint_config = EndpointConfig::server();
        endpoint_config.max_packet_size = config.max_packet_size();
        endpoint_config.topic_alias_maximum = config.topic_alias_maximum();
        let endpoint = Endpoint::new(stream, endpoint_config);
        let (sender, receiver) = channel(CMD_CHANNEL_CAPACITY);
        Self {
            id,
            config,
            endpoint,
            status: Status::Invalid,
            version: ProtocolVersion::V311,
            client_id: String::new(),
            username: String::new(),
            client_id_generated: false,
            response_topic_prefix: None,
            auth,
            dispatcher_sender,
            sender,
            receiver,
            closed_reason: DisconnectReason::Abnormal,
            disconnect_session_expiry: None,
        }
    }

    const fn is_v5(&self) -> bool {
        matches!(self.version, ProtocolVersion::V5)
    }

    /// Run the session until the connection ends, then report the close to
    /// the dispatcher.
    pub async fn run_loop(mut self) {
        // The server SHOULD close a connection with no CONNECT in a
        // reasonable time [MQTT-3.1.4].
        let accepted =
            match timeout(self.config.connect_timeout(), self.wait_connect()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(err)) => {
                    log::warn!("session {:?}: handshake failed: {err}", self.id);
                    false
                }
                Err(_elapsed) => {
                    log::info!("session {:?}: connect timeout", self.id);
                    false
                }
            };

        if accepted {
            if let Err(err) = self.connected_loop().await {
                log::info!("session {:?}: connection ended: {err}", self.id);
            }
        }
        let _ret = self.endpoint.close().await;

        // Hand the durable state back for retention; only meaningful once
        // the dispatcher knew about us.
        let state = if self.status == Status::Connected || self.status == Status::Disconnected {
            Some(self.endpoint.take_persist_state())
        } else {
            None
        };
        let cmd = SessionToDispatcherCmd::SessionClosed {
            gid: self.id,
            reason: self.closed_reason,
            state,
            session_expiry: self.disconnect_session_expiry,
        };
        if let Err(err) = self.dispatcher_sender.send(cmd).await {
            log::error!("session {:?}: failed to report close: {err}", self.id);
        }
    }

    /// Wait for CONNECT, authenticate, and ask the dispatcher for the
    /// session verdict. Returns whether the connection was accepted.
    async fn wait_connect(&mut self) -> Result<bool, Error> {
        loop {
            let Some(packet) = self.endpoint.recv().await? else {
                return Ok(false);
            };
            return match packet {
                GenericPacket::V3(v3::Packet::Connect(p)) => self.on_connect_v3(p).await,
                GenericPacket::V5(v5::Packet::Connect(p)) => self.on_connect_v5(p).await,
                other => {
                    log::warn!(
                        "session {:?}: {:?} before CONNECT",
                        self.id,
                        other.packet_type()
                    );
                    Ok(false)
                }
            };
        }
    }

    async fn on_connect_v3(&mut self, packet: v3::ConnectPacket) -> Result<bool, Error> {
        self.version = packet.protocol_version();

        let username = match self.authenticate_connect(
            packet.connect_flags().has_username,
            packet.username(),
            packet.password(),
        ) {
            Some(username) => username,
            None => {
                let ack =
                    v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::Unauthorized);
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::ConnectAck(ack)))
                    .await?;
                return Ok(false);
            }
        };

        let client_id = if packet.client_id().is_empty() {
            // A zero-byte client id with CleanSession=0 must be rejected
            // with IdentifierRejected [MQTT-3.1.3-8].
            if !packet.clean_session() || !self.config.allow_empty_client_id() {
                let ack =
                    v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::IdentifierRejected);
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::ConnectAck(ack)))
                    .await?;
                return Ok(false);
            }
            self.client_id_generated = true;
            random_client_id()
        } else {
            packet.client_id().to_string()
        };

        let will = packet.will_topic().map(|topic| WillMessage {
            message: PublishMessage {
                topic: topic.to_string(),
                payload: packet.will_message().to_vec(),
                qos: packet.connect_flags().will_qos,
                retain: packet.connect_flags().will_retain,
                properties: v5::Properties::new(),
                expire_at: None,
            },
            delay: 0,
        });

        let context = ConnectContext {
            version: self.version,
            client_id: client_id.clone(),
            username: username.clone(),
            clean_start: packet.clean_session(),
            keep_alive: packet.keep_alive(),
            session_expiry: if packet.clean_session() { 0 } else { u32::MAX },
            will,
            request_response_information: false,
        };
        self.finish_connect(client_id, username, context).await
    }

    async fn on_connect_v5(&mut self, packet: v5::ConnectPacket) -> Result<bool, Error> {
        self.version = ProtocolVersion::V5;

        let username = match self.authenticate_connect(
            packet.connect_flags().has_username,
            packet.username(),
            packet.password(),
        ) {
            Some(username) => username,
            None => {
                let ack = v5::ConnectAckPacket::new(false, v5::ReasonCode::NotAuthorized);
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::ConnectAck(ack)))
                    .await?;
                return Ok(false);
            }
        };

        let client_id = if packet.client_id().is_empty() {
            if !self.config.allow_empty_client_id() {
                let ack =
                    v5::ConnectAckPacket::new(false, v5::ReasonCode::ClientIdentifierNotValid);
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::ConnectAck(ack)))
                    .await?;
                return Ok(false);
            }
            self.client_id_generated = true;
            random_client_id()
        } else {
            packet.client_id().to_string()
        };

        let will = packet.will_topic().map(|topic| {
            let will_props = packet.will_properties();
            let expire_at = will_props
                .message_expiry_interval()
                .map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));
            let mut properties = will_props.clone();
            properties.remove(v5::PropertyType::WillDelayInterval);
            WillMessage {
                message: PublishMessage {
                    topic: topic.to_string(),
                    payload: packet.will_message().to_vec(),
                    qos: packet.connect_flags().will_qos,
                    retain: packet.connect_flags().will_retain,
                    properties,
                    expire_at,
                },
                delay: will_props.will_delay_interval().unwrap_or(0),
            }
        });

        let context = ConnectContext {
            version: self.version,
            client_id: client_id.clone(),
            username: username.clone(),
            clean_start: packet.clean_start(),
            keep_alive: packet.keep_alive(),
            session_expiry: packet.properties().session_expiry_interval().unwrap_or(0),
            will,
            request_response_information: packet.properties().request_response_information(),
        };
        self.finish_connect(client_id, username, context).await
    }

    fn authenticate_connect(
        &self,
        has_username: bool,
        username: &str,
        password: &[u8],
    ) -> Option<String> {
        if has_username {
            self.auth.authenticate(username, password)
        } else {
            self.auth.authenticate_anonymous()
        }
    }

    async fn finish_connect(
        &mut self,
        client_id: String,
        username: String,
        context: ConnectContext,
    ) -> Result<bool, Error> {
        self.client_id = client_id;
        self.username = username;
        self.status = Status::Connecting;
        self.dispatcher_sender
            .send(SessionToDispatcherCmd::Connect {
                gid: self.id,
                sender: self.sender.clone(),
                context,
            })
            .await?;

        // The CONNACK parameters come back from the dispatcher.
        match self.receiver.recv().await {
            Some(DispatcherToSessionCmd::ConnectAck {
                session_present,
                resumed,
                pending,
                response_information,
            }) => {
                self.response_topic_prefix = response_information.clone();
                self.send_connack(session_present, response_information)
                    .await?;
                self.status = Status::Connected;

                if let Some(state) = resumed {
                    self.endpoint.restore_persist_state(state);
                    self.endpoint.resend_pending().await?;
                }
                for delivery in pending {
                    self.deliver(delivery).await?;
                }
                self.endpoint.flush().await?;
                Ok(true)
            }
            Some(_other) => Err(Error::new(
                ErrorKind::ChannelError,
                "session: unexpected dispatcher reply to Connect",
            )),
            None => Err(Error::new(
                ErrorKind::ChannelError,
                "session: dispatcher channel closed",
            )),
        }
    }

    async fn send_connack(
        &mut self,
        session_present: bool,
        response_information: Option<String>,
    ) -> Result<(), Error> {
        if self.is_v5() {
            let mut ack = v5::ConnectAckPacket::new(session_present, v5::ReasonCode::Success);
            if self.config.topic_alias_maximum() > 0 {
                ack.properties_mut().push(v5::Property::TopicAliasMaximum(
                    U16Data::new(self.config.topic_alias_maximum()),
                ));
            }
            if self.client_id_generated {
                // A generated id must be announced back [MQTT-3.2.2-16].
                ack.properties_mut()
                    .push(v5::Property::AssignedClientIdentifier(
                        StringData::from(&self.client_id)
                            .map_err(|_e| Error::new(ErrorKind::EncodeError, "bad client id"))?,
                    ));
            }
            if let Some(prefix) = response_information {
                ack.properties_mut().push(v5::Property::ResponseInformation(
                    StringData::from(&prefix)
                        .map_err(|_e| Error::new(ErrorKind::EncodeError, "bad prefix"))?,
                ));
            }
            self.endpoint
                .send(GenericPacket::V5(v5::Packet::ConnectAck(ack)))
                .await
        } else {
            let ack = v3::ConnectAckPacket::new(session_present, v3::ConnectReturnCode::Accepted);
            self.endpoint
                .send(GenericPacket::V3(v3::Packet::ConnectAck(ack)))
                .await
        }
    }

    async fn connected_loop(&mut self) -> Result<(), Error> {
        loop {
            let deadline = self
                .endpoint
                .keep_alive_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                result = self.endpoint.recv() => match result? {
                    Some(packet) => self.handle_client_packet(packet).await?,
                    None => {
                        // Socket closed without DISCONNECT.
                        return Ok(());
                    }
                },
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_dispatcher_cmd(cmd).await?,
                    None => return Ok(()),
                },
                () = sleep_until(deadline) => {
                    self.endpoint.handle_keep_alive().await?;
                }
            }
            self.endpoint.flush().await?;
            if self.status == Status::Disconnected {
                return Ok(());
            }
        }
    }

    async fn handle_client_packet(&mut self, packet: GenericPacket) -> Result<(), Error> {
        match packet {
            GenericPacket::V3(v3::Packet::Connect(_)) | GenericPacket::V5(v5::Packet::Connect(_)) => {
                // A second CONNECT is a protocol violation [MQTT-3.1.0-2].
                Err(Error::new(
                    ErrorKind::ProtocolError,
                    "session: second CONNECT packet",
                ))
            }
            GenericPacket::V3(v3::Packet::Publish(p)) => self.on_publish_v3(p).await,
            GenericPacket::V5(v5::Packet::Publish(p)) => self.on_publish_v5(p).await,
            GenericPacket::V3(v3::Packet::PublishRelease(p)) => {
                let ack = v3::PublishCompletePacket::new(p.packet_id());
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::PublishComplete(ack)))
                    .await
            }
            GenericPacket::V5(v5::Packet::PublishRelease(p)) => {
                let ack = v5::PublishCompletePacket::new(p.packet_id());
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::PublishComplete(ack)))
                    .await
            }
            GenericPacket::V3(v3::Packet::PingRequest(_)) => {
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::PingResponse(
                        v3::PingResponsePacket::new(),
                    )))
                    .await
            }
            GenericPacket::V5(v5::Packet::PingRequest(_)) => {
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::PingResponse(
                        v5::PingResponsePacket::new(),
                    )))
                    .await
            }
            GenericPacket::V3(v3::Packet::Subscribe(p)) => self.on_subscribe_v3(p).await,
            GenericPacket::V5(v5::Packet::Subscribe(p)) => self.on_subscribe_v5(p).await,
            GenericPacket::V3(v3::Packet::Unsubscribe(p)) => {
                let filters = p
                    .topics()
                    .iter()
                    .map(|t| t.as_ref().to_string())
                    .collect();
                self.forward_unsubscribe(p.packet_id(), filters).await
            }
            GenericPacket::V5(v5::Packet::Unsubscribe(p)) => {
                let filters = p
                    .topics()
                    .iter()
                    .map(|t| t.as_ref().to_string())
                    .collect();
                self.forward_unsubscribe(p.packet_id(), filters).await
            }
            GenericPacket::V3(v3::Packet::Disconnect(_)) => {
                self.closed_reason = DisconnectReason::Normal;
                self.status = Status::Disconnected;
                Ok(())
            }
            GenericPacket::V5(v5::Packet::Disconnect(p)) => {
                self.closed_reason = match p.reason_code() {
                    v5::ReasonCode::DisconnectWithWillMessage => DisconnectReason::WithWill,
                    _ => DisconnectReason::Normal,
                };
                self.disconnect_session_expiry = p.properties().session_expiry_interval();
                self.status = Status::Disconnected;
                Ok(())
            }
            GenericPacket::V5(v5::Packet::Auth(_)) => {
                log::warn!(
                    "session {:?}: extended authentication is not configured",
                    self.id
                );
                Ok(())
            }
            // Outbound-exchange acknowledgements were already applied to
            // the in-flight store by the engine.
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
                format!("session: unexpected {:?}", other.packet_type()),
            )),
        }
    }

    async fn on_publish_v3(&mut self, packet: v3::PublishPacket) -> Result<(), Error> {
        let allowed = self.auth.authorize_publish(packet.topic(), &self.username);
        if !allowed {
            log::warn!(
                "session {:?}: publish to {} denied",
                self.id,
                packet.topic()
            );
        }

        let duplicate = self.ack_inbound_publish_v3(&packet).await?;
        if allowed && !duplicate {
            let mut message =
                PublishMessage::new(packet.topic(), packet.qos(), packet.message());
            message.retain = packet.retain();
            self.forward_publish(message).await?;
        }
        Ok(())
    }

    /// Acknowledge an inbound v3 publish; returns true for a duplicate
    /// QoS 2 delivery that must not be forwarded again.
    async fn ack_inbound_publish_v3(&mut self, packet: &v3::PublishPacket) -> Result<bool, Error> {
        match packet.qos() {
            QoS::AtMostOnce => Ok(false),
            QoS::AtLeastOnce => {
                let ack = v3::PublishAckPacket::new(packet.packet_id());
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::PublishAck(ack)))
                    .await?;
                Ok(false)
            }
            QoS::ExactOnce => {
                let duplicate = self
                    .endpoint
                    .is_inbound_qos2_in_progress(packet.packet_id());
                let ack = v3::PublishReceivedPacket::new(packet.packet_id());
                self.endpoint
                    .send(GenericPacket::V3(v3::Packet::PublishReceived(ack)))
                    .await?;
                Ok(duplicate)
            }
        }
    }

    async fn on_publish_v5(&mut self, packet: v5::PublishPacket) -> Result<(), Error> {
        let allowed = self.auth.authorize_publish(packet.topic(), &self.username);

        match packet.qos() {
            QoS::AtMostOnce => (),
            QoS::AtLeastOnce => {
                let ack = if allowed {
                    v5::PublishAckPacket::new(packet.packet_id())
                } else {
                    v5::PublishAckPacket::with_reason(
                        packet.packet_id(),
                        v5::ReasonCode::NotAuthorized,
                    )
                };
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::PublishAck(ack)))
                    .await?;
            }
            QoS::ExactOnce => {
                let duplicate = self
                    .endpoint
                    .is_inbound_qos2_in_progress(packet.packet_id());
                let ack = if allowed {
                    v5::PublishReceivedPacket::new(packet.packet_id())
                } else {
                    v5::PublishReceivedPacket::with_reason(
                        packet.packet_id(),
                        v5::ReasonCode::NotAuthorized,
                    )
                };
                self.endpoint
                    .send(GenericPacket::V5(v5::Packet::PublishReceived(ack)))
                    .await?;
                if duplicate {
                    return Ok(());
                }
            }
        }

        if !allowed {
            log::warn!(
                "session {:?}: publish to {} denied",
                self.id,
                packet.topic()
            );
            return Ok(());
        }

        let expire_at = packet
            .properties()
            .message_expiry_interval()
            .map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));
        let mut properties = packet.properties().clone();
        properties.remove(v5::PropertyType::TopicAlias);
        let message = PublishMessage {
            topic: packet.topic().to_string(),
            payload: packet.message().to_vec(),
            qos: packet.qos(),
            retain: packet.retain(),
            properties,
            expire_at,
        };
        self.forward_publish(message).await
    }

    async fn forward_publish(&mut self, message: PublishMessage) -> Result<(), Error> {
        self.dispatcher_sender
            .send(SessionToDispatcherCmd::Publish {
                gid: self.id,
                message,
            })
            .await
            .map_err(Error::from)
    }

    async fn on_subscribe_v3(&mut self, packet: v3::SubscribePacket) -> Result<(), Error> {
        let entries = packet
            .topics()
            .iter()
            .map(|topic| SubscribeEntry {
                filter: topic.topic().to_string(),
                options: v5::SubscribeOptions::with_qos(topic.qos()),
                subscription_id: None,
                allowed: self.filter_allowed(topic.topic()),
            })
            .collect();
        self.dispatcher_sender
            .send(SessionToDispatcherCmd::Subscribe {
                gid: self.id,
                packet_id: packet.packet_id(),
                entries,
            })
            .await
            .map_err(Error::from)
    }

    async fn on_subscribe_v5(&mut self, packet: v5::SubscribePacket) -> Result<(), Error> {
        let subscription_id = packet
            .properties()
            .subscription_identifiers()
            .first()
            .copied();
        let entries = packet
            .topics()
            .iter()
            .map(|topic| SubscribeEntry {
                filter: topic.topic().to_string(),
                options: topic.options(),
                subscription_id,
                allowed: self.filter_allowed(topic.topic()),
            })
            .collect();
        self.dispatcher_sender
            .send(SessionToDispatcherCmd::Subscribe {
                gid: self.id,
                packet_id: packet.packet_id(),
                entries,
            })
            .await
            .map_err(Error::from)
    }

    /// Static authorization, widened by the per-session response topic
    /// rule when response information was requested.
    fn filter_allowed(&self, filter: &str) -> bool {
        if self.auth.authorize_subscribe(filter, &self.username) {
            return true;
        }
        self.response_topic_prefix
            .as_ref()
            .map_or(false, |prefix| filter.starts_with(prefix.as_str()))
    }

    async fn forward_unsubscribe(
        &mut self,
        packet_id: PacketId,
        filters: Vec<String>,
    ) -> Result<(), Error> {
        self.dispatcher_sender
            .send(SessionToDispatcherCmd::Unsubscribe {
                gid: self.id,
                packet_id,
                filters,
            })
            .await
            .map_err(Error::from)
    }

    async fn handle_dispatcher_cmd(&mut self, cmd: DispatcherToSessionCmd) -> Result<(), Error> {
        match cmd {
            DispatcherToSessionCmd::ConnectAck { .. } => Err(Error::new(
                ErrorKind::ChannelError,
                "session: duplicate ConnectAck from dispatcher",
            )),
            DispatcherToSessionCmd::Publish(delivery) => self.deliver(delivery).await,
            DispatcherToSessionCmd::SubscribeAck {
                packet_id,
                reason_codes,
                retained,
            } => {
                self.send_suback(packet_id, reason_codes).await?;
                for delivery in retained {
                    self.deliver(delivery).await?;
                }
                Ok(())
            }
            DispatcherToSessionCmd::UnsubscribeAck {
                packet_id,
                reason_codes,
            } => self.send_unsuback(packet_id, reason_codes).await,
            DispatcherToSessionCmd::Takeover => {
                log::info!("session {:?}: taken over by a new connection", self.id);
                if self.is_v5() {
                    let packet = v5::DisconnectPacket::with_reason(
                        v5::ReasonCode::SessionTakenOver,
                    );
                    let _ret = self
                        .endpoint
                        .send(GenericPacket::V5(v5::Packet::Disconnect(packet)))
                        .await;
                }
                self.closed_reason = DisconnectReason::TakenOver;
                self.status = Status::Disconnected;
                Ok(())
            }
        }
    }

    async fn send_suback(
        &mut self,
        packet_id: PacketId,
        reason_codes: Vec<v5::ReasonCode>,
    ) -> Result<(), Error> {
        if self.is_v5() {
            let packet = v5::SubscribeAckPacket::with_reason_codes(packet_id, reason_codes);
            self.endpoint
                .send(GenericPacket::V5(v5::Packet::SubscribeAck(packet)))
                .await
        } else {
            let acks = reason_codes
                .iter()
                .map(|code| match code {
                    v5::ReasonCode::Success => v3::SubscribeAck::QoS(QoS::AtMostOnce),
                    v5::ReasonCode::GrantedQos1 => v3::SubscribeAck::QoS(QoS::AtLeastOnce),
                    v5::ReasonCode::GrantedQos2 => v3::SubscribeAck::QoS(QoS::ExactOnce),
                    _ => v3::SubscribeAck::Failed,
                })
                .collect();
            let packet = v3::SubscribeAckPacket::with_acks(packet_id, acks);
            self.endpoint
                .send(GenericPacket::V3(v3::Packet::SubscribeAck(packet)))
                .await
        }
    }

    async fn send_unsuback(
        &mut self,
        packet_id: PacketId,
        reason_codes: Vec<v5::ReasonCode>,
    ) -> Result<(), Error> {
        if self.is_v5() {
            let packet = v5::UnsubscribeAckPacket::with_reason_codes(packet_id, reason_codes);
            self.endpoint
                .send(GenericPacket::V5(v5::Packet::UnsubscribeAck(packet)))
                .await
        } else {
            let packet = v3::UnsubscribeAckPacket::new(packet_id);
            self.endpoint
                .send(GenericPacket::V3(v3::Packet::UnsubscribeAck(packet)))
                .await
        }
    }

    /// Send one message to this client, honoring message expiry and
    /// attaching the subscriber-specific annotations.
    async fn deliver(&mut self, delivery: Delivery) -> Result<(), Error> {
        let now = Instant::now();
        if delivery.message.is_expired(now) {
            log::debug!("session {:?}: dropping expired message", self.id);
            return Ok(());
        }

        let packet_id = if delivery.qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            match self.endpoint.acquire_unique_packet_id() {
                Ok(packet_id) => packet_id,
                Err(err) => {
                    log::error!(
                        "session {:?}: dropping publish, no packet id: {err}",
                        self.id
                    );
                    return Ok(());
                }
            }
        };

        let packet = if self.is_v5() {
            let mut packet = v5::PublishPacket::new(
                &delivery.message.topic,
                delivery.qos,
                &delivery.message.payload,
            )?;
            packet.set_retain(delivery.retain);
            if delivery.qos != QoS::AtMostOnce {
                packet.set_packet_id(packet_id);
            }
            let mut properties = delivery.message.properties.clone();
            properties.remove(v5::PropertyType::TopicAlias);
            properties.remove(v5::PropertyType::SubscriptionIdentifier);
            properties.remove(v5::PropertyType::MessageExpiryInterval);
            // Forward the remaining lifetime, not the original one
            // [MQTT-3.3.2-6].
            if let Some(deadline) = delivery.message.expire_at {
                let remaining = deadline.saturating_duration_since(now).as_secs();
                #[allow(clippy::cast_possible_truncation)]
                properties.push(v5::Property::MessageExpiryInterval(U32Data::new(
                    remaining as u32,
                )));
            }
            for subscription_id in &delivery.subscription_ids {
                if let Ok(id) = codec::VarInt::from(*subscription_id) {
                    properties.push(v5::Property::SubscriptionIdentifier(id));
                }
            }
            *packet.properties_mut() = properties;
            GenericPacket::V5(v5::Packet::Publish(packet))
        } else {
            let mut packet = v3::PublishPacket::new(
                &delivery.message.topic,
                delivery.qos,
                &delivery.message.payload,
            )?;
            packet.set_retain(delivery.retain);
            if delivery.qos != QoS::AtMostOnce {
                packet.set_packet_id(packet_id);
            }
            GenericPacket::V3(v3::Packet::Publish(packet))
        };

        if let Err(err) = self.endpoint.send(packet).await {
            log::warn!("session {:?}: delivery failed: {err}", self.id);
            return Err(err);
        }
        Ok(())
    }
}
