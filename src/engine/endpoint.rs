// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The per-connection protocol driver.
//!
//! An endpoint owns one [`Stream`] and runs the MQTT state machine over
//! it: framing, validation, packet-id lifecycle, the in-flight store,
//! topic aliases, automatic responses and keep alive bookkeeping. The
//! client facade and the broker session actor are both thin layers over
//! this type.

use std::collections::{HashSet, VecDeque};
use std::convert::TryFrom;
use std::time::Duration;

use codec::{
    frame_length, v3, v5, ByteArray, DecodePacket, EncodePacket, FixedHeader, FrameStatus,
    GenericPacket, PacketId, PacketType, ProtocolVersion, StringData,
};
use tokio::time::Instant;

use super::{
    EndpointConfig, EndpointRole, InflightStore, PacketIdPool, StoreKind, StoredEntry,
    TopicAliasRecv, TopicAliasSend,
};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;

/// Connection phase; errors jump straight to `Disconnecting`.
///
/// ```txt
/// Disconnected -> UnderlyingHandshake -> MqttHandshake
///   -> Connected <-> (send/recv) -> Disconnecting -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    UnderlyingHandshake,
    MqttHandshake,
    Connected,
    Disconnecting,
}

/// Protocol state that survives a reconnect when the session is resumed.
#[derive(Debug, Default)]
pub struct SessionPersistState {
    /// Outbound in-flight entries, in insertion order.
    pub inflight: Vec<StoredEntry>,

    /// Inbound QoS 2 packet ids whose PUBREL has not arrived yet.
    pub pub_recv: HashSet<u16>,
}

/// One MQTT connection endpoint, client or server role.
#[derive(Debug)]
pub struct Endpoint {
    stream: Stream,
    config: EndpointConfig,
    version: Option<ProtocolVersion>,
    phase: Phase,

    read_buf: Vec<u8>,
    out_buf: Vec<u8>,
    pending: VecDeque<GenericPacket>,

    packet_ids: PacketIdPool,
    inflight: InflightStore,
    alias_send: TopicAliasSend,
    alias_recv: TopicAliasRecv,

    /// Inbound QoS 2 exchanges between PUBLISH and PUBREL.
    pub_recv: HashSet<u16>,

    peer_receive_maximum: u16,
    send_quota: u16,
    peer_maximum_packet_size: Option<u32>,

    keep_alive: u16,
    last_packet_received: Instant,
    last_packet_sent: Instant,
    pingresp_pending: Option<Instant>,
}

impl Endpoint {
    #[must_use]
    pub fn new(stream: Stream, config: EndpointConfig) -> Self {
        let now = Instant::now();
        let version = config.version;
        let alias_recv = TopicAliasRecv::new(config.topic_alias_maximum);
        Self {
            stream,
            config,
            version,
            phase: Phase::MqttHandshake,
            read_buf: Vec::with_capacity(4096),
            out_buf: Vec::with_capacity(4096),
            pending: VecDeque::new(),
            packet_ids: PacketIdPool::new(),
            inflight: InflightStore::new(),
            alias_send: TopicAliasSend::new(0),
            alias_recv,
            pub_recv: HashSet::new(),
            peer_receive_maximum: u16::MAX,
            send_quota: u16::MAX,
            peer_maximum_packet_size: None,
            keep_alive: 0,
            last_packet_received: now,
            last_packet_sent: now,
            pingresp_pending: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn is_v5(&self) -> bool {
        matches!(self.version, Some(ProtocolVersion::V5))
    }

    /// Whether an inbound QoS 2 exchange for this id is between PUBLISH
    /// and PUBREL; a duplicate delivery in that window must be
    /// acknowledged but not forwarded again.
    #[must_use]
    pub fn is_inbound_qos2_in_progress(&self, packet_id: PacketId) -> bool {
        self.pub_recv.contains(&packet_id.value())
    }

    // ---- packet id lifecycle -------------------------------------------

    /// Acquire an unused packet id.
    ///
    /// # Errors
    ///
    /// Returns `PacketIdExhausted` if every id is outstanding.
    pub fn acquire_unique_packet_id(&mut self) -> Result<PacketId, Error> {
        self.packet_ids.acquire()
    }

    /// Acquire a packet id, processing inbound packets until one is
    /// released if the pool is exhausted. Surfaced packets are buffered
    /// and delivered by later [`Self::recv`] calls.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails while waiting.
    pub async fn acquire_unique_packet_id_wait(&mut self) -> Result<PacketId, Error> {
        loop {
            match self.packet_ids.acquire() {
                Ok(packet_id) => return Ok(packet_id),
                Err(err) if err.kind() == ErrorKind::PacketIdExhausted => {
                    match self.recv_internal().await? {
                        Some(packet) => self.pending.push_back(packet),
                        None => {
                            return Err(Error::new(
                                ErrorKind::ConnectionReset,
                                "endpoint: stream closed while waiting for a packet id",
                            ))
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reserve a caller-chosen packet id.
    ///
    /// # Errors
    ///
    /// Returns `PacketIdInUse` if the id is outstanding.
    pub fn register_packet_id(&mut self, packet_id: PacketId) -> Result<(), Error> {
        self.packet_ids.register(packet_id)
    }

    /// Return a packet id to the pool; idempotent.
    pub fn release_packet_id(&mut self, packet_id: PacketId) {
        self.packet_ids.release(packet_id);
    }

    // ---- session persistence -------------------------------------------

    /// Move the durable protocol state out, for retention across
    /// connections of a persistent session.
    pub fn take_persist_state(&mut self) -> SessionPersistState {
        SessionPersistState {
            inflight: self.inflight.take_all(),
            pub_recv: std::mem::take(&mut self.pub_recv),
        }
    }

    /// Restore durable state on a fresh connection, re-registering the
    /// packet ids of every stored entry.
    pub fn restore_persist_state(&mut self, state: SessionPersistState) {
        for entry in &state.inflight {
            // Already-registered ids mean the caller restored twice; keep
            // the registration.
            let _ret = self.packet_ids.register(entry.packet_id);
            // Every stored entry occupies one slot of the peer's receive
            // maximum until its terminal acknowledgement.
            self.send_quota = self.send_quota.saturating_sub(1);
        }
        self.inflight.restore(state.inflight);
        self.pub_recv = state.pub_recv;
    }

    /// Re-send every stored entry in insertion order, PUBLISH entries with
    /// DUP set, PUBREL entries unchanged. Expired entries are dropped and
    /// their ids released. The whole batch goes out in one write.
    ///
    /// # Errors
    ///
    /// Returns error if the stream fails.
    pub async fn resend_pending(&mut self) -> Result<(), Error> {
        let now = Instant::now();
        let (packets, expired) = self.inflight.replay_packets(now);
        for packet_id in expired {
            self.packet_ids.release(packet_id);
            self.send_quota = self.send_quota.saturating_add(1);
        }
        if packets.is_empty() {
            return Ok(());
        }
        for packet in &packets {
            packet.encode(&mut self.out_buf)?;
        }
        self.flush().await
    }

    // ---- keep alive -----------------------------------------------------

    /// Next point in time [`Self::handle_keep_alive`] wants to run, if
    /// any.
    #[must_use]
    pub fn keep_alive_deadline(&self) -> Option<Instant> {
        if self.phase != Phase::Connected {
            return None;
        }
        match self.config.role {
            EndpointRole::Client => {
                let interval = self.pingreq_interval()?;
                let ping_deadline = self.last_packet_sent + interval;
                match self.pingresp_pending {
                    Some(sent_at) => {
                        let pong_deadline = sent_at + self.config.pingresp_timeout;
                        Some(ping_deadline.min(pong_deadline))
                    }
                    None => Some(ping_deadline),
                }
            }
            EndpointRole::Server => {
                if self.keep_alive == 0 {
                    return None;
                }
                let cutoff = Duration::from_millis(u64::from(self.keep_alive) * 1500);
                Some(self.last_packet_received + cutoff)
            }
        }
    }

    /// Run the keep alive rules.
    ///
    /// Client role: emit PINGREQ when the interval elapsed; treat a
    /// missing PINGRESP as a dead connection. Server role: close after
    /// 1.5x keep alive of silence [MQTT-3.1.2-24]. In both timeout cases a
    /// v5 endpoint sends DISCONNECT with `KeepAliveTimeout` first.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the connection was given up.
    pub async fn handle_keep_alive(&mut self) -> Result<(), Error> {
        if self.phase != Phase::Connected {
            return Ok(());
        }
        let now = Instant::now();
        match self.config.role {
            EndpointRole::Client => {
                if let Some(sent_at) = self.pingresp_pending {
                    if now >= sent_at + self.config.pingresp_timeout {
                        return self.keep_alive_timeout().await;
                    }
                }
                if let Some(interval) = self.pingreq_interval() {
                    if now >= self.last_packet_sent + interval && self.pingresp_pending.is_none() {
                        let packet = self.make_pingreq();
                        self.write_packet(&packet).await?;
                        self.pingresp_pending = Some(Instant::now());
                    }
                }
                Ok(())
            }
            EndpointRole::Server => {
                if self.keep_alive > 0 {
                    let cutoff = Duration::from_millis(u64::from(self.keep_alive) * 1500);
                    if now >= self.last_packet_received + cutoff {
                        log::warn!("endpoint: no packet within 1.5x keep alive, closing");
                        return self.keep_alive_timeout().await;
                    }
                }
                Ok(())
            }
        }
    }

    fn pingreq_interval(&self) -> Option<Duration> {
        match self.config.pingreq_interval {
            Some(interval) => Some(interval),
            None if self.keep_alive > 0 => Some(Duration::from_secs(u64::from(self.keep_alive))),
            None => None,
        }
    }

    fn make_pingreq(&self) -> GenericPacket {
        if self.is_v5() {
            GenericPacket::V5(v5::Packet::PingRequest(v5::PingRequestPacket::new()))
        } else {
            GenericPacket::V3(v3::Packet::PingRequest(v3::PingRequestPacket::new()))
        }
    }

    async fn keep_alive_timeout(&mut self) -> Result<(), Error> {
        if self.is_v5() {
            let packet = GenericPacket::V5(v5::Packet::Disconnect(
                v5::DisconnectPacket::with_reason(v5::ReasonCode::KeepAliveTimeout),
            ));
            // Best effort; the peer is probably gone.
            let _ret = self.write_packet(&packet).await;
        }
        let _ret = self.close().await;
        Err(Error::new(
            ErrorKind::Timeout,
            "endpoint: keep alive timed out",
        ))
    }

    // ---- send ----------------------------------------------------------

    /// Serialize and send one packet.
    ///
    /// Completes once the bytes are accepted by the stream (or the
    /// outbound buffer in bulk-write mode). Packet-id bookkeeping, flow
    /// control, topic-alias registration and the in-flight store are
    /// updated here; on failure an acquired id is released before the
    /// error is surfaced.
    ///
    /// # Errors
    ///
    /// Returns `PacketNotAllowedToSend` for phase/version violations and
    /// stream errors as `ConnectionReset`.
    pub async fn send(&mut self, packet: GenericPacket) -> Result<(), Error> {
        self.check_send_allowed(&packet)?;

        match &packet {
            GenericPacket::V3(v3::Packet::Connect(p)) => {
                self.version = Some(p.protocol_version());
                self.keep_alive = p.keep_alive();
            }
            GenericPacket::V5(v5::Packet::Connect(p)) => {
                self.version = Some(ProtocolVersion::V5);
                self.keep_alive = p.keep_alive();
                if let Some(maximum) = p.properties().topic_alias_maximum() {
                    self.alias_recv = TopicAliasRecv::new(maximum);
                }
            }
            GenericPacket::V5(v5::Packet::ConnectAck(p)) => {
                if let Some(maximum) = p.properties().topic_alias_maximum() {
                    self.alias_recv = TopicAliasRecv::new(maximum);
                }
                if let Some(keep_alive) = p.properties().server_keep_alive() {
                    self.keep_alive = keep_alive;
                }
            }
            _ => (),
        }

        match &packet {
            GenericPacket::V3(v3::Packet::Publish(_)) | GenericPacket::V5(v5::Packet::Publish(_)) => {
                return self.send_publish(packet).await;
            }
            _ => (),
        }

        // Non-publish bookkeeping before the write.
        let correlated_id = match &packet {
            GenericPacket::V3(v3::Packet::Subscribe(p)) => Some(p.packet_id()),
            GenericPacket::V5(v5::Packet::Subscribe(p)) => Some(p.packet_id()),
            GenericPacket::V3(v3::Packet::Unsubscribe(p)) => Some(p.packet_id()),
            GenericPacket::V5(v5::Packet::Unsubscribe(p)) => Some(p.packet_id()),
            _ => None,
        };
        if let Some(packet_id) = correlated_id {
            self.ensure_registered(packet_id)?;
        }

        if let Err(err) = self.write_packet(&packet).await {
            // The id is released before the error surfaces.
            if let Some(packet_id) = correlated_id {
                self.packet_ids.release(packet_id);
            }
            return Err(err);
        }

        // Post-write state transitions.
        match &packet {
            GenericPacket::V3(v3::Packet::ConnectAck(_)) | GenericPacket::V5(v5::Packet::ConnectAck(_)) => {
                self.phase = Phase::Connected;
            }
            GenericPacket::V3(v3::Packet::Disconnect(_)) | GenericPacket::V5(v5::Packet::Disconnect(_)) => {
                self.phase = Phase::Disconnecting;
            }
            GenericPacket::V3(v3::Packet::PingRequest(_)) | GenericPacket::V5(v5::Packet::PingRequest(_)) => {
                self.pingresp_pending = Some(Instant::now());
            }
            GenericPacket::V3(v3::Packet::PublishRelease(p)) => {
                let packet_id = p.packet_id();
                self.store_pubrel(packet_id, packet.clone());
            }
            GenericPacket::V5(v5::Packet::PublishRelease(p)) => {
                let packet_id = p.packet_id();
                self.store_pubrel(packet_id, packet.clone());
            }
            GenericPacket::V3(v3::Packet::PublishReceived(p)) => {
                self.pub_recv.insert(p.packet_id().value());
            }
            GenericPacket::V5(v5::Packet::PublishReceived(p)) => {
                self.pub_recv.insert(p.packet_id().value());
            }
            GenericPacket::V3(v3::Packet::PublishComplete(p)) => {
                self.pub_recv.remove(&p.packet_id().value());
            }
            GenericPacket::V5(v5::Packet::PublishComplete(p)) => {
                self.pub_recv.remove(&p.packet_id().value());
            }
            _ => (),
        }
        Ok(())
    }

    fn check_send_allowed(&self, packet: &GenericPacket) -> Result<(), Error> {
        // Version match, once the version is fixed.
        if let Some(version) = self.version {
            let is_v5_packet = matches!(packet, GenericPacket::V5(_));
            if (version == ProtocolVersion::V5) != is_v5_packet {
                return Err(Error::new(
                    ErrorKind::PacketNotAllowedToSend,
                    "endpoint: packet version does not match the connection",
                ));
            }
        }

        let packet_type = packet.packet_type();
        let allowed = match self.phase {
            Phase::Disconnected | Phase::Disconnecting | Phase::UnderlyingHandshake => false,
            Phase::MqttHandshake => match self.config.role {
                EndpointRole::Client => {
                    matches!(packet_type, PacketType::Connect | PacketType::Auth)
                }
                EndpointRole::Server => {
                    matches!(
                        packet_type,
                        PacketType::ConnectAck | PacketType::Auth | PacketType::Disconnect
                    )
                }
            },
            Phase::Connected => !matches!(packet_type, PacketType::Connect | PacketType::ConnectAck),
        };
        if !allowed {
            return Err(Error::from_string(
                ErrorKind::PacketNotAllowedToSend,
                format!(
                    "endpoint: {packet_type:?} not allowed in phase {:?}",
                    self.phase
                ),
            ));
        }
        Ok(())
    }

    fn ensure_registered(&mut self, packet_id: PacketId) -> Result<(), Error> {
        if packet_id.value() == 0 {
            return Err(Error::new(
                ErrorKind::PacketNotAllowedToSend,
                "endpoint: packet id 0 is not sendable",
            ));
        }
        if !self.packet_ids.is_registered(packet_id) {
            self.packet_ids.register(packet_id)?;
        }
        Ok(())
    }

    async fn send_publish(&mut self, packet: GenericPacket) -> Result<(), Error> {
        let (qos, packet_id) = match &packet {
            GenericPacket::V3(v3::Packet::Publish(p)) => (p.qos(), p.packet_id()),
            GenericPacket::V5(v5::Packet::Publish(p)) => (p.qos(), p.packet_id()),
            _ => unreachable!(),
        };

        let mut registered_here = false;
        if qos != codec::QoS::AtMostOnce {
            if packet_id.value() == 0 {
                return Err(Error::new(
                    ErrorKind::PacketNotAllowedToSend,
                    "endpoint: QoS>0 publish requires a nonzero packet id",
                ));
            }
            if !self.packet_ids.is_registered(packet_id) {
                self.packet_ids.register(packet_id)?;
                registered_here = true;
            }
            if self.send_quota == 0 {
                if registered_here {
                    self.packet_ids.release(packet_id);
                }
                return Err(Error::new(
                    ErrorKind::ReceiveMaximumExceeded,
                    "endpoint: peer receive maximum reached",
                ));
            }
        }

        let result = self.send_publish_inner(&packet, qos, packet_id).await;
        if result.is_err() && qos != codec::QoS::AtMostOnce {
            self.packet_ids.release(packet_id);
        }
        result
    }

    async fn send_publish_inner(
        &mut self,
        packet: &GenericPacket,
        qos: codec::QoS,
        packet_id: PacketId,
    ) -> Result<(), Error> {
        // Maximum Packet Size announced by the peer, v5 [MQTT-3.1.2-24].
        if let Some(limit) = self.peer_maximum_packet_size {
            let size = packet.bytes()?;
            if size > limit as usize {
                return Err(Error::from_string(
                    ErrorKind::PacketNotAllowedToSend,
                    format!("endpoint: publish of {size} bytes exceeds peer maximum {limit}"),
                ));
            }
        }

        // Topic alias handling and the stored (full topic, no alias) copy.
        let store_packet = match packet {
            GenericPacket::V5(v5::Packet::Publish(p)) => {
                let alias = p.topic_alias();
                let full_topic: String = if p.topic().is_empty() {
                    let Some(alias) = alias else {
                        return Err(Error::new(
                            ErrorKind::TopicAliasInvalid,
                            "endpoint: empty topic without topic alias",
                        ));
                    };
                    self.alias_send
                        .resolve(alias)
                        .ok_or_else(|| {
                            Error::from_string(
                                ErrorKind::TopicAliasInvalid,
                                format!("endpoint: topic alias {alias} is not registered"),
                            )
                        })?
                        .to_string()
                } else {
                    if let Some(alias) = alias {
                        self.alias_send.register(alias, p.topic())?;
                    }
                    p.topic().to_string()
                };

                if qos == codec::QoS::AtMostOnce {
                    None
                } else {
                    let mut stored = p.clone();
                    stored.set_topic(&full_topic)?;
                    stored.properties_mut().remove(v5::PropertyType::TopicAlias);
                    let expire_at = stored
                        .properties()
                        .message_expiry_interval()
                        .map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));
                    Some(StoredEntry {
                        packet_id,
                        kind: if qos == codec::QoS::AtLeastOnce {
                            StoreKind::PublishQos1
                        } else {
                            StoreKind::PublishQos2
                        },
                        packet: GenericPacket::V5(v5::Packet::Publish(stored)),
                        expire_at,
                    })
                }
            }
            GenericPacket::V3(v3::Packet::Publish(p)) => {
                if qos == codec::QoS::AtMostOnce {
                    None
                } else {
                    Some(StoredEntry {
                        packet_id,
                        kind: if qos == codec::QoS::AtLeastOnce {
                            StoreKind::PublishQos1
                        } else {
                            StoreKind::PublishQos2
                        },
                        packet: packet.clone(),
                        expire_at: None,
                    })
                }
            }
            _ => unreachable!(),
        };

        self.write_packet(packet).await?;

        if let Some(entry) = store_packet {
            self.inflight.push(entry);
            self.send_quota = self.send_quota.saturating_sub(1);
        }
        Ok(())
    }

    fn store_pubrel(&mut self, packet_id: PacketId, packet: GenericPacket) {
        self.inflight.remove_publish(packet_id);
        if !self.inflight.contains(packet_id, StoreKind::Pubrel) {
            self.inflight.push(StoredEntry {
                packet_id,
                kind: StoreKind::Pubrel,
                packet,
                expire_at: None,
            });
        }
    }

    async fn write_packet(&mut self, packet: &GenericPacket) -> Result<(), Error> {
        packet.encode(&mut self.out_buf)?;
        self.last_packet_sent = Instant::now();
        if self.config.bulk_write {
            return Ok(());
        }
        self.flush().await
    }

    /// Flush the outbound buffer.
    ///
    /// In bulk-write mode every packet accepted since the previous flush
    /// goes out in one write; a write error fails them all.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionReset` if the stream fails.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if self.out_buf.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.out_buf);
        let result = self.stream.write_all(&buf).await;
        if let Err(err) = result {
            self.phase = Phase::Disconnecting;
            return Err(err);
        }
        Ok(())
    }

    // ---- recv ----------------------------------------------------------

    /// Receive the next packet surfaced to the caller.
    ///
    /// Automatic responses and internal packets (PINGRESP) are handled
    /// here; `Ok(None)` means the peer closed the stream cleanly.
    ///
    /// # Errors
    ///
    /// Protocol violations close the connection, on v5 after emitting a
    /// DISCONNECT with the matching reason code.
    pub async fn recv(&mut self) -> Result<Option<GenericPacket>, Error> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        self.recv_internal().await
    }

    async fn recv_internal(&mut self) -> Result<Option<GenericPacket>, Error> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(None);
            };
            match self.process_frame(&frame).await {
                Ok(Some(packet)) => return Ok(Some(packet)),
                Ok(None) => (),
                Err(err) => {
                    self.disconnect_on_error(&err).await;
                    return Err(err);
                }
            }
        }
    }

    /// Emit a v5 DISCONNECT matching the error before closing; v3 closes
    /// directly.
    async fn disconnect_on_error(&mut self, err: &Error) {
        if self.is_v5() && matches!(self.phase, Phase::Connected | Phase::MqttHandshake) {
            let reason = match err.kind() {
                ErrorKind::MalformedPacket => v5::ReasonCode::MalformedPacket,
                ErrorKind::PacketTooLarge => v5::ReasonCode::PacketTooLarge,
                ErrorKind::TopicAliasInvalid => v5::ReasonCode::TopicAliasInvalid,
                ErrorKind::ReceiveMaximumExceeded => v5::ReasonCode::ReceiveMaximumExceeded,
                ErrorKind::ConnectionReset | ErrorKind::IoError | ErrorKind::SocketError => {
                    let _ret = self.close().await;
                    return;
                }
                _ => v5::ReasonCode::ProtocolError,
            };
            let packet = GenericPacket::V5(v5::Packet::Disconnect(
                v5::DisconnectPacket::with_reason(reason),
            ));
            let _ret = self.write_packet(&packet).await;
            let _ret = self.flush().await;
        }
        let _ret = self.close().await;
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            match frame_length(&self.read_buf, self.config.max_packet_size)? {
                FrameStatus::Complete(total) => {
                    let frame: Vec<u8> = self.read_buf.drain(..total).collect();
                    self.last_packet_received = Instant::now();
                    return Ok(Some(frame));
                }
                FrameStatus::NeedMoreBytes => {
                    let n_recv = self.stream.read_buf(&mut self.read_buf).await?;
                    if n_recv == 0 {
                        if self.read_buf.is_empty() {
                            self.phase = Phase::Disconnecting;
                            return Ok(None);
                        }
                        self.phase = Phase::Disconnecting;
                        return Err(Error::new(
                            ErrorKind::ConnectionReset,
                            "endpoint: stream closed mid-packet",
                        ));
                    }
                }
            }
        }
    }

    async fn process_frame(&mut self, frame: &[u8]) -> Result<Option<GenericPacket>, Error> {
        let version = match self.version {
            Some(version) => version,
            None => {
                // Server role before CONNECT: the first packet fixes the
                // version.
                let version = peek_connect_version(frame)?;
                self.version = Some(version);
                version
            }
        };

        let packet = GenericPacket::parse(version, frame)?;
        match packet {
            GenericPacket::V3(v3::Packet::Connect(p)) => {
                self.on_connect_received(p.keep_alive());
                Ok(Some(GenericPacket::V3(v3::Packet::Connect(p))))
            }
            GenericPacket::V5(v5::Packet::Connect(p)) => {
                self.on_connect_received(p.keep_alive());
                if let Some(maximum) = p.properties().receive_maximum() {
                    self.peer_receive_maximum = maximum;
                    self.send_quota = maximum;
                }
                self.peer_maximum_packet_size = p.properties().maximum_packet_size();
                self.alias_send
                    .set_maximum(p.properties().topic_alias_maximum().unwrap_or(0));
                Ok(Some(GenericPacket::V5(v5::Packet::Connect(p))))
            }
            GenericPacket::V3(v3::Packet::ConnectAck(p)) => {
                self.phase = Phase::Connected;
                if p.session_present() {
                    self.resend_pending().await?;
                } else {
                    self.drop_session_state();
                }
                Ok(Some(GenericPacket::V3(v3::Packet::ConnectAck(p))))
            }
            GenericPacket::V5(v5::Packet::ConnectAck(p)) => {
                self.phase = Phase::Connected;
                let maximum = p.properties().receive_maximum().unwrap_or(u16::MAX);
                self.peer_receive_maximum = maximum;
                self.send_quota =
                    maximum.saturating_sub(u16::try_from(self.inflight.len()).unwrap_or(u16::MAX));
                self.peer_maximum_packet_size = p.properties().maximum_packet_size();
                self.alias_send
                    .set_maximum(p.properties().topic_alias_maximum().unwrap_or(0));
                if let Some(keep_alive) = p.properties().server_keep_alive() {
                    self.keep_alive = keep_alive;
                }
                if p.session_present() {
                    self.resend_pending().await?;
                } else {
                    self.drop_session_state();
                }
                Ok(Some(GenericPacket::V5(v5::Packet::ConnectAck(p))))
            }
            GenericPacket::V3(v3::Packet::Publish(p)) => self.on_publish_v3(p).await,
            GenericPacket::V5(v5::Packet::Publish(p)) => self.on_publish_v5(p).await,
            GenericPacket::V3(v3::Packet::PublishAck(p)) => {
                self.on_puback(p.packet_id())?;
                Ok(Some(GenericPacket::V3(v3::Packet::PublishAck(p))))
            }
            GenericPacket::V5(v5::Packet::PublishAck(p)) => {
                self.on_puback(p.packet_id())?;
                Ok(Some(GenericPacket::V5(v5::Packet::PublishAck(p))))
            }
            GenericPacket::V3(v3::Packet::PublishReceived(p)) => {
                let packet_id = p.packet_id();
                self.on_pubrec(packet_id, false).await?;
                Ok(Some(GenericPacket::V3(v3::Packet::PublishReceived(p))))
            }
            GenericPacket::V5(v5::Packet::PublishReceived(p)) => {
                let packet_id = p.packet_id();
                let failed = p.reason_code().is_error();
                self.on_pubrec(packet_id, failed).await?;
                Ok(Some(GenericPacket::V5(v5::Packet::PublishReceived(p))))
            }
            GenericPacket::V3(v3::Packet::PublishRelease(p)) => {
                if self.config.auto_response {
                    let ack = GenericPacket::V3(v3::Packet::PublishComplete(
                        v3::PublishCompletePacket::new(p.packet_id()),
                    ));
                    self.pub_recv.remove(&p.packet_id().value());
                    self.write_packet(&ack).await?;
                    Ok(None)
                } else {
                    Ok(Some(GenericPacket::V3(v3::Packet::PublishRelease(p))))
                }
            }
            GenericPacket::V5(v5::Packet::PublishRelease(p)) => {
                if self.config.auto_response {
                    let ack = GenericPacket::V5(v5::Packet::PublishComplete(
                        v5::PublishCompletePacket::new(p.packet_id()),
                    ));
                    self.pub_recv.remove(&p.packet_id().value());
                    self.write_packet(&ack).await?;
                    Ok(None)
                } else {
                    Ok(Some(GenericPacket::V5(v5::Packet::PublishRelease(p))))
                }
            }
            GenericPacket::V3(v3::Packet::PublishComplete(p)) => {
                self.on_pubcomp(p.packet_id())?;
                Ok(Some(GenericPacket::V3(v3::Packet::PublishComplete(p))))
            }
            GenericPacket::V5(v5::Packet::PublishComplete(p)) => {
                self.on_pubcomp(p.packet_id())?;
                Ok(Some(GenericPacket::V5(v5::Packet::PublishComplete(p))))
            }
            GenericPacket::V3(v3::Packet::PingRequest(p)) => {
                if self.config.auto_response {
                    let ack =
                        GenericPacket::V3(v3::Packet::PingResponse(v3::PingResponsePacket::new()));
                    self.write_packet(&ack).await?;
                    Ok(None)
                } else {
                    Ok(Some(GenericPacket::V3(v3::Packet::PingRequest(p))))
                }
            }
            GenericPacket::V5(v5::Packet::PingRequest(p)) => {
                if self.config.auto_response {
                    let ack =
                        GenericPacket::V5(v5::Packet::PingResponse(v5::PingResponsePacket::new()));
                    self.write_packet(&ack).await?;
                    Ok(None)
                } else {
                    Ok(Some(GenericPacket::V5(v5::Packet::PingRequest(p))))
                }
            }
            GenericPacket::V3(v3::Packet::PingResponse(_))
            | GenericPacket::V5(v5::Packet::PingResponse(_)) => {
                self.pingresp_pending = None;
                Ok(None)
            }
            GenericPacket::V3(v3::Packet::Disconnect(p)) => {
                self.phase = Phase::Disconnecting;
                Ok(Some(GenericPacket::V3(v3::Packet::Disconnect(p))))
            }
            GenericPacket::V5(v5::Packet::Disconnect(p)) => {
                self.phase = Phase::Disconnecting;
                Ok(Some(GenericPacket::V5(v5::Packet::Disconnect(p))))
            }
            other => Ok(Some(other)),
        }
    }

    fn on_connect_received(&mut self, keep_alive: u16) {
        self.keep_alive = keep_alive;
    }

    fn drop_session_state(&mut self) {
        for packet_id in self.inflight.packet_ids() {
            self.packet_ids.release(packet_id);
        }
        self.inflight.clear();
        self.pub_recv.clear();
        self.send_quota = self.peer_receive_maximum;
    }

    fn on_puback(&mut self, packet_id: PacketId) -> Result<(), Error> {
        if !self.inflight.remove_publish(packet_id) {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("endpoint: PUBACK for unknown packet id {packet_id}"),
            ));
        }
        self.packet_ids.release(packet_id);
        self.send_quota = self.send_quota.saturating_add(1);
        Ok(())
    }

    async fn on_pubrec(&mut self, packet_id: PacketId, failed: bool) -> Result<(), Error> {
        if !self.inflight.remove_publish(packet_id) {
            // A replayed PUBREL means the publish entry is already
            // swapped; a second PUBREC for it is acceptable.
            if !self.inflight.contains(packet_id, StoreKind::Pubrel) {
                return Err(Error::from_string(
                    ErrorKind::ProtocolError,
                    format!("endpoint: PUBREC for unknown packet id {packet_id}"),
                ));
            }
        }
        if failed {
            // No PUBREL follows a failed PUBREC; the exchange is over.
            self.inflight.remove_pubrel(packet_id);
            self.packet_ids.release(packet_id);
            self.send_quota = self.send_quota.saturating_add(1);
            return Ok(());
        }
        let pubrel = if self.is_v5() {
            GenericPacket::V5(v5::Packet::PublishRelease(v5::PublishReleasePacket::new(
                packet_id,
            )))
        } else {
            GenericPacket::V3(v3::Packet::PublishRelease(v3::PublishReleasePacket::new(
                packet_id,
            )))
        };
        self.write_packet(&pubrel).await?;
        self.store_pubrel(packet_id, pubrel);
        Ok(())
    }

    fn on_pubcomp(&mut self, packet_id: PacketId) -> Result<(), Error> {
        if !self.inflight.remove_pubrel(packet_id) {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("endpoint: PUBCOMP for unknown packet id {packet_id}"),
            ));
        }
        self.packet_ids.release(packet_id);
        self.send_quota = self.send_quota.saturating_add(1);
        Ok(())
    }

    async fn on_publish_v3(
        &mut self,
        packet: v3::PublishPacket,
    ) -> Result<Option<GenericPacket>, Error> {
        match packet.qos() {
            codec::QoS::AtMostOnce => Ok(Some(GenericPacket::V3(v3::Packet::Publish(packet)))),
            codec::QoS::AtLeastOnce => {
                if self.config.auto_response {
                    let ack = GenericPacket::V3(v3::Packet::PublishAck(v3::PublishAckPacket::new(
                        packet.packet_id(),
                    )));
                    self.write_packet(&ack).await?;
                }
                Ok(Some(GenericPacket::V3(v3::Packet::Publish(packet))))
            }
            codec::QoS::ExactOnce => {
                let packet_id = packet.packet_id();
                if self.pub_recv.contains(&packet_id.value()) {
                    // Duplicate delivery of an exchange in progress. With
                    // automatic responses the engine acks and swallows it;
                    // otherwise it is surfaced so the caller can re-ack,
                    // checked via is_inbound_qos2_in_progress.
                    if self.config.auto_response {
                        let ack = GenericPacket::V3(v3::Packet::PublishReceived(
                            v3::PublishReceivedPacket::new(packet_id),
                        ));
                        self.write_packet(&ack).await?;
                        return Ok(None);
                    }
                    return Ok(Some(GenericPacket::V3(v3::Packet::Publish(packet))));
                }
                self.check_inbound_quota()?;
                if self.config.auto_response {
                    self.pub_recv.insert(packet_id.value());
                    let ack = GenericPacket::V3(v3::Packet::PublishReceived(
                        v3::PublishReceivedPacket::new(packet_id),
                    ));
                    self.write_packet(&ack).await?;
                }
                Ok(Some(GenericPacket::V3(v3::Packet::Publish(packet))))
            }
        }
    }

    async fn on_publish_v5(
        &mut self,
        mut packet: v5::PublishPacket,
    ) -> Result<Option<GenericPacket>, Error> {
        // Topic alias rules [MQTT-3.3.2-8..12].
        if let Some(alias) = packet.topic_alias() {
            if packet.topic().is_empty() {
                let topic = self.alias_recv.resolve(alias)?.to_string();
                packet.set_topic(&topic)?;
            } else {
                self.alias_recv.register(alias, packet.topic())?;
            }
        } else if packet.topic().is_empty() {
            return Err(Error::new(
                ErrorKind::TopicAliasInvalid,
                "endpoint: empty topic without topic alias",
            ));
        }

        match packet.qos() {
            codec::QoS::AtMostOnce => Ok(Some(GenericPacket::V5(v5::Packet::Publish(packet)))),
            codec::QoS::AtLeastOnce => {
                if self.config.auto_response {
                    let ack = GenericPacket::V5(v5::Packet::PublishAck(v5::PublishAckPacket::new(
                        packet.packet_id(),
                    )));
                    self.write_packet(&ack).await?;
                }
                Ok(Some(GenericPacket::V5(v5::Packet::Publish(packet))))
            }
            codec::QoS::ExactOnce => {
                let packet_id = packet.packet_id();
                if self.pub_recv.contains(&packet_id.value()) {
                    if self.config.auto_response {
                        let ack = GenericPacket::V5(v5::Packet::PublishReceived(
                            v5::PublishReceivedPacket::new(packet_id),
                        ));
                        self.write_packet(&ack).await?;
                        return Ok(None);
                    }
                    return Ok(Some(GenericPacket::V5(v5::Packet::Publish(packet))));
                }
                self.check_inbound_quota()?;
                if self.config.auto_response {
                    self.pub_recv.insert(packet_id.value());
                    let ack = GenericPacket::V5(v5::Packet::PublishReceived(
                        v5::PublishReceivedPacket::new(packet_id),
                    ));
                    self.write_packet(&ack).await?;
                }
                Ok(Some(GenericPacket::V5(v5::Packet::Publish(packet))))
            }
        }
    }

    fn check_inbound_quota(&self) -> Result<(), Error> {
        if self.pub_recv.len() >= usize::from(self.config.receive_maximum) {
            return Err(Error::new(
                ErrorKind::ReceiveMaximumExceeded,
                "endpoint: peer exceeded our receive maximum",
            ));
        }
        Ok(())
    }

    // ---- close ---------------------------------------------------------

    /// Close the connection; idempotent. Pending bulk writes are flushed
    /// best effort first.
    ///
    /// # Errors
    ///
    /// Returns error if the final flush fails; the stream is closed
    /// regardless.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.phase == Phase::Disconnected {
            return Ok(());
        }
        let flush_result = self.flush().await;
        self.phase = Phase::Disconnected;
        let _ret = self.stream.close().await;
        flush_result
    }
}

/// Extract the protocol level from a CONNECT frame without consuming it.
fn peek_connect_version(frame: &[u8]) -> Result<ProtocolVersion, Error> {
    let mut ba = ByteArray::new(frame);
    let fixed_header = FixedHeader::decode(&mut ba)?;
    if fixed_header.packet_type() != PacketType::Connect {
        return Err(Error::new(
            ErrorKind::ProtocolError,
            "endpoint: first packet is not CONNECT",
        ));
    }
    let _protocol_name = StringData::decode(&mut ba)?;
    let level = ba.read_byte()?;
    ProtocolVersion::try_from(level).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;

    fn client_pair(version: ProtocolVersion) -> (Endpoint, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let endpoint = Endpoint::new(
            Stream::Duplex(local),
            EndpointConfig::client(version),
        );
        (endpoint, remote)
    }

    async fn read_frame_raw(remote: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        let n_recv = remote.read(&mut buf).await.unwrap();
        buf.truncate(n_recv);
        buf
    }

    fn connack_v3_bytes(session_present: bool) -> Vec<u8> {
        let packet =
            v3::ConnectAckPacket::new(session_present, v3::ConnectReturnCode::Accepted);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        buf
    }

    async fn connected_v3() -> (Endpoint, tokio::io::DuplexStream) {
        let (mut endpoint, mut remote) = client_pair(ProtocolVersion::V311);
        let connect = v3::ConnectPacket::new("ep-test").unwrap();
        endpoint
            .send(GenericPacket::V3(v3::Packet::Connect(connect)))
            .await
            .unwrap();
        let _frame = read_frame_raw(&mut remote).await;
        remote.write_all(&connack_v3_bytes(false)).await.unwrap();
        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(
            packet,
            GenericPacket::V3(v3::Packet::ConnectAck(_))
        ));
        (endpoint, remote)
    }

    #[tokio::test]
    async fn test_qos1_publish_releases_id_on_puback() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let packet_id = endpoint.acquire_unique_packet_id().unwrap();
        let mut publish = v3::PublishPacket::new("t", QoS::AtLeastOnce, b"p").unwrap();
        publish.set_packet_id(packet_id);
        endpoint
            .send(GenericPacket::V3(v3::Packet::Publish(publish)))
            .await
            .unwrap();
        assert!(endpoint.packet_ids.is_registered(packet_id));
        assert_eq!(endpoint.inflight.len(), 1);

        let _frame = read_frame_raw(&mut remote).await;
        let mut buf = Vec::new();
        v3::PublishAckPacket::new(packet_id).encode(&mut buf).unwrap();
        remote.write_all(&buf).await.unwrap();

        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(
            packet,
            GenericPacket::V3(v3::Packet::PublishAck(_))
        ));
        assert!(!endpoint.packet_ids.is_registered(packet_id));
        assert!(endpoint.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_qos2_exchange_sends_pubrel_and_releases_on_pubcomp() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let packet_id = endpoint.acquire_unique_packet_id().unwrap();
        let mut publish = v3::PublishPacket::new("t", QoS::ExactOnce, b"p").unwrap();
        publish.set_packet_id(packet_id);
        endpoint
            .send(GenericPacket::V3(v3::Packet::Publish(publish)))
            .await
            .unwrap();
        let _frame = read_frame_raw(&mut remote).await;

        let mut buf = Vec::new();
        v3::PublishReceivedPacket::new(packet_id)
            .encode(&mut buf)
            .unwrap();
        remote.write_all(&buf).await.unwrap();
        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(
            packet,
            GenericPacket::V3(v3::Packet::PublishReceived(_))
        ));

        // The engine sent PUBREL on its own and swapped the store entry.
        let frame = read_frame_raw(&mut remote).await;
        assert_eq!(frame[0], 0x62);
        assert!(endpoint.inflight.contains(packet_id, StoreKind::Pubrel));
        assert!(endpoint.packet_ids.is_registered(packet_id));

        let mut buf = Vec::new();
        v3::PublishCompletePacket::new(packet_id)
            .encode(&mut buf)
            .unwrap();
        remote.write_all(&buf).await.unwrap();
        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(
            packet,
            GenericPacket::V3(v3::Packet::PublishComplete(_))
        ));
        assert!(!endpoint.packet_ids.is_registered(packet_id));
        assert!(endpoint.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_auto_puback_for_inbound_qos1() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let mut publish = v3::PublishPacket::new("in", QoS::AtLeastOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(21));
        let mut buf = Vec::new();
        publish.encode(&mut buf).unwrap();
        remote.write_all(&buf).await.unwrap();

        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(packet, GenericPacket::V3(v3::Packet::Publish(_))));

        // PUBACK 21 went out automatically.
        let frame = read_frame_raw(&mut remote).await;
        assert_eq!(frame, vec![0x40, 0x02, 0x00, 0x15]);
    }

    #[tokio::test]
    async fn test_inbound_qos2_duplicate_not_delivered_twice() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let mut publish = v3::PublishPacket::new("in", QoS::ExactOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(9));
        let mut buf = Vec::new();
        publish.encode(&mut buf).unwrap();
        remote.write_all(&buf).await.unwrap();
        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(packet, GenericPacket::V3(v3::Packet::Publish(_))));
        let _pubrec = read_frame_raw(&mut remote).await;

        // Same exchange re-delivered with DUP; engine acks again but must
        // not surface it twice. A QoS 0 probe follows so recv has
        // something to return.
        let mut dup = v3::PublishPacket::new("in", QoS::ExactOnce, b"x").unwrap();
        dup.set_packet_id(PacketId::new(9));
        dup.set_dup(true).unwrap();
        let mut buf = Vec::new();
        dup.encode(&mut buf).unwrap();
        let probe = v3::PublishPacket::new("probe", QoS::AtMostOnce, b"!").unwrap();
        probe.encode(&mut buf).unwrap();
        remote.write_all(&buf).await.unwrap();

        let packet = endpoint.recv().await.unwrap().unwrap();
        let GenericPacket::V3(v3::Packet::Publish(p)) = packet else {
            panic!("expected probe publish");
        };
        assert_eq!(p.topic(), "probe");
    }

    #[tokio::test]
    async fn test_chunked_frame_reassembly() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let publish = v3::PublishPacket::new("chunky", QoS::AtMostOnce, b"payload").unwrap();
        let mut buf = Vec::new();
        publish.encode(&mut buf).unwrap();

        let (head, tail) = buf.split_at(3);
        remote.write_all(head).await.unwrap();
        tokio::task::yield_now().await;
        remote.write_all(tail).await.unwrap();

        let packet = endpoint.recv().await.unwrap().unwrap();
        let GenericPacket::V3(v3::Packet::Publish(p)) = packet else {
            panic!("expected publish");
        };
        assert_eq!(p.topic(), "chunky");
        assert_eq!(p.message(), b"payload");
    }

    #[tokio::test]
    async fn test_send_refused_when_disconnected() {
        let (mut endpoint, _remote) = connected_v3().await;
        endpoint.close().await.unwrap();
        let publish = v3::PublishPacket::new("t", QoS::AtMostOnce, b"p").unwrap();
        let err = endpoint
            .send(GenericPacket::V3(v3::Packet::Publish(publish)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PacketNotAllowedToSend);
    }

    #[tokio::test]
    async fn test_replay_after_session_present_reconnect() {
        let (mut endpoint, mut remote) = connected_v3().await;

        let packet_id = endpoint.acquire_unique_packet_id().unwrap();
        let mut publish = v3::PublishPacket::new("t", QoS::ExactOnce, b"p").unwrap();
        publish.set_packet_id(packet_id);
        endpoint
            .send(GenericPacket::V3(v3::Packet::Publish(publish)))
            .await
            .unwrap();
        let _frame = read_frame_raw(&mut remote).await;

        // Connection drops; durable state moves to a new endpoint.
        let state = endpoint.take_persist_state();
        assert_eq!(state.inflight.len(), 1);
        let (mut endpoint, mut remote) = client_pair(ProtocolVersion::V311);
        endpoint.restore_persist_state(state);

        let connect_packet = {
            let mut p = v3::ConnectPacket::new("ep-test").unwrap();
            p.set_clean_session(false);
            p
        };
        endpoint
            .send(GenericPacket::V3(v3::Packet::Connect(connect_packet)))
            .await
            .unwrap();
        let _frame = read_frame_raw(&mut remote).await;
        remote.write_all(&connack_v3_bytes(true)).await.unwrap();
        let packet = endpoint.recv().await.unwrap().unwrap();
        assert!(matches!(
            packet,
            GenericPacket::V3(v3::Packet::ConnectAck(_))
        ));

        // The stored QoS2 publish was replayed with DUP set.
        let frame = read_frame_raw(&mut remote).await;
        let replayed = v3::Packet::parse(&frame).unwrap();
        let v3::Packet::Publish(p) = replayed else {
            panic!("expected replayed publish");
        };
        assert!(p.dup());
        assert_eq!(p.packet_id(), packet_id);
    }
}
