// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Control packets of MQTT 5.0.

mod auth;
mod connect;
mod connect_ack;
mod disconnect;
mod property;
mod pub_ack;
mod publish;
mod reason_code;
mod subscribe;
mod subscribe_ack;
mod unsubscribe;
mod unsubscribe_ack;

pub use auth::AuthPacket;
pub use connect::{ConnectFlags, ConnectPacket};
pub use connect_ack::ConnectAckPacket;
pub use disconnect::DisconnectPacket;
pub use property::{
    check_property_type_list, Properties, Property, PropertyType, MULTIPLE_PROPERTIES,
};
pub use pub_ack::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
};
pub use publish::PublishPacket;
pub use reason_code::ReasonCode;
pub use subscribe::{RetainHandling, SubscribeOptions, SubscribePacket, SubscribeTopic};
pub use subscribe_ack::SubscribeAckPacket;
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::UnsubscribeAckPacket;

// PINGREQ and PINGRESP are byte-identical across protocol versions.
pub use crate::v3::{PingRequestPacket, PingResponsePacket};

use std::convert::TryFrom;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, Packet as PacketTrait,
    PacketType, VarIntError,
};

/// Union of every v5 control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(p) => p.packet_type(),
            Self::ConnectAck(p) => p.packet_type(),
            Self::Publish(p) => p.packet_type(),
            Self::PublishAck(p) => p.packet_type(),
            Self::PublishReceived(p) => p.packet_type(),
            Self::PublishRelease(p) => p.packet_type(),
            Self::PublishComplete(p) => p.packet_type(),
            Self::Subscribe(p) => p.packet_type(),
            Self::SubscribeAck(p) => p.packet_type(),
            Self::Unsubscribe(p) => p.packet_type(),
            Self::UnsubscribeAck(p) => p.packet_type(),
            Self::PingRequest(p) => p.packet_type(),
            Self::PingResponse(p) => p.packet_type(),
            Self::Disconnect(p) => p.packet_type(),
            Self::Auth(p) => p.packet_type(),
        }
    }

    /// Total byte length on the wire.
    ///
    /// # Errors
    ///
    /// Returns error if the packet is too large to frame.
    pub fn bytes(&self) -> Result<usize, VarIntError> {
        match self {
            Self::Connect(p) => p.bytes(),
            Self::ConnectAck(p) => p.bytes(),
            Self::Publish(p) => p.bytes(),
            Self::PublishAck(p) => p.bytes(),
            Self::PublishReceived(p) => p.bytes(),
            Self::PublishRelease(p) => p.bytes(),
            Self::PublishComplete(p) => p.bytes(),
            Self::Subscribe(p) => p.bytes(),
            Self::SubscribeAck(p) => p.bytes(),
            Self::Unsubscribe(p) => p.bytes(),
            Self::UnsubscribeAck(p) => p.bytes(),
            Self::PingRequest(p) => p.bytes(),
            Self::PingResponse(p) => p.bytes(),
            Self::Disconnect(p) => p.bytes(),
            Self::Auth(p) => p.bytes(),
        }
    }

    /// Parse one complete packet from `buf`.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed.
    pub fn parse(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::InsufficientData);
        }
        let packet_type = PacketType::try_from(buf[0])?;
        let mut ba = ByteArray::new(buf);
        match packet_type {
            PacketType::Connect => Ok(Self::Connect(ConnectPacket::decode(&mut ba)?)),
            PacketType::ConnectAck => Ok(Self::ConnectAck(ConnectAckPacket::decode(&mut ba)?)),
            PacketType::Publish { .. } => Ok(Self::Publish(PublishPacket::decode(&mut ba)?)),
            PacketType::PublishAck => Ok(Self::PublishAck(PublishAckPacket::decode(&mut ba)?)),
            PacketType::PublishReceived => {
                Ok(Self::PublishReceived(PublishReceivedPacket::decode(&mut ba)?))
            }
            PacketType::PublishRelease => {
                Ok(Self::PublishRelease(PublishReleasePacket::decode(&mut ba)?))
            }
            PacketType::PublishComplete => {
                Ok(Self::PublishComplete(PublishCompletePacket::decode(&mut ba)?))
            }
            PacketType::Subscribe => Ok(Self::Subscribe(SubscribePacket::decode(&mut ba)?)),
            PacketType::SubscribeAck => {
                Ok(Self::SubscribeAck(SubscribeAckPacket::decode(&mut ba)?))
            }
            PacketType::Unsubscribe => Ok(Self::Unsubscribe(UnsubscribePacket::decode(&mut ba)?)),
            PacketType::UnsubscribeAck => {
                Ok(Self::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut ba)?))
            }
            PacketType::PingRequest => {
                Ok(Self::PingRequest(PingRequestPacket::decode(&mut ba)?))
            }
            PacketType::PingResponse => {
                Ok(Self::PingResponse(PingResponsePacket::decode(&mut ba)?))
            }
            PacketType::Disconnect => Ok(Self::Disconnect(DisconnectPacket::decode(&mut ba)?)),
            PacketType::Auth => Ok(Self::Auth(AuthPacket::decode(&mut ba)?)),
        }
    }
}

impl EncodePacket for Packet {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnectAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PublishAck(p) => p.encode(buf),
            Self::PublishReceived(p) => p.encode(buf),
            Self::PublishRelease(p) => p.encode(buf),
            Self::PublishComplete(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubscribeAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubscribeAck(p) => p.encode(buf),
            Self::PingRequest(p) => p.encode(buf),
            Self::PingResponse(p) => p.encode(buf),
            Self::Disconnect(p) => p.encode(buf),
            Self::Auth(p) => p.encode(buf),
        }
    }
}
