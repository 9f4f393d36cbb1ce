// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use super::property::{check_property_type_list, Properties, Property, PropertyType};
use crate::topic::{validate_pub_topic, TopicError};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, U16Data, VarIntError,
};

/// Properties allowed in the PUBLISH variable header.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// Transports an application message in either direction.
///
/// The topic name may be empty when a topic alias property is present; the
/// receiver substitutes the name registered for the alias [MQTT-3.3.2].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: PubTopic,
    packet_id: PacketId,
    properties: Properties,
    msg: Vec<u8>,
}

impl PublishPacket {
    /// Create a packet for `topic` with `msg` as payload.
    ///
    /// An empty topic is accepted; it is only sendable once a topic alias
    /// property is attached.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, TopicError> {
        validate_pub_topic(topic)?;
        let topic = if topic.is_empty() {
            PubTopic::empty()
        } else {
            PubTopic::new(topic)?
        };
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            msg: msg.to_vec(),
        })
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update the dup flag.
    ///
    /// # Errors
    ///
    /// Returns error when setting dup on a `QoS` 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
        }
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic; empty is allowed for alias-only sends.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, TopicError> {
        validate_pub_topic(topic)?;
        self.topic = if topic.is_empty() {
            PubTopic::empty()
        } else {
            PubTopic::new(topic)?
        };
        Ok(self)
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Attach (or replace) the topic alias property.
    pub fn set_topic_alias(&mut self, alias: u16) -> &mut Self {
        self.properties.remove(PropertyType::TopicAlias);
        self.properties.push(Property::TopicAlias(U16Data::new(alias)));
        self
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.topic_alias()
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.topic.bytes() + self.properties.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            len += PacketId::bytes();
        }
        len
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let start_offset = ba.offset();
        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!("v5/PublishPacket: property {property_type:?} not allowed");
            return Err(DecodeError::InvalidPropertyType);
        }

        let consumed = ba.offset() - start_offset;
        if fixed_header.remaining_length() < consumed {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let msg_len = fixed_header.remaining_length() - consumed;
        let msg = ba.read_bytes(msg_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length())?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        self.properties.encode(buf)?;
        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v5::Property;
    use crate::U32Data;

    #[test]
    fn test_round_trip_with_properties() {
        let mut packet = PublishPacket::new("topic/long", QoS::AtLeastOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(3));
        packet.set_topic_alias(1);
        packet
            .properties_mut()
            .push(Property::MessageExpiryInterval(U32Data::new(30)));

        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, packet.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.topic_alias(), Some(1));
        assert_eq!(decoded.properties().message_expiry_interval(), Some(30));
    }

    #[test]
    fn test_empty_topic_with_alias() {
        let mut packet = PublishPacket::new("", QoS::AtMostOnce, b"p").unwrap();
        packet.set_topic_alias(2);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert!(decoded.topic().is_empty());
        assert_eq!(decoded.topic_alias(), Some(2));
    }

    #[test]
    fn test_subscription_identifiers_survive() {
        let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"p").unwrap();
        packet
            .properties_mut()
            .push(Property::SubscriptionIdentifier(
                crate::VarInt::from(5).unwrap(),
            ));
        packet
            .properties_mut()
            .push(Property::SubscriptionIdentifier(
                crate::VarInt::from(7).unwrap(),
            ));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.properties().subscription_identifiers(), vec![5, 7]);
    }
}
