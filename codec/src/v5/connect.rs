// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use super::property::{check_property_type_list, Properties, PropertyType};
use crate::topic::TopicError;
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet, PacketType, ProtocolVersion, PubTopic, QoS, StringData, VarIntError,
};

/// Properties allowed in the CONNECT variable header.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties allowed in the will property block of the payload.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// Connect flag byte; same bit layout as v3 with clean-session renamed to
/// clean-start. Bit 0 is reserved and MUST be zero [MQTT-3.1.2-3].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    pub clean_start: bool,
    pub will: bool,
    pub will_qos: QoS,
    pub will_retain: bool,
    pub has_password: bool,
    pub has_username: bool,
}

impl ConnectFlags {
    /// Byte length in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl DecodePacket for ConnectFlags {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flags = ba.read_byte()?;
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let clean_start = flags & 0b0000_0010 != 0;
        let will = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)
            .map_err(|_e| DecodeError::InvalidConnectFlags)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let has_password = flags & 0b0100_0000 != 0;
        let has_username = flags & 0b1000_0000 != 0;

        if !will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }

        Ok(Self {
            clean_start,
            will,
            will_qos,
            will_retain,
            has_password,
            has_username,
        })
    }
}

impl EncodePacket for ConnectFlags {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut flags = 0u8;
        if self.clean_start {
            flags |= 0b0000_0010;
        }
        if self.will {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
            if self.will_retain {
                flags |= 0b0010_0000;
            }
        }
        if self.has_password {
            flags |= 0b0100_0000;
        }
        if self.has_username {
            flags |= 0b1000_0000;
        }
        buf.push(flags);
        Ok(Self::bytes())
    }
}

/// First packet a v5 client sends after the network connection is
/// established [MQTT-3.1.0-1].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,
    connect_flags: ConnectFlags,
    keep_alive: u16,
    properties: Properties,

    client_id: StringData,
    will_properties: Properties,
    will_topic: Option<PubTopic>,
    will_message: Vec<u8>,
    username: StringData,
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a packet with the given client id and default flags.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id)?;
        Ok(Self {
            protocol_name: StringData::from("MQTT")?,
            connect_flags: ConnectFlags {
                clean_start: true,
                ..ConnectFlags::default()
            },
            keep_alive: 60,
            properties: Properties::new(),
            client_id: StringData::from(client_id)?,
            will_properties: Properties::new(),
            will_topic: None,
            will_message: Vec::new(),
            username: StringData::new(),
            password: BinaryData::new(),
        })
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_clean_start(&mut self, clean_start: bool) -> &mut Self {
        self.connect_flags.clean_start = clean_start;
        self
    }

    #[must_use]
    pub const fn clean_start(&self) -> bool {
        self.connect_flags.clean_start
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_client_id(client_id)?;
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Attach a will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcards.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, TopicError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = message.to_vec();
        self.connect_flags.will = true;
        self.connect_flags.will_qos = qos;
        self.connect_flags.will_retain = retain;
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        &self.will_message
    }

    #[must_use]
    pub const fn will_properties(&self) -> &Properties {
        &self.will_properties
    }

    pub fn will_properties_mut(&mut self) -> &mut Properties {
        &mut self.will_properties
    }

    /// Set username and mark it present.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is invalid.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username)?;
        self.connect_flags.has_username = !username.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Set password and mark it present.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too long.
    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        self.connect_flags.has_password = !password.is_empty();
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.protocol_name.bytes()
            + ProtocolVersion::bytes()
            + ConnectFlags::bytes()
            + 2 // keep alive
            + self.properties.bytes()
            + self.client_id.bytes();
        if let Some(will_topic) = &self.will_topic {
            len += self.will_properties.bytes();
            len += will_topic.bytes();
            len += 2 + self.will_message.len();
        }
        if self.connect_flags.has_username {
            len += self.username.bytes();
        }
        if self.connect_flags.has_password {
            len += self.password.bytes();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != "MQTT" {
            return Err(DecodeError::InvalidProtocolName);
        }
        let protocol_version = ProtocolVersion::decode(ba)?;
        if protocol_version != ProtocolVersion::V5 {
            return Err(DecodeError::InvalidProtocolLevel);
        }
        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), CONNECT_PROPERTIES)
        {
            log::error!("v5/ConnectPacket: property {property_type:?} not allowed");
            return Err(DecodeError::InvalidPropertyType);
        }

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_e| DecodeError::InvalidClientId)?;

        let (will_properties, will_topic, will_message) = if connect_flags.will {
            let will_properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(will_properties.props(), WILL_PROPERTIES)
            {
                log::error!("v5/ConnectPacket: will property {property_type:?} not allowed");
                return Err(DecodeError::InvalidPropertyType);
            }
            let topic = PubTopic::decode(ba)?;
            if topic.is_empty() {
                return Err(DecodeError::InvalidTopicName);
            }
            let msg_len = ba.read_u16()? as usize;
            let msg = ba.read_bytes(msg_len)?.to_vec();
            (will_properties, Some(topic), msg)
        } else {
            (Properties::new(), None, Vec::new())
        };

        let username = if connect_flags.has_username {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };
        let password = if connect_flags.has_password {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_name,
            connect_flags,
            keep_alive,
            properties,
            client_id,
            will_properties,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        self.protocol_name.encode(buf)?;
        ProtocolVersion::V5.encode(buf)?;
        self.connect_flags.encode(buf)?;
        buf.write_u16::<BigEndian>(self.keep_alive)?;
        self.properties.encode(buf)?;

        self.client_id.encode(buf)?;
        if let Some(will_topic) = &self.will_topic {
            self.will_properties.encode(buf)?;
            will_topic.encode(buf)?;
            #[allow(clippy::cast_possible_truncation)]
            let msg_len = self.will_message.len() as u16;
            buf.write_u16::<BigEndian>(msg_len)?;
            buf.write_all(&self.will_message)?;
        }
        if self.connect_flags.has_username {
            self.username.encode(buf)?;
        }
        if self.connect_flags.has_password {
            self.password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v5::Property;
    use crate::{U16Data, U32Data};

    #[test]
    fn test_round_trip() {
        let mut packet = ConnectPacket::new("cid5").unwrap();
        packet.set_clean_start(false).set_keep_alive(10);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(300)));
        packet
            .properties_mut()
            .push(Property::TopicAliasMaximum(U16Data::new(8)));
        packet
            .set_will("will/topic", b"bye", QoS::ExactOnce, false)
            .unwrap();
        packet
            .will_properties_mut()
            .push(Property::WillDelayInterval(U32Data::new(2)));

        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, packet.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties().session_expiry_interval(), Some(300));
        assert_eq!(decoded.will_properties().will_delay_interval(), Some(2));
    }

    #[test]
    fn test_connect_property_not_allowed() {
        let mut packet = ConnectPacket::new("cid5").unwrap();
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(1)));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }
}
