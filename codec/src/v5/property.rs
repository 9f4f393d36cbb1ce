// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT 5.0 properties.
//!
//! Every property is identified by a one byte id followed by a typed value.
//! A property list is prefixed with its byte length as a variable byte
//! integer. Most properties may appear at most once; User Property and
//! Subscription Identifier are the exceptions.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Properties which may legally appear more than once in one list.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Check that every property in `properties` is listed in `types` and that
/// no single-occurrence property repeats.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Byte length in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// One decoded property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte, PUBLISH and Will: 0 for opaque bytes, 1 for UTF-8 payload.
    PayloadFormatIndicator(BoolData),

    /// Four byte integer, PUBLISH and Will: message lifetime in seconds.
    MessageExpiryInterval(U32Data),

    /// UTF-8 string, PUBLISH and Will.
    ContentType(StringData),

    /// UTF-8 string, PUBLISH and Will: topic name for the response message.
    ResponseTopic(PubTopic),

    /// Binary data, PUBLISH and Will.
    CorrelationData(BinaryData),

    /// Variable byte integer 1..=268,435,455, PUBLISH and SUBSCRIBE.
    /// Zero is a protocol error.
    SubscriptionIdentifier(VarInt),

    /// Four byte integer, CONNECT/CONNACK/DISCONNECT, seconds.
    /// `0xFFFF_FFFF` means the session does not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 string, CONNACK: id the server picked for a zero-length
    /// client id [MQTT-3.2.2-16].
    AssignedClientIdentifier(StringData),

    /// Two byte integer, CONNACK: overrides the client's keep alive
    /// [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 string, CONNECT/CONNACK/AUTH.
    AuthenticationMethod(StringData),

    /// Binary data, CONNECT/CONNACK/AUTH.
    AuthenticationData(BinaryData),

    /// Byte 0/1, CONNECT.
    RequestProblemInformation(BoolData),

    /// Four byte integer, Will properties: seconds before the will is
    /// published; the session end publishes it earlier [MQTT-3.1.3-9].
    WillDelayInterval(U32Data),

    /// Byte 0/1, CONNECT.
    RequestResponseInformation(BoolData),

    /// UTF-8 string, CONNACK: basis for the client's response topic.
    ResponseInformation(StringData),

    /// UTF-8 string, CONNACK/DISCONNECT.
    ServerReference(StringData),

    /// UTF-8 string, acks and DISCONNECT: human readable diagnostics.
    ReasonString(StringData),

    /// Two byte integer, CONNECT/CONNACK: cap on concurrent unacknowledged
    /// QoS>0 publishes. Zero is a protocol error.
    ReceiveMaximum(U16Data),

    /// Two byte integer, CONNECT/CONNACK: highest alias the sender of this
    /// property will accept.
    TopicAliasMaximum(U16Data),

    /// Two byte integer, PUBLISH. Zero is a protocol error.
    TopicAlias(U16Data),

    /// Byte 0/1, CONNACK.
    MaximumQoS(QoS),

    /// Byte 0/1, CONNACK.
    RetainAvailable(BoolData),

    /// UTF-8 string pair, any packet; may repeat, order preserved.
    UserProperty(StringPairData),

    /// Four byte integer, CONNECT/CONNACK. Zero is a protocol error.
    MaximumPacketSize(U32Data),

    /// Byte 0/1, CONNACK.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte 0/1, CONNACK.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte 0/1, CONNACK.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Byte length in packet, id byte included.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::PayloadFormatIndicator(..)
            | Self::RequestProblemInformation(..)
            | Self::RequestResponseInformation(..)
            | Self::RetainAvailable(..)
            | Self::WildcardSubscriptionAvailable(..)
            | Self::SubscriptionIdentifierAvailable(..)
            | Self::SharedSubscriptionAvailable(..) => BoolData::bytes(),
            Self::MaximumQoS(..) => QoS::bytes(),
            Self::ServerKeepAlive(..)
            | Self::ReceiveMaximum(..)
            | Self::TopicAliasMaximum(..)
            | Self::TopicAlias(..) => U16Data::bytes(),
            Self::MessageExpiryInterval(..)
            | Self::SessionExpiryInterval(..)
            | Self::WillDelayInterval(..)
            | Self::MaximumPacketSize(..) => U32Data::bytes(),
            Self::ContentType(value)
            | Self::AssignedClientIdentifier(value)
            | Self::AuthenticationMethod(value)
            | Self::ResponseInformation(value)
            | Self::ServerReference(value)
            | Self::ReasonString(value) => value.bytes(),
            Self::ResponseTopic(value) => value.bytes(),
            Self::CorrelationData(value) | Self::AuthenticationData(value) => value.bytes(),
            Self::SubscriptionIdentifier(value) => value.bytes(),
            Self::UserProperty(value) => value.bytes(),
        };

        PropertyType::bytes() + value_bytes
    }
}

impl DecodePacket for Property {
    #[allow(clippy::too_many_lines)]
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(ba.read_byte()?)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                Ok(Self::PayloadFormatIndicator(BoolData::decode(ba)?))
            }
            PropertyType::MessageExpiryInterval => {
                Ok(Self::MessageExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::ContentType => Ok(Self::ContentType(StringData::decode(ba)?)),
            PropertyType::ResponseTopic => {
                let topic = PubTopic::decode(ba)?;
                if topic.is_empty() {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ResponseTopic(topic))
            }
            PropertyType::CorrelationData => Ok(Self::CorrelationData(BinaryData::decode(ba)?)),
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => {
                Ok(Self::SessionExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::AssignedClientIdentifier => {
                Ok(Self::AssignedClientIdentifier(StringData::decode(ba)?))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(U16Data::decode(ba)?)),
            PropertyType::AuthenticationMethod => {
                Ok(Self::AuthenticationMethod(StringData::decode(ba)?))
            }
            PropertyType::AuthenticationData => {
                Ok(Self::AuthenticationData(BinaryData::decode(ba)?))
            }
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(BoolData::decode(ba)?))
            }
            PropertyType::WillDelayInterval => Ok(Self::WillDelayInterval(U32Data::decode(ba)?)),
            PropertyType::RequestResponseInformation => {
                Ok(Self::RequestResponseInformation(BoolData::decode(ba)?))
            }
            PropertyType::ResponseInformation => {
                Ok(Self::ResponseInformation(StringData::decode(ba)?))
            }
            PropertyType::ServerReference => Ok(Self::ServerReference(StringData::decode(ba)?)),
            PropertyType::ReasonString => Ok(Self::ReasonString(StringData::decode(ba)?)),
            PropertyType::ReceiveMaximum => {
                let max = U16Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::TopicAliasMaximum => Ok(Self::TopicAliasMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAlias => Ok(Self::TopicAlias(U16Data::decode(ba)?)),
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(ba)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(BoolData::decode(ba)?)),
            PropertyType::UserProperty => Ok(Self::UserProperty(StringPairData::decode(ba)?)),
            PropertyType::MaximumPacketSize => {
                let max = U32Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                Ok(Self::WildcardSubscriptionAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                Ok(Self::SubscriptionIdentifierAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SharedSubscriptionAvailable => {
                Ok(Self::SharedSubscriptionAvailable(BoolData::decode(ba)?))
            }
        }
    }
}

impl EncodePacket for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(v)
            | Self::RequestProblemInformation(v)
            | Self::RequestResponseInformation(v)
            | Self::RetainAvailable(v)
            | Self::WildcardSubscriptionAvailable(v)
            | Self::SubscriptionIdentifierAvailable(v)
            | Self::SharedSubscriptionAvailable(v) => v.encode(buf)?,
            Self::MaximumQoS(v) => v.encode(buf)?,
            Self::ServerKeepAlive(v)
            | Self::ReceiveMaximum(v)
            | Self::TopicAliasMaximum(v)
            | Self::TopicAlias(v) => v.encode(buf)?,
            Self::MessageExpiryInterval(v)
            | Self::SessionExpiryInterval(v)
            | Self::WillDelayInterval(v)
            | Self::MaximumPacketSize(v) => v.encode(buf)?,
            Self::ContentType(v)
            | Self::AssignedClientIdentifier(v)
            | Self::AuthenticationMethod(v)
            | Self::ResponseInformation(v)
            | Self::ServerReference(v)
            | Self::ReasonString(v) => v.encode(buf)?,
            Self::ResponseTopic(v) => v.encode(buf)?,
            Self::CorrelationData(v) | Self::AuthenticationData(v) => v.encode(buf)?,
            Self::SubscriptionIdentifier(v) => v.encode(buf)?,
            Self::UserProperty(v) => v.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// An ordered property list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl AsRef<[Property]> for Properties {
    fn as_ref(&self) -> &[Property] {
        &self.0
    }
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length in packet, length prefix included.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload: usize = self.0.iter().map(Property::bytes).sum();
        // Length prefix counts the payload bytes, not the property count.
        VarInt::from(payload).map_or(0, |v| v.bytes()) + payload
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Append a property.
    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    /// Remove every occurrence of `property_type`.
    pub fn remove(&mut self, property_type: PropertyType) {
        self.0.retain(|p| p.property_type() != property_type);
    }

    fn first(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        match self.first(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        match self.first(PropertyType::MessageExpiryInterval) {
            Some(Property::MessageExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.first(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.first(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.first(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.first(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn will_delay_interval(&self) -> Option<u32> {
        match self.first(PropertyType::WillDelayInterval) {
            Some(Property::WillDelayInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.first(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(v)) => Some(v.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.first(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn response_information(&self) -> Option<&str> {
        match self.first(PropertyType::ResponseInformation) {
            Some(Property::ResponseInformation(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn request_response_information(&self) -> bool {
        match self.first(PropertyType::RequestResponseInformation) {
            Some(Property::RequestResponseInformation(v)) => v.value(),
            _ => false,
        }
    }

    #[must_use]
    pub fn subscription_identifiers(&self) -> Vec<usize> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::SubscriptionIdentifier(v) => Some(v.value()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn user_properties(&self) -> Vec<&StringPairData> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::UserProperty(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let total = VarInt::decode(ba)?.value();
        let mut consumed = 0;
        let mut properties = Vec::new();
        while consumed < total {
            let property = Property::decode(ba)?;
            consumed += property.bytes();
            properties.push(property);
        }
        if consumed != total {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let payload: usize = self.0.iter().map(Property::bytes).sum();
        let len = VarInt::from(payload)?;
        let mut written = len.encode(buf)?;
        for property in &self.0 {
            written += property.encode(buf)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut properties = Properties::new();
        properties.push(Property::TopicAlias(U16Data::new(3)));
        properties.push(Property::MessageExpiryInterval(U32Data::new(60)));
        properties.push(Property::UserProperty(
            StringPairData::from("k", "v").unwrap(),
        ));

        let mut buf = Vec::new();
        let written = properties.encode(&mut buf).unwrap();
        assert_eq!(written, properties.bytes());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, properties);
        assert_eq!(decoded.topic_alias(), Some(3));
        assert_eq!(decoded.message_expiry_interval(), Some(60));
    }

    #[test]
    fn test_unknown_property_id() {
        // Length 2, id 0x10 is undefined.
        let buf = [0x02, 0x10, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_zero_receive_maximum_rejected() {
        let buf = [0x03, 0x21, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn test_duplicate_check() {
        let mut properties = Properties::new();
        properties.push(Property::TopicAlias(U16Data::new(1)));
        properties.push(Property::TopicAlias(U16Data::new(2)));
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::TopicAlias]),
            Err(PropertyType::TopicAlias)
        );
    }

    #[test]
    fn test_multiple_subscription_identifiers_allowed() {
        let mut properties = Properties::new();
        properties.push(Property::SubscriptionIdentifier(VarInt::from(1).unwrap()));
        properties.push(Property::SubscriptionIdentifier(VarInt::from(9).unwrap()));
        assert!(check_property_type_list(
            properties.props(),
            &[PropertyType::SubscriptionIdentifier]
        )
        .is_ok());
        assert_eq!(properties.subscription_identifiers(), vec![1, 9]);
    }
}
