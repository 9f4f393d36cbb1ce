// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The four publish acknowledgement packets of v5.
//!
//! Unlike v3 they carry a reason code and properties. A remaining length of
//! two means success with no properties [MQTT-3.4.2.1]; a remaining length
//! of three omits only the property block.

use super::property::{check_property_type_list, Properties, PropertyType};
use super::reason_code::ReasonCode;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, VarIntError,
};

/// Properties allowed in every publish acknowledgement packet.
pub const PUB_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

macro_rules! reason_ack_packet {
    ($name:ident, $packet_type:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct $name {
            packet_id: PacketId,
            reason_code: ReasonCode,
            properties: Properties,
        }

        impl $name {
            /// A success acknowledgement.
            #[must_use]
            pub fn new(packet_id: PacketId) -> Self {
                Self {
                    packet_id,
                    reason_code: ReasonCode::Success,
                    properties: Properties::new(),
                }
            }

            #[must_use]
            pub fn with_reason(packet_id: PacketId, reason_code: ReasonCode) -> Self {
                Self {
                    packet_id,
                    reason_code,
                    properties: Properties::new(),
                }
            }

            #[must_use]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }

            #[must_use]
            pub const fn reason_code(&self) -> ReasonCode {
                self.reason_code
            }

            #[must_use]
            pub const fn properties(&self) -> &Properties {
                &self.properties
            }

            pub fn properties_mut(&mut self) -> &mut Properties {
                &mut self.properties
            }

            fn remaining_length(&self) -> usize {
                if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
                    PacketId::bytes()
                } else if self.properties.is_empty() {
                    PacketId::bytes() + ReasonCode::bytes()
                } else {
                    PacketId::bytes() + ReasonCode::bytes() + self.properties.bytes()
                }
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                if fixed_header.remaining_length() < PacketId::bytes() {
                    return Err(DecodeError::InvalidRemainingLength);
                }

                let packet_id = PacketId::decode(ba)?;
                let reason_code = if fixed_header.remaining_length() > PacketId::bytes() {
                    ReasonCode::decode(ba)?
                } else {
                    ReasonCode::Success
                };
                let properties = if fixed_header.remaining_length()
                    > PacketId::bytes() + ReasonCode::bytes()
                {
                    Properties::decode(ba)?
                } else {
                    Properties::new()
                };
                if let Err(property_type) =
                    check_property_type_list(properties.props(), PUB_ACK_PROPERTIES)
                {
                    log::error!(
                        "v5/{}: property {property_type:?} not allowed",
                        stringify!($name)
                    );
                    return Err(DecodeError::InvalidPropertyType);
                }

                Ok(Self {
                    packet_id,
                    reason_code,
                    properties,
                })
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let old_len = buf.len();
                let remaining_length = self.remaining_length();
                let fixed_header = FixedHeader::new($packet_type, remaining_length)?;
                fixed_header.encode(buf)?;
                self.packet_id.encode(buf)?;
                if remaining_length > PacketId::bytes() {
                    self.reason_code.encode(buf)?;
                }
                if remaining_length > PacketId::bytes() + ReasonCode::bytes() {
                    self.properties.encode(buf)?;
                }
                Ok(buf.len() - old_len)
            }
        }

        impl Packet for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn bytes(&self) -> Result<usize, VarIntError> {
                let fixed_header = FixedHeader::new($packet_type, self.remaining_length())?;
                Ok(fixed_header.bytes() + fixed_header.remaining_length())
            }
        }
    };
}

reason_ack_packet!(
    PublishAckPacket,
    PacketType::PublishAck,
    "Response to a QoS 1 PUBLISH; receiving it releases the packet id."
);
reason_ack_packet!(
    PublishReceivedPacket,
    PacketType::PublishReceived,
    "First response of the QoS 2 exchange. A failure reason code ends the \
     exchange without a PUBREL."
);
reason_ack_packet!(
    PublishReleasePacket,
    PacketType::PublishRelease,
    "Second half of the QoS 2 exchange; fixed header flags are 0b0010 \
     [MQTT-3.6.1-1]."
);
reason_ack_packet!(
    PublishCompletePacket,
    PacketType::PublishComplete,
    "Final packet of the QoS 2 exchange; receiving it releases the packet id."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_success_form() {
        let packet = PublishAckPacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x05]);
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
    }

    #[test]
    fn test_reason_form() {
        let packet =
            PublishReceivedPacket::with_reason(PacketId::new(2), ReasonCode::QuotaExceeded);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x50, 0x03, 0x00, 0x02, 0x97]);
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReceivedPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.reason_code().is_error());
    }

    #[test]
    fn test_release_flag_bits() {
        let packet = PublishReleasePacket::new(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x62);
    }
}
