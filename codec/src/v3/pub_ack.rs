// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The four publish acknowledgement packets.
//!
//! All of them share the same shape: a fixed header and a two byte packet
//! id. QoS 1 uses PUBACK alone; QoS 2 walks PUBREC, PUBREL, PUBCOMP.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, VarIntError,
};

macro_rules! packet_id_ack_packet {
    ($name:ident, $packet_type:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            packet_id: PacketId,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self { packet_id }
            }

            #[must_use]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                if fixed_header.remaining_length() != PacketId::bytes() {
                    return Err(DecodeError::InvalidRemainingLength);
                }
                let packet_id = PacketId::decode(ba)?;
                Ok(Self { packet_id })
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let old_len = buf.len();
                let fixed_header = FixedHeader::new($packet_type, PacketId::bytes())?;
                fixed_header.encode(buf)?;
                self.packet_id.encode(buf)?;
                Ok(buf.len() - old_len)
            }
        }

        impl Packet for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn bytes(&self) -> Result<usize, VarIntError> {
                let fixed_header = FixedHeader::new($packet_type, PacketId::bytes())?;
                Ok(fixed_header.bytes() + fixed_header.remaining_length())
            }
        }
    };
}

packet_id_ack_packet!(
    PublishAckPacket,
    PacketType::PublishAck,
    "Response to a QoS 1 PUBLISH; receiving it releases the packet id."
);
packet_id_ack_packet!(
    PublishReceivedPacket,
    PacketType::PublishReceived,
    "First response of the QoS 2 exchange [MQTT-4.3.3-1]."
);
packet_id_ack_packet!(
    PublishReleasePacket,
    PacketType::PublishRelease,
    "Second half of the QoS 2 exchange; fixed header flags are 0b0010 \
     [MQTT-3.6.1-1]."
);
packet_id_ack_packet!(
    PublishCompletePacket,
    PacketType::PublishComplete,
    "Final packet of the QoS 2 exchange; receiving it releases the packet id."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = PublishAckPacket::new(PacketId::new(9));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x09]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PublishAckPacket::decode(&mut ba), Ok(packet));
    }

    #[test]
    fn test_release_flag_bits() {
        let packet = PublishReleasePacket::new(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x62);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let packet = PublishReceivedPacket::new(PacketId::new(2));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishCompletePacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketType)
        );
    }
}
