// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Version-spanning packet union.
//!
//! An endpoint fixes its protocol version only once CONNECT has been seen;
//! everything above the parser works with this union.

use crate::{v3, v5, DecodeError, EncodeError, EncodePacket, PacketType, ProtocolVersion, VarIntError};

/// One control packet of either protocol version.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericPacket {
    V3(v3::Packet),
    V5(v5::Packet),
}

impl GenericPacket {
    /// Parse one complete frame according to `version`.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed for that version.
    pub fn parse(version: ProtocolVersion, buf: &[u8]) -> Result<Self, DecodeError> {
        match version {
            ProtocolVersion::V31 | ProtocolVersion::V311 => {
                Ok(Self::V3(v3::Packet::parse(buf)?))
            }
            ProtocolVersion::V5 => Ok(Self::V5(v5::Packet::parse(buf)?)),
        }
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::V3(p) => p.packet_type(),
            Self::V5(p) => p.packet_type(),
        }
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        match self {
            Self::V3(_) => ProtocolVersion::V311,
            Self::V5(_) => ProtocolVersion::V5,
        }
    }

    /// Total byte length on the wire.
    ///
    /// # Errors
    ///
    /// Returns error if the packet is too large to frame.
    pub fn bytes(&self) -> Result<usize, VarIntError> {
        match self {
            Self::V3(p) => p.bytes(),
            Self::V5(p) => p.bytes(),
        }
    }
}

impl EncodePacket for GenericPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::V3(p) => p.encode(buf),
            Self::V5(p) => p.encode(buf),
        }
    }
}

impl From<v3::Packet> for GenericPacket {
    fn from(packet: v3::Packet) -> Self {
        Self::V3(packet)
    }
}

impl From<v5::Packet> for GenericPacket {
    fn from(packet: v5::Packet) -> Self {
        Self::V5(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_parse_by_version() {
        let packet = v3::PublishPacket::new("t", QoS::AtMostOnce, b"p").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let parsed = GenericPacket::parse(ProtocolVersion::V311, &buf).unwrap();
        assert_eq!(parsed, GenericPacket::V3(v3::Packet::Publish(packet)));

        let packet = v5::PublishAckPacket::new(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let parsed = GenericPacket::parse(ProtocolVersion::V5, &buf).unwrap();
        assert_eq!(parsed, GenericPacket::V5(v5::Packet::PublishAck(packet)));
    }
}
