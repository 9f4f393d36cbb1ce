// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The in-flight store: sent QoS>0 PUBLISH packets awaiting
//! acknowledgement, and sent PUBRELs awaiting PUBCOMP.
//!
//! Entries keep insertion order; a session-present reconnect replays them
//! in that order, PUBLISH entries with DUP set and PUBREL entries
//! unchanged.

use codec::{v3, v5, GenericPacket, PacketId};
use tokio::time::Instant;

/// What a stored packet is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// PUBLISH QoS 1, waiting for PUBACK.
    PublishQos1,

    /// PUBLISH QoS 2, waiting for PUBREC.
    PublishQos2,

    /// PUBREL, waiting for PUBCOMP.
    Pubrel,
}

/// One stored outbound packet.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub packet_id: PacketId,
    pub kind: StoreKind,
    pub packet: GenericPacket,

    /// Absolute deadline from the Message Expiry Interval; an expired
    /// entry is dropped instead of replayed.
    pub expire_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct InflightStore {
    entries: Vec<StoredEntry>,
}

impl InflightStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: StoredEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn contains(&self, packet_id: PacketId, kind: StoreKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.packet_id == packet_id && e.kind == kind)
    }

    /// Remove the PUBLISH entry for `packet_id`, regardless of its `QoS`.
    /// Returns whether an entry was removed.
    pub fn remove_publish(&mut self, packet_id: PacketId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| {
            e.packet_id != packet_id
                || !matches!(e.kind, StoreKind::PublishQos1 | StoreKind::PublishQos2)
        });
        self.entries.len() != before
    }

    /// Remove the PUBREL entry for `packet_id`. Returns whether an entry
    /// was removed.
    pub fn remove_pubrel(&mut self, packet_id: PacketId) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.packet_id != packet_id || e.kind != StoreKind::Pubrel);
        self.entries.len() != before
    }

    /// Packets to resend after a session-present reconnect, in insertion
    /// order. Expired PUBLISH entries are dropped; their packet ids are
    /// returned so the caller can release them.
    pub fn replay_packets(&mut self, now: Instant) -> (Vec<GenericPacket>, Vec<PacketId>) {
        let mut expired = Vec::new();
        self.entries.retain(|entry| {
            let keep = entry.expire_at.map_or(true, |deadline| deadline > now);
            if !keep {
                expired.push(entry.packet_id);
            }
            keep
        });

        let packets = self
            .entries
            .iter()
            .map(|entry| {
                let mut packet = entry.packet.clone();
                if matches!(entry.kind, StoreKind::PublishQos1 | StoreKind::PublishQos2) {
                    mark_dup(&mut packet);
                }
                packet
            })
            .collect();
        (packets, expired)
    }

    /// Move every entry out, for session persistence across connections.
    pub fn take_all(&mut self) -> Vec<StoredEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Restore persisted entries, replacing the current content.
    pub fn restore(&mut self, entries: Vec<StoredEntry>) {
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Packet ids of every stored entry, in insertion order.
    #[must_use]
    pub fn packet_ids(&self) -> Vec<PacketId> {
        self.entries.iter().map(|e| e.packet_id).collect()
    }
}

fn mark_dup(packet: &mut GenericPacket) {
    match packet {
        GenericPacket::V3(v3::Packet::Publish(p)) => {
            let _ret = p.set_dup(true);
        }
        GenericPacket::V5(v5::Packet::Publish(p)) => {
            let _ret = p.set_dup(true);
        }
        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use std::time::Duration;

    fn qos2_entry(id: u16) -> StoredEntry {
        let mut packet = v3::PublishPacket::new("t", QoS::ExactOnce, b"p").unwrap();
        packet.set_packet_id(PacketId::new(id));
        StoredEntry {
            packet_id: PacketId::new(id),
            kind: StoreKind::PublishQos2,
            packet: GenericPacket::V3(v3::Packet::Publish(packet)),
            expire_at: None,
        }
    }

    #[test]
    fn test_replay_marks_dup_and_keeps_order() {
        let mut store = InflightStore::new();
        store.push(qos2_entry(1));
        store.push(qos2_entry(2));

        let (packets, expired) = store.replay_packets(Instant::now());
        assert!(expired.is_empty());
        assert_eq!(packets.len(), 2);
        for (index, packet) in packets.iter().enumerate() {
            let GenericPacket::V3(v3::Packet::Publish(p)) = packet else {
                panic!("expected publish");
            };
            assert!(p.dup());
            assert_eq!(p.packet_id(), PacketId::new(index as u16 + 1));
        }
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let mut store = InflightStore::new();
        let mut entry = qos2_entry(9);
        entry.expire_at = Some(Instant::now() - Duration::from_secs(1));
        store.push(entry);
        store.push(qos2_entry(10));

        let (packets, expired) = store.replay_packets(Instant::now());
        assert_eq!(expired, vec![PacketId::new(9)]);
        assert_eq!(packets.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_by_kind() {
        let mut store = InflightStore::new();
        store.push(qos2_entry(3));
        assert!(!store.remove_pubrel(PacketId::new(3)));
        assert!(store.remove_publish(PacketId::new(3)));
        assert!(store.is_empty());
    }
}
