// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Shared subscription table.
//!
//! `$share/<group>/<filter>` subscriptions register here instead of the
//! trie. Each matching publish goes to exactly one member of the group,
//! selected round robin over the insertion-ordered member list.

use std::collections::HashMap;

use codec::TopicFilter;

use crate::types::SessionKey;

/// (group, plain filter) pair identifying one share group.
pub type ShareKey = (String, String);

/// One member of a share group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub key: SessionKey,

    /// The full `$share/...` filter string the member subscribed with.
    pub full_filter: String,
}

#[derive(Debug)]
struct SharedGroup {
    filter: TopicFilter,
    members: Vec<Member>,
    next: usize,
}

#[derive(Debug, Default)]
pub struct SharedSubscriptions {
    groups: HashMap<ShareKey, SharedGroup>,
}

impl SharedSubscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member; re-subscribing keeps its round robin position.
    pub fn insert(&mut self, filter: &TopicFilter, member: Member) {
        let Some(group_name) = filter.share() else {
            return;
        };
        let share_key = (group_name.to_string(), filter.as_str().to_string());
        let group = self.groups.entry(share_key).or_insert_with(|| SharedGroup {
            filter: filter.clone(),
            members: Vec::new(),
            next: 0,
        });
        if !group.members.contains(&member) {
            group.members.push(member);
        }
    }

    /// Remove one member; the group disappears with its last member.
    pub fn remove(&mut self, filter: &TopicFilter, key: &SessionKey) {
        let Some(group_name) = filter.share() else {
            return;
        };
        let share_key = (group_name.to_string(), filter.as_str().to_string());
        if let Some(group) = self.groups.get_mut(&share_key) {
            group.members.retain(|m| m.key != *key);
            if group.members.is_empty() {
                self.groups.remove(&share_key);
            } else if group.next >= group.members.len() {
                group.next = 0;
            }
        }
    }

    /// Remove a session from every group.
    pub fn remove_session(&mut self, key: &SessionKey) {
        self.groups.retain(|_share_key, group| {
            group.members.retain(|m| m.key != *key);
            if group.next >= group.members.len() {
                group.next = 0;
            }
            !group.members.is_empty()
        });
    }

    /// Share keys of every group whose filter matches `topic`.
    #[must_use]
    pub fn matching_groups(&self, topic: &str) -> Vec<ShareKey> {
        self.groups
            .iter()
            .filter(|(_share_key, group)| group.filter.is_match(topic))
            .map(|(share_key, _group)| share_key.clone())
            .collect()
    }

    /// Current members and round robin cursor of one group.
    #[must_use]
    pub fn members(&self, share_key: &ShareKey) -> Option<(Vec<Member>, usize)> {
        self.groups
            .get(share_key)
            .map(|group| (group.members.clone(), group.next))
    }

    /// Advance the round robin cursor past the selected member index.
    pub fn advance(&mut self, share_key: &ShareKey, selected: usize) {
        if let Some(group) = self.groups.get_mut(share_key) {
            if !group.members.is_empty() {
                group.next = (selected + 1) % group.members.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> SessionKey {
        SessionKey::new(String::new(), name.to_string())
    }

    fn member(name: &str) -> Member {
        Member {
            key: key(name),
            full_filter: "$share/g1/topic1".to_string(),
        }
    }

    #[test]
    fn test_round_robin_order() {
        let mut shared = SharedSubscriptions::new();
        let filter = TopicFilter::parse("$share/g1/topic1").unwrap();
        shared.insert(&filter, member("s1"));
        shared.insert(&filter, member("s2"));
        shared.insert(&filter, member("s3"));

        let groups = shared.matching_groups("topic1");
        assert_eq!(groups.len(), 1);
        let share_key = groups[0].clone();

        let mut order = Vec::new();
        for _ in 0..6 {
            let (members, next) = shared.members(&share_key).unwrap();
            order.push(members[next].key.client_id.clone());
            shared.advance(&share_key, next);
        }
        assert_eq!(order, vec!["s1", "s2", "s3", "s1", "s2", "s3"]);
    }

    #[test]
    fn test_remove_member_keeps_cursor_valid() {
        let mut shared = SharedSubscriptions::new();
        let filter = TopicFilter::parse("$share/g1/t").unwrap();
        shared.insert(&filter, member("s1"));
        shared.insert(&filter, member("s2"));
        let share_key = ("g1".to_string(), "t".to_string());
        shared.advance(&share_key, 1);
        shared.remove(&filter, &key("s2"));
        let (members, next) = shared.members(&share_key).unwrap();
        assert_eq!(members.len(), 1);
        assert!(next < members.len());

        shared.remove(&filter, &key("s1"));
        assert!(shared.members(&share_key).is_none());
    }

    #[test]
    fn test_shared_filter_does_not_match_share_prefix_topic() {
        let mut shared = SharedSubscriptions::new();
        let filter = TopicFilter::parse("$share/g1/a/+").unwrap();
        shared.insert(&filter, member("s1"));
        assert_eq!(shared.matching_groups("a/1").len(), 1);
        assert!(shared.matching_groups("b/1").is_empty());
    }
}
