// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained message store.
//!
//! The last retained message per topic, with per-message expiry. Expired
//! entries are purged lazily at lookup and by a periodic sweep, so they
//! are never delivered.

use std::collections::HashMap;

use codec::TopicFilter;
use tokio::time::Instant;

use crate::types::PublishMessage;

#[derive(Debug, Default)]
pub struct RetainStore {
    map: HashMap<String, PublishMessage>,
}

impl RetainStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Apply a retained publish: a zero-byte payload clears the slot
    /// [MQTT-3.3.1-6], anything else replaces it [MQTT-3.3.1-5].
    pub fn update(&mut self, message: &PublishMessage) {
        if message.payload.is_empty() {
            self.map.remove(&message.topic);
        } else {
            self.map.insert(message.topic.clone(), message.clone());
        }
    }

    /// Retained messages matching `filter`, expired entries purged first.
    #[must_use]
    pub fn matches(&mut self, filter: &TopicFilter, now: Instant) -> Vec<PublishMessage> {
        self.map.retain(|_topic, message| !message.is_expired(now));
        let mut matched: Vec<PublishMessage> = self
            .map
            .values()
            .filter(|message| filter.is_match(&message.topic))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.topic.cmp(&b.topic));
        matched
    }

    /// Drop every expired entry.
    pub fn sweep(&mut self, now: Instant) {
        self.map.retain(|_topic, message| !message.is_expired(now));
    }
}
