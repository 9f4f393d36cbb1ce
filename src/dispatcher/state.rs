// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::{HashMap, HashSet, VecDeque};

use codec::v5;
use tokio::sync::mpsc::Sender;
use tokio::time::Instant;

use crate::commands::{Delivery, DispatcherToSessionCmd};
use crate::types::{SessionGid, SessionKey, WillMessage};

/// One subscription of a session, keyed by its full filter string
/// (share prefix included).
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub options: v5::SubscribeOptions,
    pub subscription_id: Option<usize>,
    pub shared: bool,
}

/// Broker-side state of one session, surviving across connections while
/// the session expiry allows.
#[derive(Debug)]
pub struct SessionState {
    pub key: SessionKey,

    /// Seconds; zero discards the session at disconnect, `u32::MAX` keeps
    /// it forever.
    pub session_expiry: u32,

    pub will: Option<WillMessage>,

    /// Armed while the session is offline and a will with a delay is
    /// pending.
    pub will_deadline: Option<Instant>,

    /// Armed while the session is offline and expiry is finite.
    pub expire_deadline: Option<Instant>,

    pub subscriptions: HashMap<String, SubscriptionEntry>,

    /// Durable protocol state parked between connections.
    pub inflight: Vec<crate::engine::StoredEntry>,
    pub pub_recv: HashSet<u16>,

    /// Messages queued while offline, drained FIFO at the next bind.
    pub offline: VecDeque<Delivery>,

    /// Currently bound connection, if any.
    pub bound: Option<(SessionGid, Sender<DispatcherToSessionCmd>)>,

    pub response_topic_prefix: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn new(key: SessionKey, session_expiry: u32, will: Option<WillMessage>) -> Self {
        Self {
            key,
            session_expiry,
            will,
            will_deadline: None,
            expire_deadline: None,
            subscriptions: HashMap::new(),
            inflight: Vec::new(),
            pub_recv: HashSet::new(),
            offline: VecDeque::new(),
            bound: None,
            response_topic_prefix: None,
        }
    }

    /// Queue a delivery for the next bind, dropping the oldest entry when
    /// the bound is reached. `limit` zero means unbounded.
    pub fn push_offline(&mut self, delivery: Delivery, limit: usize) {
        if limit > 0 && self.offline.len() >= limit {
            let _dropped = self.offline.pop_front();
            log::warn!(
                "session state {:?}: offline queue full, dropping oldest",
                self.key
            );
        }
        self.offline.push_back(delivery);
    }
}
