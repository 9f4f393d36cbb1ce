// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The dispatcher actor owns every piece of broker-wide state: the
//! session index, the subscription trie, the shared subscription table
//! and the retained store. Sessions talk to it over one mpsc queue, which
//! serializes all mutation; index lookups complete before any delivery is
//! dispatched to a session channel.

mod retain;
mod shared;
mod state;
mod trie;

pub use retain::RetainStore;
pub use shared::{Member, SharedSubscriptions, ShareKey};
pub use state::{SessionState, SubscriptionEntry};
pub use trie::{SubTrie, Subscriber};

use std::collections::HashMap;
use std::time::Duration;

use codec::{v5, PacketId, QoS, TopicFilter};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{sleep_until, Instant};

use crate::commands::{
    ConnectContext, Delivery, DispatcherToSessionCmd, SessionToDispatcherCmd, SubscribeEntry,
};
use crate::engine::SessionPersistState;
use crate::types::{DisconnectReason, PublishMessage, SessionGid, SessionKey};

const RETAIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The message router and session registry.
#[derive(Debug)]
pub struct Dispatcher {
    receiver: Receiver<SessionToDispatcherCmd>,

    sessions: HashMap<SessionKey, SessionState>,
    bound: HashMap<SessionGid, SessionKey>,

    trie: SubTrie,
    retained: RetainStore,
    shared: SharedSubscriptions,

    /// Offline queue bound per session; zero means unbounded.
    max_offline_messages: usize,

    next_retain_sweep: Instant,
}

impl Dispatcher {
    #[must_use]
    pub fn new(receiver: Receiver<SessionToDispatcherCmd>, max_offline_messages: usize) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            bound: HashMap::new(),
            trie: SubTrie::new(),
            retained: RetainStore::new(),
            shared: SharedSubscriptions::new(),
            max_offline_messages,
            next_retain_sweep: Instant::now() + RETAIN_SWEEP_INTERVAL,
        }
    }

    pub async fn run_loop(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_session_cmd(cmd).await,
                    None => break,
                },
                () = sleep_until(deadline) => self.fire_timers().await,
            }
        }
        log::info!("dispatcher: all listeners gone, shutting down");
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = self.next_retain_sweep;
        for state in self.sessions.values() {
            if let Some(will_deadline) = state.will_deadline {
                deadline = deadline.min(will_deadline);
            }
            if let Some(expire_deadline) = state.expire_deadline {
                deadline = deadline.min(expire_deadline);
            }
        }
        deadline
    }

    async fn handle_session_cmd(&mut self, cmd: SessionToDispatcherCmd) {
        match cmd {
            SessionToDispatcherCmd::Connect {
                gid,
                sender,
                context,
            } => self.on_connect(gid, sender, context).await,
            SessionToDispatcherCmd::Publish { gid, message } => {
                self.on_publish(gid, message).await;
            }
            SessionToDispatcherCmd::Subscribe {
                gid,
                packet_id,
                entries,
            } => self.on_subscribe(gid, packet_id, &entries).await,
            SessionToDispatcherCmd::Unsubscribe {
                gid,
                packet_id,
                filters,
            } => self.on_unsubscribe(gid, packet_id, &filters).await,
            SessionToDispatcherCmd::SessionClosed {
                gid,
                reason,
                state,
                session_expiry,
            } => self.on_session_closed(gid, reason, state, session_expiry).await,
        }
    }

    async fn on_connect(
        &mut self,
        gid: SessionGid,
        sender: Sender<DispatcherToSessionCmd>,
        context: ConnectContext,
    ) {
        let key = SessionKey::new(context.username.clone(), context.client_id.clone());

        // A live connection under the same id loses to the newcomer
        // [MQTT-3.1.4-3].
        if let Some(state) = self.sessions.get_mut(&key) {
            if let Some((old_gid, old_sender)) = state.bound.take() {
                self.bound.remove(&old_gid);
                log::info!("dispatcher: session {key:?} taken over, closing {old_gid:?}");
                if let Err(err) = old_sender.send(DispatcherToSessionCmd::Takeover).await {
                    log::warn!("dispatcher: takeover notice failed: {err}");
                }
            }
        }

        let mut pending_will = None;
        let session_present = if context.clean_start {
            if let Some(old) = self.sessions.remove(&key) {
                // A pending will fires when its session is renewed.
                self.purge_subscriptions(&old);
                if old.will_deadline.is_some() {
                    pending_will = old.will.map(|will| will.message);
                }
            }
            false
        } else {
            self.sessions.contains_key(&key)
        };

        let response_information = context
            .request_response_information
            .then(|| format!("corvid/reply/{}/", context.client_id));

        let reply = if session_present {
            let Some(state) = self.sessions.get_mut(&key) else {
                return;
            };
            state.session_expiry = context.session_expiry;
            state.will = context.will;
            state.will_deadline = None;
            state.expire_deadline = None;
            state.bound = Some((gid, sender.clone()));
            state.response_topic_prefix = response_information.clone();

            let resumed = SessionPersistState {
                inflight: std::mem::take(&mut state.inflight),
                pub_recv: std::mem::take(&mut state.pub_recv),
            };
            let now = Instant::now();
            let pending: Vec<Delivery> = state
                .offline
                .drain(..)
                .filter(|delivery| !delivery.message.is_expired(now))
                .collect();
            DispatcherToSessionCmd::ConnectAck {
                session_present: true,
                resumed: Some(resumed),
                pending,
                response_information,
            }
        } else {
            let mut state = SessionState::new(key.clone(), context.session_expiry, context.will);
            state.bound = Some((gid, sender.clone()));
            state.response_topic_prefix = response_information.clone();
            self.sessions.insert(key.clone(), state);
            DispatcherToSessionCmd::ConnectAck {
                session_present: false,
                resumed: None,
                pending: Vec::new(),
                response_information,
            }
        };

        self.bound.insert(gid, key);
        if let Err(err) = sender.send(reply).await {
            log::error!("dispatcher: connect reply failed: {err}");
        }

        if let Some(message) = pending_will {
            self.route_message(None, &message).await;
        }
    }

    async fn on_publish(&mut self, gid: SessionGid, message: PublishMessage) {
        let publisher = self.bound.get(&gid).cloned();
        if message.retain {
            self.retained.update(&message);
        }
        self.route_message(publisher.as_ref(), &message).await;
    }

    /// Fan a message out to every matching subscriber. All index lookups
    /// complete before the first channel send.
    async fn route_message(&mut self, publisher: Option<&SessionKey>, message: &PublishMessage) {
        let now = Instant::now();
        if message.is_expired(now) {
            return;
        }

        let mut outbox: Vec<(SessionKey, Delivery)> = Vec::new();

        // Non-shared subscriptions; overlapping filters of one session
        // collapse into a single delivery carrying every subscription
        // identifier [MQTT-3.3.4-4].
        let mut per_session: HashMap<SessionKey, Vec<String>> = HashMap::new();
        for subscriber in self.trie.matches(&message.topic) {
            per_session
                .entry(subscriber.key)
                .or_default()
                .push(subscriber.filter);
        }
        for (key, filters) in per_session {
            let Some(state) = self.sessions.get(&key) else {
                continue;
            };
            let mut effective_qos: Option<QoS> = None;
            let mut retain = false;
            let mut subscription_ids = Vec::new();
            for filter in filters {
                let Some(entry) = state.subscriptions.get(&filter) else {
                    continue;
                };
                if entry.options.no_local && publisher == Some(&key) {
                    continue;
                }
                let qos = message.qos.min(entry.options.qos);
                effective_qos = Some(effective_qos.map_or(qos, |q| q.max(qos)));
                if entry.options.retain_as_published && message.retain {
                    retain = true;
                }
                if let Some(id) = entry.subscription_id {
                    subscription_ids.push(id);
                }
            }
            if let Some(qos) = effective_qos {
                outbox.push((
                    key,
                    Delivery {
                        message: message.clone(),
                        qos,
                        retain,
                        subscription_ids,
                    },
                ));
            }
        }

        // Shared subscriptions: one member per group, round robin,
        // preferring online members.
        for share_key in self.shared.matching_groups(&message.topic) {
            let Some((members, next)) = self.shared.members(&share_key) else {
                continue;
            };
            let len = members.len();
            let mut chosen = None;
            let mut fallback = None;
            for i in 0..len {
                let idx = (next + i) % len;
                let member = &members[idx];
                let Some(state) = self.sessions.get(&member.key) else {
                    continue;
                };
                let Some(entry) = state.subscriptions.get(&member.full_filter) else {
                    continue;
                };
                if entry.options.no_local && publisher == Some(&member.key) {
                    continue;
                }
                if state.bound.is_some() {
                    chosen = Some(idx);
                    break;
                }
                if fallback.is_none()
                    && state.session_expiry > 0
                    && message.qos != QoS::AtMostOnce
                {
                    fallback = Some(idx);
                }
            }
            if let Some(idx) = chosen.or(fallback) {
                let member = &members[idx];
                let Some(state) = self.sessions.get(&member.key) else {
                    continue;
                };
                let Some(entry) = state.subscriptions.get(&member.full_filter) else {
                    continue;
                };
                let qos = message.qos.min(entry.options.qos);
                let retain = entry.options.retain_as_published && message.retain;
                let subscription_ids = entry.subscription_id.into_iter().collect();
                outbox.push((
                    member.key.clone(),
                    Delivery {
                        message: message.clone(),
                        qos,
                        retain,
                        subscription_ids,
                    },
                ));
                self.shared.advance(&share_key, idx);
            }
        }

        for (key, delivery) in outbox {
            self.deliver_to(&key, delivery).await;
        }
    }

    async fn deliver_to(&mut self, key: &SessionKey, delivery: Delivery) {
        let Some(state) = self.sessions.get_mut(key) else {
            return;
        };
        if let Some((_gid, sender)) = &state.bound {
            if let Err(err) = sender.send(DispatcherToSessionCmd::Publish(delivery)).await {
                log::warn!("dispatcher: delivery to {key:?} failed: {err}");
            }
        } else if state.session_expiry > 0 && delivery.qos != QoS::AtMostOnce {
            state.push_offline(delivery, self.max_offline_messages);
        }
    }

    async fn on_subscribe(
        &mut self,
        gid: SessionGid,
        packet_id: PacketId,
        entries: &[SubscribeEntry],
    ) {
        let Some(key) = self.bound.get(&gid).cloned() else {
            log::warn!("dispatcher: subscribe from unknown session {gid:?}");
            return;
        };
        let now = Instant::now();
        let mut reason_codes = Vec::with_capacity(entries.len());
        let mut retained_deliveries = Vec::new();

        {
            let Self {
                sessions,
                trie,
                retained,
                shared,
                ..
            } = self;
            let Some(state) = sessions.get_mut(&key) else {
                return;
            };
            for entry in entries {
                if !entry.allowed {
                    reason_codes.push(v5::ReasonCode::NotAuthorized);
                    continue;
                }
                let parsed = match TopicFilter::parse(&entry.filter) {
                    Ok(parsed) => parsed,
                    Err(_err) => {
                        reason_codes.push(v5::ReasonCode::TopicFilterInvalid);
                        continue;
                    }
                };

                let existed = state.subscriptions.contains_key(&entry.filter);
                state.subscriptions.insert(
                    entry.filter.clone(),
                    SubscriptionEntry {
                        options: entry.options,
                        subscription_id: entry.subscription_id,
                        shared: parsed.is_shared(),
                    },
                );

                if parsed.is_shared() {
                    shared.insert(
                        &parsed,
                        Member {
                            key: key.clone(),
                            full_filter: entry.filter.clone(),
                        },
                    );
                } else {
                    trie.insert(
                        &entry.filter,
                        Subscriber {
                            key: key.clone(),
                            filter: entry.filter.clone(),
                        },
                    );

                    let send_retained = match entry.options.retain_handling {
                        v5::RetainHandling::SendAtSubscribe => true,
                        v5::RetainHandling::SendAtNewSubscribe => !existed,
                        v5::RetainHandling::DoNotSend => false,
                    };
                    if send_retained {
                        for message in retained.matches(&parsed, now) {
                            let qos = message.qos.min(entry.options.qos);
                            retained_deliveries.push(Delivery {
                                message,
                                qos,
                                // Retained deliveries carry RETAIN=1.
                                retain: true,
                                subscription_ids: entry
                                    .subscription_id
                                    .into_iter()
                                    .collect(),
                            });
                        }
                    }
                }

                reason_codes.push(match entry.options.qos {
                    QoS::AtMostOnce => v5::ReasonCode::Success,
                    QoS::AtLeastOnce => v5::ReasonCode::GrantedQos1,
                    QoS::ExactOnce => v5::ReasonCode::GrantedQos2,
                });
            }
        }

        self.reply(
            &key,
            DispatcherToSessionCmd::SubscribeAck {
                packet_id,
                reason_codes,
                retained: retained_deliveries,
            },
        )
        .await;
    }

    async fn on_unsubscribe(&mut self, gid: SessionGid, packet_id: PacketId, filters: &[String]) {
        let Some(key) = self.bound.get(&gid).cloned() else {
            return;
        };
        let mut reason_codes = Vec::with_capacity(filters.len());
        {
            let Self {
                sessions,
                trie,
                shared,
                ..
            } = self;
            let Some(state) = sessions.get_mut(&key) else {
                return;
            };
            for filter in filters {
                match state.subscriptions.remove(filter) {
                    Some(entry) => {
                        if entry.shared {
                            if let Ok(parsed) = TopicFilter::parse(filter) {
                                shared.remove(&parsed, &key);
                            }
                        } else {
                            trie.remove(filter, &key);
                        }
                        reason_codes.push(v5::ReasonCode::Success);
                    }
                    None => reason_codes.push(v5::ReasonCode::NoSubscriptionExisted),
                }
            }
        }

        self.reply(
            &key,
            DispatcherToSessionCmd::UnsubscribeAck {
                packet_id,
                reason_codes,
            },
        )
        .await;
    }

    async fn reply(&self, key: &SessionKey, cmd: DispatcherToSessionCmd) {
        let sender = self
            .sessions
            .get(key)
            .and_then(|state| state.bound.as_ref())
            .map(|(_gid, sender)| sender.clone());
        if let Some(sender) = sender {
            if let Err(err) = sender.send(cmd).await {
                log::warn!("dispatcher: reply to {key:?} failed: {err}");
            }
        }
    }

    async fn on_session_closed(
        &mut self,
        gid: SessionGid,
        reason: DisconnectReason,
        persist: Option<SessionPersistState>,
        session_expiry: Option<u32>,
    ) {
        let Some(key) = self.bound.remove(&gid) else {
            // Already rebound by a takeover; nothing to retain here.
            return;
        };
        let mut fire_will = None;
        let mut purge = false;
        {
            let Some(state) = self.sessions.get_mut(&key) else {
                return;
            };
            match &state.bound {
                Some((bound_gid, _sender)) if *bound_gid == gid => state.bound = None,
                _ => return,
            }

            if let Some(expiry) = session_expiry {
                state.session_expiry = expiry;
            }
            if let Some(persist) = persist {
                state.inflight = persist.inflight;
                state.pub_recv = persist.pub_recv;
            }

            let now = Instant::now();
            match reason {
                DisconnectReason::Normal => {
                    // A clean disconnect discards the will [MQTT-3.14.4-3].
                    state.will = None;
                }
                DisconnectReason::WithWill
                | DisconnectReason::Abnormal
                | DisconnectReason::TakenOver => {
                    if state.will.is_some() {
                        // The will waits for min(will delay, session
                        // expiry) [MQTT-3.1.3-9].
                        let delay = state
                            .will
                            .as_ref()
                            .map_or(0, |will| will.delay)
                            .min(state.session_expiry);
                        if delay == 0 {
                            fire_will = state.will.take().map(|will| will.message);
                        } else {
                            state.will_deadline =
                                Some(now + Duration::from_secs(u64::from(delay)));
                        }
                    }
                }
            }

            if state.session_expiry == 0 {
                purge = true;
            } else if state.session_expiry != u32::MAX {
                state.expire_deadline =
                    Some(now + Duration::from_secs(u64::from(state.session_expiry)));
            }
        }

        if let Some(message) = fire_will {
            self.route_message(None, &message).await;
        }
        if purge {
            self.purge_session(&key);
        }
    }

    async fn fire_timers(&mut self) {
        let now = Instant::now();
        let mut will_messages = Vec::new();
        let mut to_purge = Vec::new();

        for (key, state) in &mut self.sessions {
            if state
                .will_deadline
                .map_or(false, |deadline| deadline <= now)
            {
                state.will_deadline = None;
                if let Some(will) = state.will.take() {
                    will_messages.push(will.message);
                }
            }
            if state
                .expire_deadline
                .map_or(false, |deadline| deadline <= now)
            {
                // An armed will fires no later than the session expiry.
                if let Some(will) = state.will.take() {
                    will_messages.push(will.message);
                }
                to_purge.push(key.clone());
            }
        }

        for message in will_messages {
            self.route_message(None, &message).await;
        }
        for key in to_purge {
            log::info!("dispatcher: session {key:?} expired");
            self.purge_session(&key);
        }

        if now >= self.next_retain_sweep {
            self.retained.sweep(now);
            self.next_retain_sweep = now + RETAIN_SWEEP_INTERVAL;
        }
    }

    fn purge_session(&mut self, key: &SessionKey) {
        if let Some(state) = self.sessions.remove(key) {
            self.purge_subscriptions(&state);
        }
    }

    fn purge_subscriptions(&mut self, state: &SessionState) {
        for (filter, entry) in &state.subscriptions {
            if entry.shared {
                if let Ok(parsed) = TopicFilter::parse(filter) {
                    self.shared.remove(&parsed, &state.key);
                }
            } else {
                self.trie.remove(filter, &state.key);
            }
        }
    }
}
