// src/pubsub.rs

//! # Pub/Sub broker
//!
//! Channel and pattern subscriptions, each mapping to the sessions that hold
//! them. Delivery goes into every subscriber's bounded inbox with `try_send`:
//! the publisher never waits, and a full inbox drops the message for that one
//! subscriber only. Each inbox is FIFO, so a subscriber sees messages in the
//! order they were published.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::Reply;
use crate::engine::session::SessionId;
use crate::glob::glob_match;

/// An unsolicited message pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Message {
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
    PMessage {
        pattern: Vec<u8>,
        channel: Vec<u8>,
        payload: Vec<u8>,
    },
}

impl PushMessage {
    pub fn channel(&self) -> &[u8] {
        match self {
            PushMessage::Message { channel, .. } | PushMessage::PMessage { channel, .. } => channel,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            PushMessage::Message { payload, .. } | PushMessage::PMessage { payload, .. } => payload,
        }
    }

    /// `["message", channel, payload]` / `["pmessage", pattern, channel, payload]`
    pub fn into_reply(self) -> Reply {
        match self {
            PushMessage::Message { channel, payload } => Reply::Array(vec![
                Reply::bulk("message"),
                Reply::Bulk(channel),
                Reply::Bulk(payload),
            ]),
            PushMessage::PMessage { pattern, channel, payload } => Reply::Array(vec![
                Reply::bulk("pmessage"),
                Reply::Bulk(pattern),
                Reply::Bulk(channel),
                Reply::Bulk(payload),
            ]),
        }
    }
}

/// The broker's handle on one session's inbox.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SessionId,
    tx: mpsc::Sender<PushMessage>,
}

impl Subscriber {
    pub fn new(id: SessionId, tx: mpsc::Sender<PushMessage>) -> Self {
        Self { id, tx }
    }
}

type Registry = DashMap<Vec<u8>, HashMap<SessionId, Subscriber>>;

#[derive(Debug, Default)]
pub struct Broker {
    channels: Registry,
    patterns: Registry,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is a new subscription for the session.
    pub fn subscribe(&self, channel: &[u8], sub: &Subscriber) -> bool {
        add(&self.channels, channel, sub)
    }

    pub fn unsubscribe(&self, channel: &[u8], id: SessionId) -> bool {
        remove(&self.channels, channel, id)
    }

    pub fn psubscribe(&self, pattern: &[u8], sub: &Subscriber) -> bool {
        add(&self.patterns, pattern, sub)
    }

    pub fn punsubscribe(&self, pattern: &[u8], id: SessionId) -> bool {
        remove(&self.patterns, pattern, id)
    }

    /// Drop every subscription a session holds. Called when the session goes away.
    pub fn remove_subscriber<'a>(
        &self,
        id: SessionId,
        channels: impl IntoIterator<Item = &'a Vec<u8>>,
        patterns: impl IntoIterator<Item = &'a Vec<u8>>,
    ) {
        for channel in channels {
            remove(&self.channels, channel, id);
        }
        for pattern in patterns {
            remove(&self.patterns, pattern, id);
        }
    }

    /// Deliver to everyone subscribed right now. Returns how many inboxes
    /// accepted the message; dropped deliveries are not counted.
    pub fn publish(&self, channel: &[u8], payload: &[u8]) -> usize {
        let mut count = 0;
        if let Some(subs) = self.channels.get(channel) {
            for sub in subs.values() {
                let msg = PushMessage::Message {
                    channel: channel.to_vec(),
                    payload: payload.to_vec(),
                };
                if self.deliver(sub, msg) {
                    count += 1;
                }
            }
        }
        for entry in self.patterns.iter() {
            if !glob_match(entry.key(), channel) {
                continue;
            }
            for sub in entry.value().values() {
                let msg = PushMessage::PMessage {
                    pattern: entry.key().clone(),
                    channel: channel.to_vec(),
                    payload: payload.to_vec(),
                };
                if self.deliver(sub, msg) {
                    count += 1;
                }
            }
        }
        debug!(channel = %String::from_utf8_lossy(channel), receivers = count, "published");
        count
    }

    fn deliver(&self, sub: &Subscriber, msg: PushMessage) -> bool {
        match sub.tx.try_send(msg) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session = sub.id,
                    channel = %String::from_utf8_lossy(msg.channel()),
                    "subscriber inbox full, message dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Active channels (at least one subscriber), optionally filtered by a glob.
    pub fn channels(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        let names: BTreeSet<Vec<u8>> = self
            .channels
            .iter()
            .filter(|e| !e.value().is_empty())
            .filter(|e| pattern.is_none_or(|p| glob_match(p, e.key())))
            .map(|e| e.key().clone())
            .collect();
        names.into_iter().collect()
    }

    pub fn numsub(&self, channel: &[u8]) -> usize {
        self.channels.get(channel).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of distinct patterns with at least one subscriber.
    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn add(registry: &Registry, name: &[u8], sub: &Subscriber) -> bool {
    registry
        .entry(name.to_vec())
        .or_default()
        .insert(sub.id, sub.clone())
        .is_none()
}

fn remove(registry: &Registry, name: &[u8], id: SessionId) -> bool {
    let (removed, now_empty) = match registry.get_mut(name) {
        Some(mut subs) => {
            let removed = subs.remove(&id).is_some();
            (removed, subs.is_empty())
        }
        None => (false, false),
    };
    if now_empty {
        registry.remove_if(name, |_, subs| subs.is_empty());
    }
    removed
}
