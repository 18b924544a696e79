// src/engine/keyspace.rs

//! # Keyspace
//!
//! Owns every stored key: `key -> (Value, optional absolute expiry)`.
//!
//! Expiry is enforced twice:
//! - lazily, every accessor first drops the key if its instant has passed, so
//!   nothing ever observes an expired entry;
//! - actively, `sweep_expired` pops overdue keys off an ordered index (driven
//!   by `expire::start_cleaner`).
//!
//! The optional journal records the state a key had before its first
//! mutation, so a whole script run can be undone with `rollback_journal`.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::types::{Value, ValueKind};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Result of a TTL lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Absent,
    NoExpiry,
    Remaining(Duration),
}

#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<Vec<u8>, Entry>,
    expiry_index: BTreeSet<(Instant, Vec<u8>)>,
    journal: Option<HashMap<Vec<u8>, Option<Entry>>>,
    expired: u64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.purge_if_expired(key, Instant::now());
        self.entries.get(key).map(|e| &e.value)
    }

    /// Mutable access to an existing value. The expiry is left alone.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.purge_if_expired(key, Instant::now());
        if !self.entries.contains_key(key) {
            return None;
        }
        self.record(key);
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Mutable access, creating the value with `default` when the key is absent.
    pub fn get_or_insert_with(&mut self, key: &[u8], default: impl FnOnce() -> Value) -> &mut Value {
        self.purge_if_expired(key, Instant::now());
        self.record(key);
        &mut self
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| Entry { value: default(), expires_at: None })
            .value
    }

    /// Overwrite `key`. `expires_at = None` clears any previous expiry.
    pub fn set(&mut self, key: &[u8], value: Value, expires_at: Option<Instant>) {
        self.record(key);
        self.remove_entry(key);
        self.insert_entry(key.to_vec(), Entry { value, expires_at });
    }

    /// Overwrite the value but keep the current expiry, if any.
    pub fn set_keep_ttl(&mut self, key: &[u8], value: Value) {
        self.purge_if_expired(key, Instant::now());
        self.record(key);
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => self.insert_entry(key.to_vec(), Entry { value, expires_at: None }),
        }
    }

    /// Returns `true` if a live entry was removed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.purge_if_expired(key, Instant::now());
        if !self.entries.contains_key(key) {
            return false;
        }
        self.record(key);
        self.remove_entry(key);
        true
    }

    /// Move the entry at `from`, expiry included, to `to`, replacing whatever
    /// `to` held. Returns `false` if `from` does not exist.
    pub fn rename(&mut self, from: &[u8], to: &[u8]) -> bool {
        let now = Instant::now();
        self.purge_if_expired(from, now);
        if !self.entries.contains_key(from) {
            return false;
        }
        if from == to {
            return true;
        }
        self.purge_if_expired(to, now);
        self.record(from);
        self.record(to);
        let Some(entry) = self.remove_entry(from) else {
            return false;
        };
        self.remove_entry(to);
        self.insert_entry(to.to_vec(), entry);
        true
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn kind(&mut self, key: &[u8]) -> Option<ValueKind> {
        self.get(key).map(Value::kind)
    }

    /// Set an absolute expiry. An instant already in the past deletes the key.
    /// Returns `false` if the key does not exist.
    pub fn expire_at(&mut self, key: &[u8], at: Instant) -> bool {
        let now = Instant::now();
        self.purge_if_expired(key, now);
        if !self.entries.contains_key(key) {
            return false;
        }
        self.record(key);
        let Some(mut entry) = self.remove_entry(key) else {
            return false;
        };
        if at <= now {
            self.expired += 1;
            return true;
        }
        entry.expires_at = Some(at);
        self.insert_entry(key.to_vec(), entry);
        true
    }

    /// Drop the expiry of `key`. Returns `true` if one was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.purge_if_expired(key, Instant::now());
        match self.entries.get(key) {
            Some(entry) if entry.expires_at.is_some() => {}
            _ => return false,
        }
        self.record(key);
        if let Some(mut entry) = self.remove_entry(key) {
            entry.expires_at = None;
            self.insert_entry(key.to_vec(), entry);
        }
        true
    }

    pub fn ttl(&mut self, key: &[u8]) -> Ttl {
        let now = Instant::now();
        self.purge_if_expired(key, now);
        match self.entries.get(key) {
            None => Ttl::Absent,
            Some(Entry { expires_at: None, .. }) => Ttl::NoExpiry,
            Some(Entry { expires_at: Some(at), .. }) => Ttl::Remaining(at.saturating_duration_since(now)),
        }
    }

    /// Remove a collection that has become empty.
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        let empty = self.entries.get(key).is_some_and(|e| e.value.is_empty_collection());
        if empty {
            self.record(key);
            self.remove_entry(key);
        }
    }

    /// Clear every entry unconditionally.
    pub fn flush(&mut self) {
        match self.journal.as_mut() {
            Some(journal) => {
                for (key, entry) in self.entries.drain() {
                    journal.entry(key).or_insert(Some(entry));
                }
            }
            None => self.entries.clear(),
        }
        self.expiry_index.clear();
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        let now = Instant::now();
        let mut keys: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of live keys. Overdue entries still waiting for eviction are not counted.
    pub fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.overdue(Instant::now()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live keys carrying an expiry.
    pub fn volatile_len(&self) -> usize {
        self.expiry_index.len().saturating_sub(self.overdue(Instant::now()))
    }

    // expiry_index 按截止时间排序，过期的一定在最前面
    fn overdue(&self, now: Instant) -> usize {
        self.expiry_index.iter().take_while(|(at, _)| *at <= now).count()
    }

    /// Total keys evicted by expiry since creation.
    pub fn expired_count(&self) -> u64 {
        self.expired
    }

    /// Evict at most `limit` overdue keys, oldest deadline first.
    pub fn sweep_expired(&mut self, limit: usize) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        while removed < limit {
            match self.expiry_index.first() {
                Some((at, _)) if *at <= now => {}
                _ => break,
            }
            let Some((_, key)) = self.expiry_index.pop_first() else {
                break;
            };
            self.record(&key);
            self.entries.remove(&key);
            removed += 1;
        }
        self.expired += removed as u64;
        removed
    }

    pub fn begin_journal(&mut self) {
        self.journal = Some(HashMap::new());
    }

    pub fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Restore every journalled key to its pre-journal state.
    /// A prior value whose deadline passed meanwhile stays gone.
    /// Returns the number of keys restored.
    pub fn rollback_journal(&mut self) -> usize {
        let Some(journal) = self.journal.take() else {
            return 0;
        };
        let now = Instant::now();
        let restored = journal.len();
        for (key, prior) in journal {
            self.remove_entry(&key);
            match prior {
                Some(entry) if entry.is_expired(now) => self.expired += 1,
                Some(entry) => self.insert_entry(key, entry),
                None => {}
            }
        }
        restored
    }

    fn purge_if_expired(&mut self, key: &[u8], now: Instant) -> bool {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            self.record(key);
            self.remove_entry(key);
            self.expired += 1;
            trace!(key = %String::from_utf8_lossy(key), "lazily expired");
        }
        expired
    }

    fn record(&mut self, key: &[u8]) {
        if let Some(journal) = self.journal.as_mut() {
            if !journal.contains_key(key) {
                journal.insert(key.to_vec(), self.entries.get(key).cloned());
            }
        }
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if let Some(at) = entry.expires_at {
            self.expiry_index.remove(&(at, key.to_vec()));
        }
        Some(entry)
    }

    fn insert_entry(&mut self, key: Vec<u8>, entry: Entry) {
        if let Some(at) = entry.expires_at {
            self.expiry_index.insert((at, key.clone()));
        }
        self.entries.insert(key, entry);
    }
}
