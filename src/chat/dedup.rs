use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

use crate::messages::CanonicalMessage;

pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

/// Bounded set of message keys. When full, the oldest entries are evicted
/// until only the most recent 80% of capacity remains.
#[derive(Debug, Clone)]
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Record `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);

        if self.order.len() > self.capacity {
            let retain = (self.capacity * 4 / 5).max(1);
            let evict = self.order.len() - retain;
            for old in self.order.drain(..evict) {
                self.keys.remove(&old);
            }
            tracing::debug!(evicted = evict, retained = retain, "dedup cache trimmed");
        }
        true
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.keys.clear();
    }
}

pub fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

pub fn compose_key(id: &str, sender: Option<&str>, recipient: Option<&str>, fingerprint: u64) -> String {
    format!(
        "{id}|{}|{}|{fingerprint:016x}",
        sender.unwrap_or_default(),
        recipient.unwrap_or_default()
    )
}

/// Stable key for a message: id, route, and a fingerprint of its content.
pub fn message_key(message: &CanonicalMessage) -> String {
    let content = serde_json::to_string(&message.content).unwrap_or_default();
    compose_key(
        &message.id,
        message.sender.as_deref(),
        message.recipient.as_deref(),
        fingerprint(&content),
    )
}
