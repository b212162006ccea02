//! Response cache
//!
//! Bounded LRU store with a TTL per entry. A single mutex guards the store;
//! single-flight coordination lives in the executor.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

/// Identity of a cacheable call: server, tool or resource, and arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a tool call. Argument key order does not matter and `null`
    /// arguments equal `{}`.
    pub fn for_tool(server_id: &str, tool: &str, arguments: &Value) -> Self {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => canonicalize(other),
        };
        Self(json!(["tool", server_id, tool, arguments]).to_string())
    }

    pub fn for_resource(server_id: &str, uri: &str) -> Self {
        Self(json!(["resource", server_id, uri]).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuild objects with their keys sorted, at every depth
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

struct Entry {
    value: Value,
    expires_at: Instant,
    /// Position in the recency order
    tick: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<CacheKey, Entry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl Store {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
            tracing::debug!("Evicted {} from response cache", key);
        }
    }
}

/// Shared response cache
pub struct ResponseCache {
    capacity: usize,
    store: Mutex<Store>,
}

impl ResponseCache {
    /// A zero capacity disables storage
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            store: Mutex::new(Store::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live value for `key`. Expired entries are dropped here.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let mut store = self.store.lock();

        let live = store.entries.get(key)?.is_live(now);
        if !live {
            store.remove(key);
            return None;
        }

        let tick = store.bump();
        let entry = store.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        store.recency.remove(&previous);
        store.recency.insert(tick, key.clone());
        Some(value)
    }

    /// Store `value` unless a live entry already exists. Returns whether it
    /// was written.
    pub fn set(&self, key: CacheKey, value: Value, ttl: Duration) -> bool {
        if self.capacity == 0 || ttl.is_zero() {
            return false;
        }

        let now = Instant::now();
        let mut store = self.store.lock();

        if let Some(existing) = store.entries.get(&key) {
            if existing.is_live(now) {
                return false;
            }
            store.remove(&key);
        }

        while store.entries.len() >= self.capacity {
            store.evict_oldest();
        }

        let tick = store.bump();
        store.recency.insert(tick, key.clone());
        store.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                tick,
            },
        );
        true
    }

    /// Remove an entry. Returns whether one was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.store.lock().remove(key).is_some()
    }

    /// Entries currently stored, expired ones included until touched
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
