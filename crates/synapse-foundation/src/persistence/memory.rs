//! In-memory store backend.
//!
//! Thread-safe, TTL-aware implementation of [`KvStore`] over a single
//! `tokio::sync::RwLock<HashMap>`. Suitable for unit tests, development,
//! and single-process deployments where the orchestrator's persistence is
//! allowed to die with the process.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use synapse_kernel::error::{KvResult, StoreError};
use synapse_kernel::store::KvStore;
use tokio::sync::RwLock;

/// A stored value: either a string or a set of members.
#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(entry: Entry) -> Self {
        Self {
            entry,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Thread-safe in-memory [`KvStore`].
///
/// Expiry is lazy: reads treat an expired slot as absent, and writes
/// evict it. There is no background sweeper.
pub struct MemoryKvStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Create a shared empty store.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Drop all data.
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    /// Returns `true` when no live key exists.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match supporting `*` wildcards only, the subset the key layout
/// uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'.
    true
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            Some(slot) if slot.is_expired(Instant::now()) => Ok(None),
            Some(slot) => match &slot.entry {
                Entry::Str(value) => Ok(Some(value.clone())),
                Entry::Set(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), Slot::live(Entry::Str(value.to_string())));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let slot = Slot {
            entry: Entry::Str(value.to_string()),
            expires_at: Some(Instant::now() + ttl),
        };
        self.slots.write().await.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.remove(key) {
            Some(slot) => Ok(!slot.is_expired(Instant::now())),
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        Ok(slots
            .iter()
            .filter(|(key, slot)| !slot.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        match slots.get_mut(key) {
            Some(slot) if slot.is_expired(now) => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                *slot = Slot::live(Entry::Set(members));
                Ok(())
            }
            Some(slot) => match &mut slot.entry {
                Entry::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                Entry::Str(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                slots.insert(key.to_string(), Slot::live(Entry::Set(members)));
                Ok(())
            }
        }
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            Some(slot) if slot.is_expired(Instant::now()) => Ok(false),
            Some(slot) => match &mut slot.entry {
                Entry::Set(members) => Ok(members.remove(member)),
                Entry::Str(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(false),
        }
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            Some(slot) if slot.is_expired(Instant::now()) => Ok(Vec::new()),
            Some(slot) => match &slot.entry {
                Entry::Set(members) => Ok(members.iter().cloned().collect()),
                Entry::Str(_) => Err(StoreError::WrongType(key.to_string())),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        let current = match slots.get(key) {
            Some(slot) if slot.is_expired(now) => 0,
            Some(slot) => match &slot.entry {
                Entry::Str(value) => value
                    .parse::<i64>()
                    .map_err(|_| StoreError::WrongType(key.to_string()))?,
                Entry::Set(_) => return Err(StoreError::WrongType(key.to_string())),
            },
            None => 0,
        };
        let next = current + 1;
        // INCR preserves an existing TTL.
        let expires_at = slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.expires_at);
        slots.insert(
            key.to_string(),
            Slot {
                entry: Entry::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            Some(slot) if slot.is_expired(Instant::now()) => Ok(false),
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
