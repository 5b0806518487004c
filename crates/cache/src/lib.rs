//! Bounded, owner-aware key/value cache for ringkv nodes.
//!
//! One [`EvictionCache`] type covers all three eviction policies. The
//! entries live in an index-linked arena ([`list`]); the policy only decides
//! whether a hit reorders the list and which slot is evicted when an insert
//! would exceed capacity.
//!
//! A hit requires the caller's owner to match the stored owner. A lookup by
//! any other user is reported as a plain miss.

mod list;

use list::{Slot, SlotId, SlotList};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// EvictionPolicy
// ---------------------------------------------------------------------------

/// Which entry is sacrificed when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionPolicy {
    /// Oldest insertion goes first; reads do not reorder.
    Fifo,
    /// Least recently read or written goes first.
    Lru,
    /// Lowest access count goes first, oldest logical timestamp breaks ties.
    Lfu,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "FIFO",
            Self::Lru => "LRU",
            Self::Lfu => "LFU",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown eviction policy {0:?} (expected FIFO, LRU or LFU)")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "LRU" => Ok(Self::Lru),
            "LFU" => Ok(Self::Lfu),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// EvictionCache
// ---------------------------------------------------------------------------

/// Logical clock step applied on every LFU get/put.
const LFU_CLOCK_STEP: u64 = 1;

#[derive(Debug)]
struct CacheInner {
    index: HashMap<String, SlotId>,
    list: SlotList,
    clock: u64,
}

impl CacheInner {
    fn tick(&mut self) -> u64 {
        self.clock += LFU_CLOCK_STEP;
        self.clock
    }

    fn evict_one(&mut self, policy: EvictionPolicy) {
        let victim = match policy {
            EvictionPolicy::Fifo | EvictionPolicy::Lru => self.list.tail(),
            EvictionPolicy::Lfu => self
                .list
                .iter()
                .min_by_key(|(_, slot)| (slot.hits, slot.stamp))
                .map(|(id, _)| id),
        };
        if let Some(id) = victim {
            if let Some(slot) = self.list.remove(id) {
                self.index.remove(&slot.key);
                tracing::debug!("cache evicted '{}' ({})", slot.key, policy);
            }
        }
    }
}

/// Size-bounded cache. All operations serialize on one internal lock.
pub struct EvictionCache {
    policy: EvictionPolicy,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl fmt::Debug for EvictionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionCache")
            .field("policy", &self.policy)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl EvictionCache {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            policy,
            capacity,
            inner: Mutex::new(CacheInner {
                index: HashMap::with_capacity(capacity),
                list: SlotList::with_capacity(capacity),
                clock: 0,
            }),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key` on behalf of `owner`.
    pub fn get(&self, key: &str, owner: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let id = *inner.index.get(key)?;
        let matches = inner
            .list
            .get(id)
            .map(|slot| slot.owner == owner)
            .unwrap_or(false);
        if !matches {
            return None;
        }

        match self.policy {
            EvictionPolicy::Fifo => {}
            EvictionPolicy::Lru => inner.list.move_to_head(id),
            EvictionPolicy::Lfu => {
                let stamp = inner.tick();
                if let Some(slot) = inner.list.get_mut(id) {
                    slot.hits += 1;
                    slot.stamp = stamp;
                }
            }
        }
        inner.list.get(id).map(|slot| slot.value.clone())
    }

    /// Insert or update `key`. A fresh insert into a full cache first
    /// evicts exactly one entry; an update never evicts.
    pub fn put(&self, key: &str, value: &str, owner: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        let stamp = match self.policy {
            EvictionPolicy::Lfu => inner.tick(),
            _ => 0,
        };

        if let Some(&id) = inner.index.get(key) {
            if let Some(slot) = inner.list.get_mut(id) {
                slot.value = value.to_string();
                slot.owner = owner.to_string();
                if self.policy == EvictionPolicy::Lfu {
                    slot.stamp = stamp;
                }
            }
            if self.policy == EvictionPolicy::Lru {
                inner.list.move_to_head(id);
            }
            return;
        }

        if inner.list.len() >= self.capacity {
            inner.evict_one(self.policy);
        }
        let id = inner.list.push_head(Slot::new(
            key.to_string(),
            value.to_string(),
            owner.to_string(),
            stamp,
        ));
        inner.index.insert(key.to_string(), id);
    }

    /// Drop `key` if cached. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.index.remove(key) {
            Some(id) => inner.list.remove(id).is_some(),
            None => false,
        }
    }

    /// Snapshot of the cached keys.
    pub fn keys(&self) -> HashSet<String> {
        self.inner.lock().index.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
