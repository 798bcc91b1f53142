//! Capacity-bounded result cache with TTL expiry and owner-tag invalidation.
//!
//! Entries live in a [`DashMap`] keyed by [`CanonicalKey`] (lock-free
//! concurrent reads, sub-µs). Insertion order is tracked in a side queue
//! behind a [`Mutex`]: capacity eviction drops the oldest-inserted live
//! entry first, strictly FIFO. Reads never reorder entries, so a frequently
//! read but old entry is still the first to go; that is the documented
//! tradeoff, not an accident, and it keeps eviction bookkeeping O(1).
//!
//! On [`get`](ResultCache::get): a missing or expired entry is a miss, and an
//! expired entry is removed on sight. On [`put`](ResultCache::put): expired
//! entries are purged from the front of the queue, then oldest live entries
//! are evicted until the new entry fits. Every entry carries the
//! [`OwnerTag`]s it was stored under; [`invalidate`](ResultCache::invalidate)
//! removes exactly the entries whose tag set contains the given tag
//! (whole-tag equality, never substring matching on serialized keys).
//!
//! Cache operations never fail from the caller's perspective: anything that
//! prevents storing a value degrades to cache-miss behavior on later reads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::keys::{CanonicalKey, OwnerTag};

/// TTL and capacity bounds for one cache instance.
///
/// Route families with different freshness needs get separate
/// [`ResultCache`] instances with their own policy rather than per-entry
/// overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entries whose age has reached the TTL are treated as absent.
    pub ttl: Duration,
    /// Maximum number of live entries. Inserting past this bound evicts the
    /// oldest-inserted live entry. Zero disables storage entirely.
    pub capacity: usize,
}

impl CachePolicy {
    pub const fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity }
    }
}

/// A timestamped cache entry (uses monotonic `Instant`).
struct CacheEntry<V> {
    value: Arc<V>,
    stored_at: Instant,
    /// Insertion sequence number; ties the entry to its queue slot.
    seq: u64,
    tags: Box<[OwnerTag]>,
}

/// One slot in the insertion-order queue. A slot whose `seq` no longer
/// matches the map entry's `seq` is stale (the key was overwritten or
/// removed) and is skipped when reached.
struct OrderSlot {
    seq: u64,
    key: CanonicalKey,
}

struct OrderState {
    queue: VecDeque<OrderSlot>,
    next_seq: u64,
}

/// Point-in-time snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    /// Stored entries at snapshot time; some may already be past their TTL
    /// and will count as misses when read.
    pub entries: usize,
}

/// Thread-safe memoization cache for computed query responses.
///
/// `get` is lock-free; `put`, `invalidate`, `invalidate_exact`, and `clear`
/// serialize their size and eviction bookkeeping on the insertion-order
/// queue, which is how `len() <= capacity` holds after every insertion.
/// There is no single-flight guarantee: two racing misses for one key may
/// both compute, and the second `put` wins (and counts as the newest
/// insertion).
pub struct ResultCache<V> {
    entries: DashMap<CanonicalKey, CacheEntry<V>>,
    order: Mutex<OrderState>,
    policy: CachePolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl<V> ResultCache<V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(OrderState {
                queue: VecDeque::new(),
                next_seq: 0,
            }),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Writers serialize on the order queue. A poisoned lock means another
    /// writer panicked mid-update; every queue slot is re-verified against
    /// the map before use, so the guard is recovered rather than propagating
    /// the panic.
    fn lock_order(&self) -> MutexGuard<'_, OrderState> {
        match self.order.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a cached value.
    ///
    /// Returns `None` if the key was never stored, was evicted or
    /// invalidated, or has reached its TTL. An expired entry is removed on
    /// the way out. Reads do not refresh an entry's age or position.
    pub fn get(&self, key: &CanonicalKey) -> Option<Arc<V>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() >= self.policy.ttl {
                let seq = entry.seq;
                drop(entry);
                // Guarded by seq so a racing overwrite is never torn down.
                self.entries.remove_if(key, |_, e| e.seq == seq);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = key.as_str(), "cache entry expired");
                return None;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = key.as_str(), "cache hit");
            return Some(Arc::clone(&entry.value));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key = key.as_str(), "cache miss");
        None
    }

    /// Store a computed value under its canonical key, stamped now.
    ///
    /// `tags` name the entities this value was derived from; later
    /// [`invalidate`](Self::invalidate) calls match against them. If the
    /// cache already holds `capacity` live entries, the oldest-inserted live
    /// entry is evicted first. Overwriting an existing key refreshes its
    /// timestamp and moves it to the back of the insertion order.
    ///
    /// Returns the stored value wrapped in the `Arc` handed to later readers.
    pub fn put(&self, key: CanonicalKey, value: V, tags: Vec<OwnerTag>) -> Arc<V> {
        let value = Arc::new(value);
        if self.policy.capacity == 0 {
            return value;
        }

        let mut order = self.lock_order();
        self.purge_front(&mut order);

        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.policy.capacity {
                let Some(slot) = order.queue.pop_front() else {
                    break;
                };
                if self
                    .entries
                    .remove_if(&slot.key, |_, e| e.seq == slot.seq)
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = slot.key.as_str(), "evicted oldest entry at capacity");
                }
            }
        }

        let seq = order.next_seq;
        order.next_seq += 1;
        tracing::trace!(key = key.as_str(), tags = tags.len(), "cache insert");
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value),
                stored_at: Instant::now(),
                seq,
                tags: tags.into_boxed_slice(),
            },
        );
        order.queue.push_back(OrderSlot { seq, key });
        value
    }

    /// Drop expired entries and stale slots from the front of the queue.
    ///
    /// All writers stamp entries while holding the order lock, so entry ages
    /// are monotone along the queue: once a live slot is reached, everything
    /// behind it is younger and still live.
    fn purge_front(&self, order: &mut OrderState) {
        while let Some(front) = order.queue.front() {
            let expired = match self.entries.get(&front.key) {
                Some(entry) if entry.seq == front.seq => {
                    if entry.stored_at.elapsed() < self.policy.ttl {
                        break;
                    }
                    true
                }
                _ => false,
            };
            if expired {
                self.entries.remove_if(&front.key, |_, e| e.seq == front.seq);
            }
            order.queue.pop_front();
        }
    }

    /// Remove every entry whose tag set contains `tag`, by whole-tag
    /// equality. Returns the number of entries removed.
    pub fn invalidate(&self, tag: &OwnerTag) -> usize {
        let _order = self.lock_order();
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.tags.contains(tag) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(tag = tag.as_str(), removed, "invalidated tagged entries");
        }
        removed
    }

    /// Remove the single entry stored under `key`, if present.
    pub fn invalidate_exact(&self, key: &CanonicalKey) -> bool {
        let _order = self.lock_order();
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = key.as_str(), "invalidated entry");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut order = self.lock_order();
        self.entries.clear();
        order.queue.clear();
    }

    /// Number of stored entries (live plus any not-yet-purged expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of capacity evictions since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Number of entries removed by invalidation since creation.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            invalidations: self.invalidations(),
            entries: self.len(),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("evictions", &self.evictions())
            .field("invalidations", &self.invalidations())
            .field("ttl", &self.policy.ttl)
            .field("capacity", &self.policy.capacity)
            .finish()
    }
}
