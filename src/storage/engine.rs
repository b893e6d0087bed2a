//! Concurrent Item Store
//!
//! This module implements the hash table behind the cache: a fixed array of
//! `2^power` buckets, each an independently locked chain of [`Item`]s, plus
//! the shared [`RecencyQueue`] used for eviction.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Store                              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐       ┌──────────┐    │
//! │  │ Bucket 0 │ │ Bucket 1 │ │ Bucket 2 │  ...  │ Bucket N │    │
//! │  │  Mutex   │ │  Mutex   │ │  Mutex   │       │  Mutex   │    │
//! │  │ [items]  │ │ [items]  │ │ [items]  │       │ [items]  │    │
//! │  └──────────┘ └──────────┘ └──────────┘       └──────────┘    │
//! │                                                               │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │ RecencyQueue (one Mutex, items with a finite expiry)     │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Store::find`] hands back an [`ItemRef`] that keeps the bucket locked
//! until it is dropped. That is what makes a read-modify-respond sequence on
//! one key atomic with respect to other workers. Dropping the `ItemRef` is the
//! only way the lock is released, so every exit path releases it exactly once.
//!
//! Lock order is always bucket, then recency queue. Nothing ever holds two
//! bucket locks at once.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{TryReserveError, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, trace};

use super::hash::KeyHasher;
use super::item::{Expiry, Item, ItemId};
use super::lru::{RecencyList, RecencyQueue, Tracked};

/// Default bucket-count exponent (1024 buckets).
pub const DEFAULT_HASH_POWER: u32 = 10;

/// Largest accepted bucket-count exponent.
pub const MAX_HASH_POWER: u32 = 28;

/// Default byte capacity of the recency queue.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// One chain of items sharing a bucket index. The front is the chain head.
#[derive(Debug, Default)]
struct Bucket {
    items: VecDeque<Item>,
}

impl Bucket {
    fn position(&self, key: &[u8]) -> Option<usize> {
        self.items.iter().position(|item| item.key() == key)
    }
}

/// Counts bucket lock acquisitions and releases.
#[derive(Debug, Default)]
struct LockStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of the bucket lock counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockCounts {
    pub acquired: u64,
    pub released: u64,
}

impl LockCounts {
    /// Number of bucket locks currently held.
    pub fn held(&self) -> u64 {
        self.acquired - self.released
    }
}

/// A held bucket lock that reports its release.
struct BucketGuard<'a> {
    guard: MutexGuard<'a, Bucket>,
    stats: &'a LockStats,
}

impl Drop for BucketGuard<'_> {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub items: u64,
    pub bucket_count: usize,
    pub tracked_items: usize,
    pub tracked_bytes: usize,
    pub memory_limit: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
}

/// The shared key-value store.
///
/// Built once at startup, wrapped in an `Arc` and handed to every worker.
///
/// # Example
///
/// ```
/// use cachedkv::storage::{Expiry, Store};
///
/// let store = Store::new(4, 1024 * 1024);
/// store.insert(b"name", 0, Expiry::Never, b"Ariz");
///
/// let item = store.find(b"name", true).unwrap();
/// assert_eq!(item.value(), b"Ariz");
/// assert_eq!(item.version(), 1);
/// ```
pub struct Store {
    buckets: Box<[Mutex<Bucket>]>,
    hasher: KeyHasher,
    recency: RecencyQueue,
    lock_stats: LockStats,

    item_count: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("buckets", &self.buckets.len())
            .field("items", &self.item_count.load(Ordering::Relaxed))
            .field("memory_limit", &self.recency.capacity())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_POWER, DEFAULT_MEMORY_LIMIT)
    }
}

impl Store {
    /// Creates a store with `2^hash_power` buckets whose recency queue evicts
    /// above `memory_limit` tracked bytes. The hash seed is drawn here.
    pub fn new(hash_power: u32, memory_limit: usize) -> Self {
        Self::with_hasher(hash_power, memory_limit, KeyHasher::new())
    }

    /// Like [`Store::new`] but with an explicit hasher.
    pub fn with_hasher(hash_power: u32, memory_limit: usize, hasher: KeyHasher) -> Self {
        let power = hash_power.min(MAX_HASH_POWER);
        let buckets = (0..1usize << power)
            .map(|_| Mutex::new(Bucket::default()))
            .collect();

        Self {
            buckets,
            hasher,
            recency: RecencyQueue::new(memory_limit),
            lock_stats: LockStats::default(),
            item_count: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// The 32-bit digest of a key.
    #[inline]
    pub fn hash(&self, key: &[u8]) -> u32 {
        self.hasher.hash(key)
    }

    /// The bucket index for a digest.
    #[inline]
    pub fn index(&self, digest: u32) -> usize {
        digest as usize % self.buckets.len()
    }

    #[inline]
    fn bucket_of(&self, key: &[u8]) -> usize {
        self.index(self.hash(key))
    }

    fn lock_bucket(&self, index: usize) -> BucketGuard<'_> {
        let guard = self.buckets[index].lock();
        self.lock_stats.acquired.fetch_add(1, Ordering::Relaxed);
        BucketGuard {
            guard,
            stats: &self.lock_stats,
        }
    }

    /// Looks up `key`.
    ///
    /// On a hit the returned [`ItemRef`] keeps the item's bucket locked until
    /// it is dropped. With `update_recency` the item also moves to the head of
    /// the recency queue. On a miss the bucket lock is released before
    /// returning. Expired items are unlinked and reported as misses.
    pub fn find(&self, key: &[u8], update_recency: bool) -> Option<ItemRef<'_>> {
        let index = self.bucket_of(key);
        let mut bucket = self.lock_bucket(index);

        let pos = match bucket.guard.position(key) {
            Some(pos) => pos,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let now = Instant::now();
        if bucket.guard.items[pos].expiry.has_elapsed(now) {
            if let Some(item) = bucket.guard.items.remove(pos) {
                self.unlink_recency(&item);
                trace!(key = %String::from_utf8_lossy(item.key()), "Lazily expired item");
            }
            self.item_count.fetch_sub(1, Ordering::Relaxed);
            self.expired.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let item = &bucket.guard.items[pos];
        if update_recency {
            if let Some(slot) = item.lru_slot {
                let tracked = Tracked {
                    bucket: index,
                    item: item.id(),
                };
                self.recency.lock().touch(Some(slot), tracked, item.footprint());
            }
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(ItemRef {
            store: self,
            bucket: Some(bucket),
            pos,
            grew: false,
        })
    }

    /// Inserts a new item, replacing any item already stored under `key`.
    ///
    /// The data is copied into a fresh buffer. Items with a finite expiry are
    /// linked at the head of the recency queue. Returns the new item's id.
    pub fn insert(&self, key: &[u8], flags: u32, expiry: Expiry, data: &[u8]) -> ItemId {
        self.insert_with(key, flags, expiry, data, true)
            .unwrap_or_default()
    }

    /// Inserts a new item only if `key` is not present (or has expired).
    ///
    /// The absence check and the insertion happen under one bucket lock.
    /// Returns `None` if a live item already exists.
    pub fn insert_absent(
        &self,
        key: &[u8],
        flags: u32,
        expiry: Expiry,
        data: &[u8],
    ) -> Option<ItemId> {
        self.insert_with(key, flags, expiry, data, false)
    }

    fn insert_with(
        &self,
        key: &[u8],
        flags: u32,
        expiry: Expiry,
        data: &[u8],
        replace: bool,
    ) -> Option<ItemId> {
        let index = self.bucket_of(key);
        let mut item = Item::new(Bytes::copy_from_slice(key), flags, expiry, data, index);
        let id = item.id();

        {
            let mut bucket = self.lock_bucket(index);

            if let Some(pos) = bucket.guard.position(key) {
                let live = !bucket.guard.items[pos].is_expired();
                if live && !replace {
                    return None;
                }
                if let Some(old) = bucket.guard.items.remove(pos) {
                    self.unlink_recency(&old);
                }
                if !live {
                    self.expired.fetch_add(1, Ordering::Relaxed);
                }
                self.item_count.fetch_sub(1, Ordering::Relaxed);
            }

            if expiry.is_finite() {
                let tracked = Tracked {
                    bucket: index,
                    item: id,
                };
                item.lru_slot = Some(self.recency.lock().touch(None, tracked, item.footprint()));
            }

            bucket.guard.items.push_front(item);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        self.evict_to_capacity();
        Some(id)
    }

    /// Removes `key`. Returns true if a live item was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        match self.find(key, false) {
            Some(item) => {
                item.remove();
                true
            }
            None => false,
        }
    }

    /// Evicts least recently used items until the recency queue is back under
    /// its capacity. Returns how many items were evicted.
    ///
    /// Must not be called while holding a bucket lock.
    pub fn evict_to_capacity(&self) -> usize {
        let mut evicted = 0;

        loop {
            let victim = {
                let list = self.recency.lock();
                if list.total_size() <= self.recency.capacity() {
                    break;
                }
                match list.tail() {
                    Some(victim) => victim,
                    None => break,
                }
            };

            match self.evict_tail(victim) {
                Eviction::Evicted => evicted += 1,
                Eviction::Moved => continue,
                Eviction::Done => break,
            }
        }

        if evicted > 0 {
            debug!(
                evicted = evicted,
                tracked_bytes = self.recency.total_size(),
                "Recency queue over capacity, evicted items"
            );
        }

        evicted
    }

    /// Evicts `victim` if, under its bucket lock, it is still the tail of an
    /// over-capacity queue.
    fn evict_tail(&self, victim: Tracked) -> Eviction {
        let mut bucket = self.lock_bucket(victim.bucket);
        let mut list = self.recency.lock();
        if list.total_size() <= self.recency.capacity() {
            return Eviction::Done;
        }
        // A concurrent find may have moved it to the head, or a writer removed it
        if list.tail() != Some(victim) {
            return Eviction::Moved;
        }

        let pos = bucket
            .guard
            .items
            .iter()
            .position(|item| item.id() == victim.item);
        let item = match pos.and_then(|pos| bucket.guard.items.remove(pos)) {
            Some(item) => item,
            None => {
                // Unlinking always happens under the bucket lock
                debug!(bucket = victim.bucket, "Recency tail has no item");
                return Eviction::Done;
            }
        };

        if let Some(slot) = item.lru_slot {
            list.remove(slot);
        }
        drop(list);

        self.item_count.fetch_sub(1, Ordering::Relaxed);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(
            key = %String::from_utf8_lossy(item.key()),
            size = item.footprint(),
            "Evicted item"
        );
        Eviction::Evicted
    }

    /// Removes every expired item, one bucket at a time. Returns how many
    /// items were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for index in 0..self.buckets.len() {
            let mut bucket = self.lock_bucket(index);
            if !bucket
                .guard
                .items
                .iter()
                .any(|item| item.expiry.has_elapsed(now))
            {
                continue;
            }

            let mut recency = self.recency.lock();
            bucket.guard.items.retain(|item| {
                if !item.expiry.has_elapsed(now) {
                    return true;
                }
                if let Some(slot) = item.lru_slot {
                    recency.remove(slot);
                }
                removed += 1;
                false
            });
        }

        if removed > 0 {
            self.item_count.fetch_sub(removed as u64, Ordering::Relaxed);
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Number of items in the store (including expired items not yet reaped).
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The shared recency queue.
    pub fn recency(&self) -> &RecencyQueue {
        &self.recency
    }

    /// How many items in `key`'s chain carry exactly `key`.
    pub fn occurrences(&self, key: &[u8]) -> usize {
        let bucket = self.lock_bucket(self.bucket_of(key));
        bucket
            .guard
            .items
            .iter()
            .filter(|item| item.key() == key)
            .count()
    }

    /// Bucket lock acquisition/release counters.
    pub fn lock_counts(&self) -> LockCounts {
        LockCounts {
            acquired: self.lock_stats.acquired.load(Ordering::Relaxed),
            released: self.lock_stats.released.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> StoreStats {
        let (tracked_items, tracked_bytes) = {
            let list = self.recency.lock();
            (list.len(), list.total_size())
        };

        StoreStats {
            items: self.item_count.load(Ordering::Relaxed),
            bucket_count: self.buckets.len(),
            tracked_items,
            tracked_bytes,
            memory_limit: self.recency.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    /// Unlinks an item that was just taken out of its bucket from the recency
    /// queue. The caller still holds the bucket lock.
    fn unlink_recency(&self, item: &Item) {
        if let Some(slot) = item.lru_slot {
            self.recency.lock().remove(slot);
        }
    }
}

/// Outcome of one eviction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Evicted,
    /// The peeked tail is no longer the tail
    Moved,
    /// Back under capacity, or nothing left to evict
    Done,
}

/// A found item together with its locked bucket.
///
/// Dereferences to the [`Item`]. The bucket lock is released when the
/// `ItemRef` is dropped (or consumed by [`ItemRef::remove`]); if a mutation
/// pushed the recency queue over capacity, eviction runs right after the
/// release.
pub struct ItemRef<'a> {
    store: &'a Store,
    bucket: Option<BucketGuard<'a>>,
    pos: usize,
    grew: bool,
}

impl<'a> ItemRef<'a> {
    fn guard(&self) -> &BucketGuard<'a> {
        self.bucket
            .as_ref()
            .expect("bucket guard is only taken when the ItemRef is dropped")
    }

    fn guard_mut(&mut self) -> &mut BucketGuard<'a> {
        self.bucket
            .as_mut()
            .expect("bucket guard is only taken when the ItemRef is dropped")
    }

    fn item_mut(&mut self) -> &mut Item {
        let pos = self.pos;
        &mut self.guard_mut().guard.items[pos]
    }

    /// Replaces the value, flags and expiry wholesale and bumps the version.
    ///
    /// On allocation failure nothing changes.
    pub fn set_value(
        &mut self,
        flags: u32,
        expiry: Expiry,
        data: &[u8],
    ) -> Result<(), TryReserveError> {
        let item = self.item_mut();
        item.replace_value(data)?;
        item.flags = flags;
        item.expiry = expiry;
        item.bump_version();
        self.sync_recency();
        Ok(())
    }

    /// Appends `data` to the value and bumps the version.
    pub fn append(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        let item = self.item_mut();
        item.append_value(data)?;
        item.bump_version();
        self.sync_recency();
        Ok(())
    }

    /// Prepends `data` to the value and bumps the version.
    pub fn prepend(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        let item = self.item_mut();
        item.prepend_value(data)?;
        item.bump_version();
        self.sync_recency();
        Ok(())
    }

    /// Unlinks the item from its bucket and the recency queue, then releases
    /// the bucket lock. Returns the removed item.
    pub fn remove(mut self) -> Item {
        let pos = self.pos;
        let store = self.store;
        let item = self
            .guard_mut()
            .guard
            .items
            .remove(pos)
            .expect("ItemRef position is valid while the bucket is locked");
        store.unlink_recency(&item);
        store.item_count.fetch_sub(1, Ordering::Relaxed);
        item
    }

    /// Brings the item's recency node in line with its (possibly changed)
    /// expiry and size, relinking it at the head.
    fn sync_recency(&mut self) {
        let store = self.store;
        let item = self.item_mut();
        let tracked = Tracked {
            bucket: item.bucket(),
            item: item.id(),
        };
        let size = item.footprint();

        let mut list: MutexGuard<'_, RecencyList> = store.recency.lock();
        match (item.expiry.is_finite(), item.lru_slot) {
            (true, Some(slot)) => {
                list.resize(slot, size);
                list.touch(Some(slot), tracked, size);
            }
            (true, None) => {
                item.lru_slot = Some(list.touch(None, tracked, size));
            }
            (false, Some(slot)) => {
                list.remove(slot);
                item.lru_slot = None;
            }
            (false, None) => {}
        }
        drop(list);
        self.grew = true;
    }
}

impl Deref for ItemRef<'_> {
    type Target = Item;

    fn deref(&self) -> &Item {
        &self.guard().guard.items[self.pos]
    }
}

impl Drop for ItemRef<'_> {
    fn drop(&mut self) {
        // Release the bucket before evicting; eviction takes other buckets.
        drop(self.bucket.take());
        if self.grew && self.store.recency.is_over_capacity() {
            self.store.evict_to_capacity();
        }
    }
}
