//! Stored Items
//!
//! An [`Item`] is the unit of ownership in the store: one key, one value
//! buffer and the metadata the memcached protocol exposes (flags, expiry and
//! the CAS version).
//!
//! Items live inside exactly one bucket of the [`Store`](super::Store). Items
//! with a finite expiry are additionally tracked by the
//! [`RecencyQueue`](super::RecencyQueue); the item remembers its slot in that
//! queue so it can be relinked or unlinked in O(1).

use bytes::Bytes;
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::lru::SlotId;

/// Exptime values up to this many seconds are relative to "now"; anything
/// larger is an absolute Unix timestamp (30 days, same as memcached).
pub const MAX_RELATIVE_EXPTIME: u32 = 60 * 60 * 24 * 30;

/// Process-unique identity of an item, used by the recency queue to tell a
/// live item apart from a newer item that reuses the same key.
pub type ItemId = u64;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// When an item stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The item never expires and is not tracked for recency.
    Never,
    /// The item expires at the given instant.
    At(Instant),
}

impl Expiry {
    /// Converts a wire-format exptime into an [`Expiry`].
    ///
    /// `0` means never, values up to [`MAX_RELATIVE_EXPTIME`] are seconds from
    /// now and larger values are absolute Unix timestamps. An absolute time in
    /// the past produces an expiry that has already elapsed.
    pub fn from_exptime(exptime: u32) -> Self {
        let now = Instant::now();
        match exptime {
            0 => Expiry::Never,
            secs if secs <= MAX_RELATIVE_EXPTIME => {
                Expiry::At(now + Duration::from_secs(u64::from(secs)))
            }
            unix => {
                let target = UNIX_EPOCH + Duration::from_secs(u64::from(unix));
                match target.duration_since(SystemTime::now()) {
                    Ok(remaining) => Expiry::At(now + remaining),
                    Err(_) => Expiry::At(now),
                }
            }
        }
    }

    /// Returns true if this expiry is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        matches!(self, Expiry::At(_))
    }

    /// Returns true if the expiry has passed at `now`.
    #[inline]
    pub fn has_elapsed(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(at) => now >= *at,
        }
    }
}

/// A stored value plus its metadata.
#[derive(Debug)]
pub struct Item {
    id: ItemId,
    key: Bytes,
    value: Vec<u8>,
    /// Opaque client flags, never interpreted
    pub flags: u32,
    /// When this item expires
    pub expiry: Expiry,
    version: u64,
    bucket: usize,
    /// Position in the recency queue, if linked
    pub(crate) lru_slot: Option<SlotId>,
}

impl Item {
    /// Creates a new item, copying `data` into a freshly allocated buffer.
    ///
    /// `bucket` is the bucket index computed from the key hash; it is cached so
    /// eviction can find the item's bucket without rehashing.
    pub fn new(key: Bytes, flags: u32, expiry: Expiry, data: &[u8], bucket: usize) -> Self {
        Self {
            id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
            key,
            value: data.to_vec(),
            flags,
            expiry,
            version: 1,
            bucket,
            lru_slot: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The CAS version. Starts at 1 and grows by one per successful mutation.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Bytes this item counts against the recency queue's capacity.
    #[inline]
    pub fn footprint(&self) -> usize {
        self.key.len() + self.value.len()
    }

    /// Returns true if the item has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiry.has_elapsed(Instant::now())
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Replaces the whole value buffer.
    ///
    /// The new buffer is allocated fallibly; on failure the old value is kept.
    pub(crate) fn replace_value(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        let mut value = Vec::new();
        value.try_reserve_exact(data.len())?;
        value.extend_from_slice(data);
        self.value = value;
        Ok(())
    }

    /// Appends `data` after the current value.
    pub(crate) fn append_value(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        self.value.try_reserve_exact(data.len())?;
        self.value.extend_from_slice(data);
        Ok(())
    }

    /// Splices `data` in front of the current value.
    pub(crate) fn prepend_value(&mut self, data: &[u8]) -> Result<(), TryReserveError> {
        let mut value = Vec::new();
        value.try_reserve_exact(data.len() + self.value.len())?;
        value.extend_from_slice(data);
        value.extend_from_slice(&self.value);
        self.value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(value: &[u8]) -> Item {
        Item::new(Bytes::from_static(b"key"), 0, Expiry::Never, value, 0)
    }

    #[test]
    fn test_new_item_copies_data() {
        let data = b"hello".to_vec();
        let it = item(&data);
        assert_eq!(it.value(), b"hello");
        assert_eq!(it.version(), 1);
        assert_eq!(it.footprint(), 3 + 5);
        assert!(it.lru_slot.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = item(b"a");
        let b = item(b"b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_append_prepend_replace() {
        let mut it = item(b"mid");
        it.append_value(b"-end").unwrap();
        it.prepend_value(b"start-").unwrap();
        assert_eq!(it.value(), b"start-mid-end");

        it.replace_value(b"new").unwrap();
        assert_eq!(it.value(), b"new");
    }

    #[test]
    fn test_exptime_zero_never_expires() {
        assert_eq!(Expiry::from_exptime(0), Expiry::Never);
        assert!(!Expiry::Never.has_elapsed(Instant::now()));
    }

    #[test]
    fn test_relative_exptime() {
        let expiry = Expiry::from_exptime(100);
        assert!(expiry.is_finite());
        assert!(!expiry.has_elapsed(Instant::now()));
        assert!(expiry.has_elapsed(Instant::now() + Duration::from_secs(101)));
    }

    #[test]
    fn test_absolute_exptime_in_past_is_expired() {
        // Just past the relative window, i.e. early 1970
        let expiry = Expiry::from_exptime(MAX_RELATIVE_EXPTIME + 1);
        assert!(expiry.has_elapsed(Instant::now()));
    }

    #[test]
    fn test_absolute_exptime_in_future() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let expiry = Expiry::from_exptime((now + 3600) as u32);
        assert!(expiry.is_finite());
        assert!(!expiry.has_elapsed(Instant::now()));
    }
}
