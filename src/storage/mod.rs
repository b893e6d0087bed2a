//! Storage Module
//!
//! The shared state of the cache: a fixed-size, per-bucket locked hash table
//! of [`Item`]s, the [`RecencyQueue`] that orders items with a finite expiry
//! for eviction, and a background sweeper that reaps expired items.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │Bucket 0 │ │Bucket 1 │ │Bucket 2 │ │...2^N   │            │
//! │  │ Mutex   │ │ Mutex   │ │ Mutex   │ │ buckets │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! │  ┌───────────────────────────────────────────────┐          │
//! │  │ RecencyQueue (global Mutex, byte capacity)     │          │
//! │  └───────────────────────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use cachedkv::storage::{Expiry, Store};
//!
//! let store = Store::new(10, 64 * 1024 * 1024);
//! store.insert(b"greeting", 0, Expiry::Never, b"hello");
//!
//! {
//!     // The bucket stays locked while `item` is alive
//!     let mut item = store.find(b"greeting", true).unwrap();
//!     item.append(b", world").unwrap();
//!     assert_eq!(item.version(), 2);
//! }
//!
//! assert_eq!(store.find(b"greeting", false).unwrap().value(), b"hello, world");
//! ```

pub mod engine;
pub mod expiry;
pub mod hash;
pub mod item;
pub mod lru;

pub use engine::{ItemRef, LockCounts, Store, StoreStats, DEFAULT_HASH_POWER, DEFAULT_MEMORY_LIMIT};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use hash::KeyHasher;
pub use item::{Expiry, Item, ItemId};
pub use lru::{RecencyList, RecencyQueue, SlotId, Tracked};
