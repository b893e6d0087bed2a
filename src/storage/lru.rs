//! Recency Queue
//!
//! A global most-recently-used ordering over every item with a finite expiry,
//! used to pick eviction victims once the tracked byte total exceeds the
//! configured capacity.
//!
//! ## Layout
//!
//! ```text
//!   head (most recent)                                   tail (least recent)
//!     │                                                          │
//!     ▼                                                          ▼
//!  ┌──────┐  next  ┌──────┐  next  ┌──────┐  next  ┌──────┐
//!  │slot 3│ ─────> │slot 0│ ─────> │slot 5│ ─────> │slot 1│
//!  │      │ <───── │      │ <───── │      │ <───── │      │
//!  └──────┘  prev  └──────┘  prev  └──────┘  prev  └──────┘
//! ```
//!
//! Nodes live in a slot arena and link to each other by index, so there are
//! no ownership cycles to reason about. A node records which bucket its item
//! lives in and the item's id; the item in turn records its [`SlotId`].
//!
//! ## Locking
//!
//! The whole list sits behind one mutex. Callers that also hold a bucket lock
//! must take the bucket lock first.

use parking_lot::{Mutex, MutexGuard};

use super::item::ItemId;

/// Index of a node in the recency arena.
pub type SlotId = usize;

/// What a recency node points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked {
    /// Bucket holding the item
    pub bucket: usize,
    /// The item's id
    pub item: ItemId,
}

#[derive(Debug)]
struct Node {
    prev: Option<SlotId>,
    next: Option<SlotId>,
    entry: Tracked,
    size: usize,
}

/// The doubly linked recency list itself. Obtain it through
/// [`RecencyQueue::lock`].
#[derive(Debug, Default)]
pub struct RecencyList {
    nodes: Vec<Option<Node>>,
    free: Vec<SlotId>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
    total_size: usize,
}

impl RecencyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an item to the head of the list.
    ///
    /// An isolated item (`slot == None`) gets a fresh node and its size is
    /// added to the tracked total. Returns the item's slot.
    pub fn touch(&mut self, slot: Option<SlotId>, entry: Tracked, size: usize) -> SlotId {
        match slot {
            Some(slot) => {
                debug_assert_eq!(self.node(slot).entry, entry);
                self.unlink(slot);
                self.push_front(slot);
                slot
            }
            None => {
                let node = Node {
                    prev: None,
                    next: None,
                    entry,
                    size,
                };
                let slot = match self.free.pop() {
                    Some(slot) => {
                        self.nodes[slot] = Some(node);
                        slot
                    }
                    None => {
                        self.nodes.push(Some(node));
                        self.nodes.len() - 1
                    }
                };
                self.len += 1;
                self.total_size += size;
                self.push_front(slot);
                slot
            }
        }
    }

    /// Unlinks a node from wherever it sits and frees its slot.
    pub fn remove(&mut self, slot: SlotId) -> Tracked {
        self.unlink(slot);
        let node = self.nodes[slot]
            .take()
            .unwrap_or_else(|| panic!("recency slot {} is not in use", slot));
        self.free.push(slot);
        self.len -= 1;
        self.total_size -= node.size;
        node.entry
    }

    /// Updates the size recorded for a node after its item changed.
    pub fn resize(&mut self, slot: SlotId, size: usize) {
        let node = self.node_mut(slot);
        let old = std::mem::replace(&mut node.size, size);
        self.total_size = self.total_size - old + size;
    }

    /// The least recently used entry.
    pub fn tail(&self) -> Option<Tracked> {
        self.tail.map(|slot| self.node(slot).entry)
    }

    /// The most recently used entry.
    pub fn head(&self) -> Option<Tracked> {
        self.head.map(|slot| self.node(slot).entry)
    }

    /// Iterates from head (most recent) to tail.
    pub fn iter(&self) -> impl Iterator<Item = Tracked> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = cursor?;
            let node = self.node(slot);
            cursor = node.next;
            Some(node.entry)
        })
    }

    /// Iterates from tail (least recent) to head.
    pub fn iter_rev(&self) -> impl Iterator<Item = Tracked> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            let slot = cursor?;
            let node = self.node(slot);
            cursor = node.prev;
            Some(node.entry)
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of the sizes of all linked nodes.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    fn node(&self, slot: SlotId) -> &Node {
        self.nodes[slot]
            .as_ref()
            .unwrap_or_else(|| panic!("recency slot {} is not in use", slot))
    }

    fn node_mut(&mut self, slot: SlotId) -> &mut Node {
        self.nodes[slot]
            .as_mut()
            .unwrap_or_else(|| panic!("recency slot {} is not in use", slot))
    }

    fn unlink(&mut self, slot: SlotId) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(slot);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, slot: SlotId) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(old) => self.node_mut(old).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}

/// The shared recency queue: a [`RecencyList`] behind one lock plus the byte
/// capacity that triggers eviction.
#[derive(Debug)]
pub struct RecencyQueue {
    list: Mutex<RecencyList>,
    capacity: usize,
}

impl RecencyQueue {
    /// Creates an empty queue that allows `capacity` tracked bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            list: Mutex::new(RecencyList::new()),
            capacity,
        }
    }

    /// Locks the list. Never call this while holding the guard of another
    /// `lock()`; when a bucket lock is needed too, take it first.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, RecencyList> {
        self.list.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_size(&self) -> usize {
        self.lock().total_size()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns true if the tracked total exceeds the capacity.
    pub fn is_over_capacity(&self) -> bool {
        self.lock().total_size() > self.capacity
    }
}
