//! Single LRU Shard with a Byte Budget
//!
//! An `LruShard` is a plain single-threaded structure; locking lives one
//! level up in [`ShardedLruCache`](crate::cache::ShardedLruCache).
//!
//! ## Layout
//!
//! ```text
//!   index: HashMap<Bytes, slot>
//!
//!   slots (slab, doubly linked by index)
//!   head ──► [D] ◄──► [A] ◄──► [B] ◄── tail
//!            MRU                LRU
//! ```
//!
//! Every resident entry costs `key.len() + value.len() + ENTRY_OVERHEAD`
//! bytes. After an insert the shard evicts from the tail until its
//! resident total fits the budget again, so an entry larger than the whole
//! budget is inserted and then immediately evicted along with everything
//! else.

use bytes::Bytes;
use std::collections::HashMap;

/// Fixed per-entry bookkeeping cost charged against the budget.
pub const ENTRY_OVERHEAD: usize = 32;

/// Cost of a key/value pair against a shard budget.
#[inline]
pub fn entry_cost(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

type Slot = usize;

#[derive(Debug)]
struct Node {
    key: Bytes,
    value: Bytes,
    prev: Option<Slot>,
    next: Option<Slot>,
}

/// What a `put` did to the shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// True if the key was already resident and got replaced
    pub replaced: bool,
    /// Number of entries evicted to restore the budget
    pub evicted: usize,
}

/// An LRU list plus hash index with a byte budget.
#[derive(Debug)]
pub struct LruShard {
    index: HashMap<Bytes, Slot>,
    slots: Vec<Option<Node>>,
    free: Vec<Slot>,
    head: Option<Slot>,
    tail: Option<Slot>,
    capacity_bytes: usize,
    current_bytes: usize,
}

impl LruShard {
    /// Creates an empty shard with the given byte budget.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity_bytes,
            current_bytes: 0,
        }
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let slot = *self.index.get(key)?;
        self.move_to_front(slot);
        self.node(slot).map(|n| n.value.clone())
    }

    /// Looks up `key` without touching recency.
    pub fn peek(&self, key: &[u8]) -> Option<&Bytes> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|n| &n.value)
    }

    /// Inserts or replaces `key`, then evicts from the LRU end until the
    /// shard fits its budget.
    pub fn put(&mut self, key: Bytes, value: Bytes) -> PutOutcome {
        let mut outcome = PutOutcome::default();

        if let Some(&slot) = self.index.get(&key) {
            let new_cost = entry_cost(&key, &value);
            if let Some(node) = self.slots[slot].as_mut() {
                let old_cost = entry_cost(&node.key, &node.value);
                node.value = value;
                self.current_bytes = self.current_bytes - old_cost + new_cost;
            }
            self.move_to_front(slot);
            outcome.replaced = true;
        } else {
            self.current_bytes += entry_cost(&key, &value);
            let node = Node {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            };
            let slot = match self.free.pop() {
                Some(slot) => {
                    self.slots[slot] = Some(node);
                    slot
                }
                None => {
                    self.slots.push(Some(node));
                    self.slots.len() - 1
                }
            };
            self.push_front(slot);
            self.index.insert(key, slot);
        }

        while self.current_bytes > self.capacity_bytes {
            if self.pop_lru().is_none() {
                break;
            }
            outcome.evicted += 1;
        }

        outcome
    }

    /// Inserts `key` only if it is not resident. Returns `None` if it was.
    pub fn put_if_absent(&mut self, key: Bytes, value: Bytes) -> Option<PutOutcome> {
        if self.index.contains_key(&key) {
            return None;
        }
        Some(self.put(key, value))
    }

    /// Removes and returns the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(Bytes, Bytes)> {
        let slot = self.tail?;
        self.unlink(slot);
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        self.current_bytes -= entry_cost(&node.key, &node.value);
        Some((node.key, node.value))
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently charged against the budget.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Keys from most- to least-recently-used.
    pub fn keys_mru(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            match self.node(slot) {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    #[inline]
    fn node(&self, slot: Slot) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn unlink(&mut self, slot: Slot) {
        let (prev, next) = match self.node(slot) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.slots[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.slots[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.slots[slot].as_mut() {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, slot: Slot) {
        let old_head = self.head;
        if let Some(n) = self.slots[slot].as_mut() {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.slots[h].as_mut() {
                n.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn move_to_front(&mut self, slot: Slot) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }
}
