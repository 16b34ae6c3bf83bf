//! Bounded in-memory tier.
//!
//! A hash map from key to arena slot, with the slots threaded on a doubly
//! linked list ordered from most to least recently used. Eviction always
//! takes the least recently used end, so eviction order is fully determined
//! by the sequence of `get`/`insert` calls.

use std::collections::HashMap;

const NIL: usize = usize::MAX;

struct Slot<V> {
    key: String,
    value: V,
    cost: usize,
    prev: usize,
    next: usize,
}

pub struct MemoryCache<V> {
    map: HashMap<String, usize>,
    slots: Vec<Option<Slot<V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    max_entries: usize,
    max_bytes: usize,
    total_bytes: usize,
}

impl<V> MemoryCache<V> {
    /// Both bounds are clamped to at least 1.
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
            total_bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.detach(index);
        self.push_front(index);
        self.slots[index].as_ref().map(|slot| &slot.value)
    }

    /// Looks up `key` without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.slots[index].as_ref().map(|slot| &slot.value)
    }

    /// Inserts or replaces `key`, then evicts least recently used entries
    /// until both bounds hold. Returns what was evicted.
    ///
    /// A value whose `cost` alone exceeds the byte bound is not admitted, and
    /// any previous value under `key` is dropped.
    pub fn insert(&mut self, key: String, value: V, cost: usize) -> Vec<(String, V)> {
        if cost > self.max_bytes {
            self.remove(&key);
            return Vec::new();
        }

        if let Some(&index) = self.map.get(&key) {
            if let Some(slot) = self.slots[index].as_mut() {
                self.total_bytes = self.total_bytes - slot.cost + cost;
                slot.value = value;
                slot.cost = cost;
            }
            self.detach(index);
            self.push_front(index);
        } else {
            let slot = Slot {
                key: key.clone(),
                value,
                cost,
                prev: NIL,
                next: NIL,
            };
            let index = match self.free.pop() {
                Some(index) => {
                    self.slots[index] = Some(slot);
                    index
                }
                None => {
                    self.slots.push(Some(slot));
                    self.slots.len() - 1
                }
            };
            self.map.insert(key, index);
            self.total_bytes += cost;
            self.push_front(index);
        }

        let mut evicted = Vec::new();
        while self.map.len() > self.max_entries || self.total_bytes > self.max_bytes {
            match self.pop_back() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = *self.map.get(key)?;
        self.take(index).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.total_bytes = 0;
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(slot) = self.slots.get(cursor).and_then(Option::as_ref) {
            keys.push(slot.key.as_str());
            cursor = slot.next;
        }
        keys
    }

    fn pop_back(&mut self) -> Option<(String, V)> {
        if self.tail == NIL {
            return None;
        }
        self.take(self.tail)
    }

    fn take(&mut self, index: usize) -> Option<(String, V)> {
        self.detach(index);
        let slot = self.slots[index].take()?;
        self.map.remove(&slot.key);
        self.total_bytes -= slot.cost;
        self.free.push(index);
        Some((slot.key, slot.value))
    }

    fn detach(&mut self, index: usize) {
        let (prev, next) = match self.slots[index].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };

        if prev == NIL {
            self.head = next;
        } else if let Some(slot) = self.slots[prev].as_mut() {
            slot.next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else if let Some(slot) = self.slots[next].as_mut() {
            slot.prev = prev;
        }

        if let Some(slot) = self.slots[index].as_mut() {
            slot.prev = NIL;
            slot.next = NIL;
        }
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[index].as_mut() {
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head == NIL {
            self.tail = index;
        } else if let Some(slot) = self.slots[old_head].as_mut() {
            slot.prev = index;
        }
        self.head = index;
    }
}
