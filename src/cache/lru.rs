//! LRU recency policy
//!
//! Index-map plus intrusive doubly-linked list over a slab; `touch`,
//! `remove` and `pop_coldest` are O(1).

use ahash::AHashMap;
use bytes::Bytes;

/// Slab entry carrying its key so the cold end can be popped without a scan
struct PolicyEntry {
    key: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Recency ranking over tracked keys, hottest at the head
pub struct LruPolicy {
    map: AHashMap<Bytes, usize>,
    entries: Vec<Option<PolicyEntry>>,
    free_list: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self {
            map: AHashMap::new(),
            entries: Vec::new(),
            free_list: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Record an access: tracked keys move to the hot end, unknown keys are
    /// inserted there
    pub fn touch(&mut self, key: &Bytes) {
        if let Some(&index) = self.map.get(key) {
            self.move_to_front(index);
        } else {
            let index = self.allocate_entry(key.clone());
            self.map.insert(key.clone(), index);
            self.push_front(index);
        }
    }

    /// Stop tracking a key
    pub fn remove(&mut self, key: &Bytes) -> bool {
        if let Some(index) = self.map.remove(key) {
            self.unlink(index);
            self.entries[index] = None;
            self.free_list.push(index);
            true
        } else {
            false
        }
    }

    /// The coldest tracked key, if any
    pub fn coldest(&self) -> Option<&Bytes> {
        self.tail
            .and_then(|i| self.entries[i].as_ref())
            .map(|e| &e.key)
    }

    /// Remove and return the coldest tracked key
    pub fn pop_coldest(&mut self) -> Option<Bytes> {
        let key = self.coldest()?.clone();
        self.remove(&key);
        Some(key)
    }

    pub fn contains(&self, key: &Bytes) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn allocate_entry(&mut self, key: Bytes) -> usize {
        let entry = PolicyEntry {
            key,
            prev: None,
            next: None,
        };
        if let Some(index) = self.free_list.pop() {
            self.entries[index] = Some(entry);
            index
        } else {
            self.entries.push(Some(entry));
            self.entries.len() - 1
        }
    }

    fn push_front(&mut self, index: usize) {
        if let Some(entry) = &mut self.entries[index] {
            entry.prev = None;
            entry.next = self.head;
        }

        if let Some(old_head) = self.head {
            if let Some(entry) = &mut self.entries[old_head] {
                entry.prev = Some(index);
            }
        }

        self.head = Some(index);

        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = if let Some(entry) = &self.entries[index] {
            (entry.prev, entry.next)
        } else {
            return;
        };

        if let Some(prev_index) = prev {
            if let Some(entry) = &mut self.entries[prev_index] {
                entry.next = next;
            }
        } else {
            self.head = next;
        }

        if let Some(next_index) = next {
            if let Some(entry) = &mut self.entries[next_index] {
                entry.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }

    fn move_to_front(&mut self, index: usize) {
        if self.head == Some(index) {
            return;
        }
        self.unlink(index);
        self.push_front(index);
    }
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_coldest_is_least_recently_touched() {
        let mut lru = LruPolicy::new();
        lru.touch(&key("a"));
        lru.touch(&key("b"));
        lru.touch(&key("c"));

        assert_eq!(lru.coldest(), Some(&key("a")));

        // Re-touching "a" makes "b" the coldest
        lru.touch(&key("a"));
        assert_eq!(lru.coldest(), Some(&key("b")));
    }

    #[test]
    fn test_pop_coldest_drains_in_recency_order() {
        let mut lru = LruPolicy::new();
        for name in ["a", "b", "c"] {
            lru.touch(&key(name));
        }
        lru.touch(&key("a"));

        assert_eq!(lru.pop_coldest(), Some(key("b")));
        assert_eq!(lru.pop_coldest(), Some(key("c")));
        assert_eq!(lru.pop_coldest(), Some(key("a")));
        assert_eq!(lru.pop_coldest(), None);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_remove_and_slab_reuse() {
        let mut lru = LruPolicy::new();
        lru.touch(&key("a"));
        lru.touch(&key("b"));

        assert!(lru.remove(&key("a")));
        assert!(!lru.remove(&key("a")));
        assert_eq!(lru.len(), 1);

        // The freed slot is reused
        lru.touch(&key("c"));
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.coldest(), Some(&key("b")));
    }
}
