//! Fixed-capacity LRU arena.
//!
//! Entries live in a slot vector indexed by key through a `HashMap`; a
//! doubly linked recency list threaded through the slots by index gives
//! O(1) touch and O(1) eviction of the least recently used entry.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    /// Towards the most recently used end.
    prev: usize,
    /// Towards the least recently used end.
    next: usize,
}

pub(crate) struct LruArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruArena<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(4096)),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity.min(4096)),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Look up and mark as most recently used.
    pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        self.node(idx).map(|n| &n.value)
    }

    /// Look up without changing recency.
    pub(crate) fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.node(idx).map(|n| &n.value)
    }

    /// Insert or replace, marking the key most recently used.
    ///
    /// Returns the evicted entry when the arena was full.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.value = value;
            }
            self.touch(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|n| n.value)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Least recently used key, if any.
    #[cfg(test)]
    pub(crate) fn lru_key(&self) -> Option<&K> {
        self.node(self.tail).map(|n| &n.key)
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        let idx = self.tail;
        if idx == NIL {
            return None;
        }
        self.unlink(idx);
        self.free.push(idx);
        let node = self.slots[idx].take()?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn node(&self, idx: usize) -> Option<&Node<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.node(idx) {
            Some(n) => (n.prev, n.next),
            None => return,
        };

        if prev == NIL {
            self.head = next;
        } else if let Some(p) = self.slots[prev].as_mut() {
            p.next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else if let Some(n) = self.slots[next].as_mut() {
            n.prev = prev;
        }

        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            if let Some(h) = self.slots[old_head].as_mut() {
                h.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut arena = LruArena::new(3);
        arena.insert("a", 1);
        arena.insert("b", 2);
        arena.insert("c", 3);
        assert_eq!(arena.lru_key(), Some(&"a"));

        // Touching "a" makes "b" the eviction candidate.
        assert_eq!(arena.get(&"a"), Some(&1));
        assert_eq!(arena.lru_key(), Some(&"b"));

        let evicted = arena.insert("d", 4);
        assert_eq!(evicted, Some(("b", 2)));
        assert_eq!(arena.len(), 3);
        assert!(arena.peek(&"b").is_none());
        assert_eq!(arena.peek(&"d"), Some(&4));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut arena = LruArena::new(2);
        arena.insert("a", 1);
        arena.insert("b", 2);
        assert_eq!(arena.peek(&"a"), Some(&1));
        assert_eq!(arena.insert("c", 3), Some(("a", 1)));
    }

    #[test]
    fn test_replace_keeps_len_and_touches() {
        let mut arena = LruArena::new(2);
        arena.insert("a", 1);
        arena.insert("b", 2);
        assert_eq!(arena.insert("a", 10), None);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.peek(&"a"), Some(&10));
        assert_eq!(arena.lru_key(), Some(&"b"));
    }

    #[test]
    fn test_remove_reuses_slot() {
        let mut arena = LruArena::new(3);
        arena.insert("a", 1);
        arena.insert("b", 2);
        arena.insert("c", 3);
        assert_eq!(arena.remove(&"b"), Some(2));
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.lru_key(), Some(&"a"));

        arena.insert("d", 4);
        assert_eq!(arena.slots.len(), 3);
        assert_eq!(arena.lru_key(), Some(&"a"));

        arena.remove(&"a");
        arena.remove(&"c");
        arena.remove(&"d");
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.lru_key(), None);
        arena.insert("e", 5);
        assert_eq!(arena.lru_key(), Some(&"e"));
    }

    #[test]
    fn test_capacity_one() {
        let mut arena = LruArena::new(1);
        arena.insert(1u32, "x");
        assert_eq!(arena.insert(2u32, "y"), Some((1, "x")));
        assert_eq!(arena.len(), 1);
        arena.clear();
        assert_eq!(arena.len(), 0);
    }
}
