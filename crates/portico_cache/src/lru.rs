//! Byte-budgeted LRU cache: a key map plus a doubly-linked recency list,
//! both mutated together under one coarse lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{CacheError, Measured};

struct Node<T> {
    key: String,
    item: Arc<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// List nodes live in an index arena; `free` recycles vacated slots.
struct Inner<T> {
    map: HashMap<String, usize>,
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    cur_size: usize,
}

impl<T: Measured> Inner<T> {
    fn alloc(&mut self, node: Node<T>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn unlink(&mut self, idx: usize) {
        let Some(node) = self.nodes[idx].as_ref() else {
            return;
        };
        let (prev, next) = (node.prev, node.next);

        match prev {
            Some(p) => {
                if let Some(prev_node) = self.nodes[p].as_mut() {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(next_node) = self.nodes[n].as_mut() {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(head_node) = self.nodes[h].as_mut() {
                    head_node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// Drop the entry for `key`, updating the byte total.
    fn remove_entry(&mut self, key: &str) {
        let Some(idx) = self.map.remove(key) else {
            return;
        };
        self.unlink(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.cur_size -= node.item.size();
        }
        self.free.push(idx);
    }

    /// Evict the least-recently-used entry. Returns false on an empty list.
    fn evict_tail(&mut self) -> bool {
        let Some(idx) = self.tail else {
            return false;
        };
        let Some(key) = self.nodes[idx].as_ref().map(|n| n.key.clone()) else {
            return false;
        };
        debug!(target: "portico::cache", %key, "Evicting LRU entry");
        self.remove_entry(&key);
        true
    }
}

/// Thread-safe LRU cache with an entry-size eviction budget.
pub struct LruCache<T> {
    max_size: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> std::fmt::Debug for LruCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl<T: Measured> LruCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                nodes: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                cur_size: 0,
            }),
        }
    }

    /// Insert or replace `key`. Entries larger than the whole budget are
    /// rejected and the cache is left unchanged; otherwise tail entries are
    /// evicted until the new one fits, and it becomes most recently used.
    pub fn add(&self, key: &str, item: Arc<T>) -> Result<(), CacheError> {
        let size = item.size();
        if size > self.max_size {
            return Err(CacheError::ExceedsMaxSize);
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        inner.remove_entry(key);
        while inner.cur_size + size > self.max_size {
            if !inner.evict_tail() {
                break;
            }
        }

        let idx = inner.alloc(Node {
            key: key.to_string(),
            item,
            prev: None,
            next: None,
        });
        inner.push_front(idx);
        inner.map.insert(key.to_string(), idx);
        inner.cur_size += size;
        Ok(())
    }

    /// Fetch `key`, promoting it to most recently used on a hit.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let idx = *inner.map.get(key)?;
        if inner.head != Some(idx) {
            inner.unlink(idx);
            inner.push_front(idx);
        }
        inner.nodes[idx].as_ref().map(|n| n.item.clone())
    }

    /// Drop `key` if present; a miss is a no-op.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove_entry(key);
    }

    /// Current byte total of all stored entries.
    pub fn current_size(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cur_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blob(usize);

    impl Measured for Blob {
        fn size(&self) -> usize {
            self.0
        }
    }

    fn blob(size: usize) -> Arc<Blob> {
        Arc::new(Blob(size))
    }

    #[test]
    fn add_then_get_round_trip() {
        let cache = LruCache::new(100);
        assert!(cache.get("a").is_none());
        cache.add("a", blob(10)).unwrap();
        let hit = cache.get("a").expect("should hit after add");
        assert_eq!(hit.size(), 10);
        assert_eq!(cache.current_size(), 10);
    }

    #[test]
    fn replacement_counts_new_size_only() {
        let cache = LruCache::new(100);
        cache.add("k", blob(30)).unwrap();
        cache.add("k", blob(7)).unwrap();
        assert_eq!(cache.current_size(), 7);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").expect("replaced entry").size(), 7);
    }

    #[test]
    fn oversize_entry_rejected_without_mutation() {
        let cache = LruCache::new(10);
        cache.add("keep", blob(4)).unwrap();
        let err = cache.add("big", blob(11)).unwrap_err();
        assert_eq!(err, CacheError::ExceedsMaxSize);
        assert_eq!(cache.current_size(), 4);
        assert!(cache.get("keep").is_some());
        assert!(cache.get("big").is_none());
    }

    #[test]
    fn oversize_replacement_keeps_existing_entry() {
        let cache = LruCache::new(10);
        cache.add("k", blob(4)).unwrap();
        assert!(cache.add("k", blob(11)).is_err());
        assert_eq!(cache.get("k").expect("old entry survives").size(), 4);
        assert_eq!(cache.current_size(), 4);
    }

    #[test]
    fn exact_max_fits_into_empty_cache() {
        let cache = LruCache::new(10);
        cache.add("full", blob(10)).unwrap();
        assert_eq!(cache.current_size(), 10);
        assert!(cache.get("full").is_some());
    }

    #[test]
    fn evicts_tail_first() {
        let cache = LruCache::new(12);
        cache.add("a", blob(4)).unwrap();
        cache.add("b", blob(4)).unwrap();
        cache.add("c", blob(4)).unwrap();
        // "a" is the least recently used entry.
        cache.add("d", blob(4)).unwrap();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.current_size(), 12);
    }

    #[test]
    fn get_promotes_entry_out_of_eviction_order() {
        let cache = LruCache::new(9);
        cache.add("a", blob(3)).unwrap();
        cache.add("b", blob(3)).unwrap();
        cache.add("c", blob(3)).unwrap();
        assert!(cache.get("a").is_some());
        // "b" is now the tail.
        cache.add("d", blob(3)).unwrap();
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn evicting_sole_entry_resets_the_list() {
        let cache = LruCache::new(5);
        cache.add("x", blob(5)).unwrap();
        cache.add("y", blob(5)).unwrap();
        assert!(cache.get("x").is_none());
        assert_eq!(cache.get("y").expect("y stored").size(), 5);
        assert_eq!(cache.current_size(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn multi_entry_eviction_until_fit() {
        let cache = LruCache::new(10);
        cache.add("a", blob(4)).unwrap();
        cache.add("b", blob(4)).unwrap();
        // Needs 8 bytes free, so both existing entries go.
        cache.add("c", blob(9)).unwrap();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.current_size(), 9);
    }

    #[test]
    fn remove_updates_accounting() {
        let cache = LruCache::new(20);
        cache.add("a", blob(6)).unwrap();
        cache.add("b", blob(6)).unwrap();
        cache.remove("a");
        assert_eq!(cache.current_size(), 6);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        // Removing an absent key is a no-op.
        cache.remove("missing");
        assert_eq!(cache.current_size(), 6);
    }

    #[test]
    fn get_at_head_still_hits() {
        let cache = LruCache::new(10);
        cache.add("a", blob(2)).unwrap();
        assert!(cache.get("a").is_some());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.current_size(), 2);
    }

    #[test]
    fn size_accounting_matches_after_mixed_operations() {
        let cache = LruCache::new(50);
        cache.add("a", blob(10)).unwrap();
        cache.add("b", blob(20)).unwrap();
        cache.add("a", blob(5)).unwrap();
        cache.remove("b");
        cache.add("c", blob(45)).unwrap();
        assert!(cache.current_size() <= cache.max_size());
        assert_eq!(cache.current_size(), 50);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
