//! Arena-backed recency list
//!
//! Entries live in a slab of slots addressed by index. The hash map stores
//! slot indices and each slot stores the indices of its neighbours, so the
//! list can be relinked in O(1) without aliased references.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::time::Instant;

struct Node<K, V> {
    key: K,
    value: V,
    cost: u64,
    accessed_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A key/value map ordered by recency. Head is the most recently used entry.
pub(crate) struct LruList<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    // Exact sum; a u64 could overflow with caller-assigned costs
    total_cost: u128,
}

impl<K, V> LruList<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            total_cost: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Sum of entry costs, saturating at `u64::MAX`
    pub fn total_cost(&self) -> u64 {
        u64::try_from(self.total_cost).unwrap_or(u64::MAX)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Look up an entry, refreshing its recency on hit.
    pub fn get<Q>(&mut self, key: &Q, now: Instant) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.node_mut(idx).accessed_at = now;
        self.move_to_head(idx);
        Some(&self.node(idx).value)
    }

    /// Insert or replace an entry and move it to the head.
    ///
    /// Returns the previous value when the key was already present.
    pub fn insert(&mut self, key: K, value: V, cost: u64, now: Instant) -> Option<V> {
        if let Some(&idx) = self.map.get(&key) {
            let node = self.node_mut(idx);
            let old_cost = mem::replace(&mut node.cost, cost);
            let old = mem::replace(&mut node.value, value);
            node.accessed_at = now;
            self.total_cost = self.total_cost - u128::from(old_cost) + u128::from(cost);
            self.move_to_head(idx);
            return Some(old);
        }

        let node = Node {
            key: key.clone(),
            value,
            cost,
            accessed_at: now,
            prev: None,
            next: None,
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
        self.map.insert(key, idx);
        self.total_cost += u128::from(cost);
        self.push_head(idx);
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        Some(self.release_slot(idx))
    }

    /// Remove the least recently used entry.
    pub fn pop_tail(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        if let Some(node) = self.slots[idx].as_ref() {
            self.map.remove(&node.key);
        }
        Some(self.release_slot(idx))
    }

    /// Access time of the least recently used entry.
    pub fn tail_accessed_at(&self) -> Option<Instant> {
        self.tail.map(|idx| self.node(idx).accessed_at)
    }

    /// Empty the list, handing back every value.
    pub fn drain(&mut self) -> Vec<V> {
        let slots = mem::take(&mut self.slots);
        self.map.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.total_cost = 0;
        slots.into_iter().flatten().map(|node| node.value).collect()
    }

    fn release_slot(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let node = self.slots[idx]
            .take()
            .unwrap_or_else(|| unreachable!("indexed slot {idx} is vacant"));
        self.free.push(idx);
        self.total_cost -= u128::from(node.cost);
        (node.key, node.value)
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        self.slots[idx]
            .as_ref()
            .unwrap_or_else(|| unreachable!("indexed slot {idx} is vacant"))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.slots[idx]
            .as_mut()
            .unwrap_or_else(|| unreachable!("indexed slot {idx} is vacant"))
    }

    fn move_to_head(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_head(idx);
    }

    fn push_head(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    /// Walk the list in both directions and check it against the map and totals.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let mut forward = Vec::new();
        let mut cursor = self.head;
        let mut prev = None;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            assert_eq!(node.prev, prev, "broken prev link at slot {idx}");
            assert_eq!(self.map.get(&node.key), Some(&idx), "map/list mismatch");
            forward.push(idx);
            assert!(forward.len() <= self.slots.len(), "cycle in recency list");
            prev = cursor;
            cursor = node.next;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(forward.len(), self.map.len());
        let cost: u128 = forward
            .iter()
            .map(|&idx| u128::from(self.node(idx).cost))
            .sum();
        assert_eq!(cost, self.total_cost);
        let occupied = self.slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(occupied, self.map.len());
    }

    /// Keys from most to least recently used.
    #[cfg(test)]
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::new();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_insert_orders_by_recency() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert("a", 1, 1, now);
        list.insert("b", 2, 1, now);
        list.insert("c", 3, 1, now);

        assert_eq!(list.keys_by_recency(), vec!["c", "b", "a"]);
        assert_eq!(list.len(), 3);
        list.assert_consistent();
    }

    #[test]
    fn test_get_moves_to_head() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert("a", 1, 1, now);
        list.insert("b", 2, 1, now);
        list.insert("c", 3, 1, now);

        assert_eq!(list.get("a", now), Some(&1));
        assert_eq!(list.keys_by_recency(), vec!["a", "c", "b"]);
        list.assert_consistent();
    }

    #[test]
    fn test_get_miss_has_no_side_effects() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert("a", 1, 1, now);
        list.insert("b", 2, 1, now);

        assert_eq!(list.get("zzz", now), None);
        assert_eq!(list.keys_by_recency(), vec!["b", "a"]);
    }

    #[test]
    fn test_replace_updates_cost_and_returns_old_value() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert("a", 1, 10, now);
        list.insert("b", 2, 5, now);

        let old = list.insert("a", 100, 3, now);
        assert_eq!(old, Some(1));
        assert_eq!(list.total_cost(), 8);
        assert_eq!(list.keys_by_recency(), vec!["a", "b"]);
        list.assert_consistent();
    }

    #[test]
    fn test_huge_costs_do_not_overflow() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert("a", 1, u64::MAX, now);
        list.insert("b", 2, 2, now);
        assert_eq!(list.total_cost(), u64::MAX);
        list.assert_consistent();

        list.remove("a");
        assert_eq!(list.total_cost(), 2);

        list.insert("b", 3, u64::MAX, now);
        list.insert("c", 4, u64::MAX, now);
        assert_eq!(list.total_cost(), u64::MAX);
        list.remove("c");
        assert_eq!(list.total_cost(), u64::MAX);
        list.assert_consistent();
    }

    #[test]
    fn test_pop_tail_and_slot_reuse() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert(1, "one", 2, now);
        list.insert(2, "two", 3, now);
        list.insert(3, "three", 4, now);

        assert_eq!(list.pop_tail(), Some((1, "one")));
        assert_eq!(list.total_cost(), 7);
        list.assert_consistent();

        list.insert(4, "four", 1, now);
        assert_eq!(list.slots.len(), 3);
        assert_eq!(list.keys_by_recency(), vec![4, 3, 2]);
        list.assert_consistent();
    }

    #[test]
    fn test_remove_middle_entry() {
        let mut list = LruList::new();
        let now = Instant::now();
        list.insert(1, (), 1, now);
        list.insert(2, (), 1, now);
        list.insert(3, (), 1, now);

        assert!(list.remove(&2).is_some());
        assert!(list.remove(&2).is_none());
        assert_eq!(list.keys_by_recency(), vec![3, 1]);
        list.assert_consistent();
    }

    #[test]
    fn test_tail_accessed_at_tracks_oldest() {
        let mut list = LruList::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        list.insert("old", (), 1, t0);
        list.insert("new", (), 1, t1);
        assert_eq!(list.tail_accessed_at(), Some(t0));

        list.get("old", t1 + Duration::from_secs(1));
        assert_eq!(list.tail_accessed_at(), Some(t1));
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut list = LruList::new();
        let now = Instant::now();
        for i in 0..10 {
            list.insert(i, i * 2, 1, now);
        }
        let mut values = list.drain();
        values.sort();
        assert_eq!(values, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(list.len(), 0);
        assert_eq!(list.total_cost(), 0);
        assert!(list.pop_tail().is_none());
        list.assert_consistent();
    }
}
