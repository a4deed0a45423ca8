//! Recency list of entries holding decoded pixel data
//!
//! Links are entry indices, so growing or shrinking the entry vector never
//! invalidates them. The displayed entry is never in the list.

use lru::LruCache;

/// Index-keyed LRU; most recently used first
pub struct EntryLru {
    list: LruCache<usize, ()>,
}

impl Default for EntryLru {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryLru {
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: LruCache::unbounded(),
        }
    }

    /// Link `index` at the head unless it is displayed or already linked.
    /// An entry that is already linked keeps its position.
    pub fn touch(&mut self, index: usize, displayed: Option<usize>) {
        if displayed == Some(index) || self.list.contains(&index) {
            return;
        }
        self.list.put(index, ());
    }

    /// Unlink `index`, typically because it became the displayed entry
    pub fn remove(&mut self, index: usize) -> bool {
        self.list.pop(&index).is_some()
    }

    /// Keep the `keep` most recent entries and unlink the rest.
    /// Returns the evicted indices, least recent first.
    pub fn prune(&mut self, keep: usize) -> Vec<usize> {
        let mut evicted = Vec::new();
        while self.list.len() > keep {
            match self.list.pop_lru() {
                Some((index, ())) => evicted.push(index),
                None => break,
            }
        }
        evicted
    }

    /// Drop `removed` and shift higher indices down by one, keeping the order.
    pub fn remap_after_removal(&mut self, removed: usize) {
        let order = self.entries();
        self.list.clear();
        for index in order.into_iter().rev() {
            if index == removed {
                continue;
            }
            let shifted = if index > removed { index - 1 } else { index };
            self.list.put(shifted, ());
        }
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.list.contains(&index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Linked indices, most recent first
    #[must_use]
    pub fn entries(&self) -> Vec<usize> {
        self.list.iter().map(|(index, ())| *index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_touch_skips_displayed_entry() {
        let mut lru = EntryLru::new();
        lru.touch(2, Some(2));
        assert!(lru.is_empty());

        lru.touch(2, Some(0));
        assert!(lru.contains(2));
    }

    #[test]
    fn lru_touch_does_not_promote() {
        let mut lru = EntryLru::new();
        lru.touch(1, None);
        lru.touch(2, None);
        lru.touch(1, None);
        assert_eq!(lru.entries(), vec![2, 1]);
    }

    #[test]
    fn lru_prune_evicts_oldest() {
        let mut lru = EntryLru::new();
        for i in 0..8 {
            lru.touch(i, None);
        }

        let evicted = lru.prune(5);
        assert_eq!(evicted, vec![0, 1, 2]);
        assert_eq!(lru.len(), 5);
        assert_eq!(lru.entries(), vec![7, 6, 5, 4, 3]);

        assert!(lru.prune(5).is_empty());
        assert_eq!(lru.prune(0).len(), 5);
        assert!(lru.is_empty());
    }

    #[test]
    fn lru_remap_after_removal() {
        let mut lru = EntryLru::new();
        for i in [4, 1, 6, 2] {
            lru.touch(i, None);
        }
        lru.remap_after_removal(2);
        assert_eq!(lru.entries(), vec![5, 1, 3]);

        lru.remap_after_removal(0);
        assert_eq!(lru.entries(), vec![4, 0, 2]);
    }
}
