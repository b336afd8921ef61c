use log::debug;

/// Bounded table of `(prev_page, curr_page)` redirects. Whenever a node is
/// rewritten to a new physical page, an entry lets outdated parent
/// pointers resolve to the current copy. Capacity is tiny, so a flat
/// array with linear scans is all this needs.
pub struct MappingTable {
    entries: Vec<(u32, u32)>,
    cap: usize,
}

impl MappingTable {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn get(&self, prev: u32) -> Option<u32> {
        self.entries.iter().find(|e| e.0 == prev).map(|e| e.1)
    }

    pub fn first(&self) -> Option<(u32, u32)> {
        self.entries.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().copied()
    }

    /// Record that `prev` is now served by `curr`. Entries that pointed at
    /// `prev` are forwarded to `curr`, and an entry that would map a page
    /// to itself is dropped. Returns false when the table is full and a
    /// new slot would be needed.
    pub fn insert(&mut self, prev: u32, curr: u32) -> bool {
        for e in &mut self.entries {
            if e.1 == prev {
                e.1 = curr;
            }
        }
        self.entries.retain(|e| e.0 != e.1);

        if prev == curr {
            return true;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| e.0 == prev) {
            e.1 = curr;
            return true;
        }
        if self.entries.len() >= self.cap {
            debug!("mapping table full ({} entries)", self.cap);
            return false;
        }
        self.entries.push((prev, curr));
        true
    }

    pub fn remove(&mut self, prev: u32) {
        self.entries.retain(|e| e.0 != prev);
    }

    /// Drop every entry whose key or target falls inside an inclusive
    /// page range (used right before that range is erased and its ids
    /// become reusable).
    pub fn remove_range(&mut self, first: u32, last: u32) {
        self.entries
            .retain(|e| !(e.0 >= first && e.0 <= last) && !(e.1 >= first && e.1 <= last));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut t = MappingTable::new(4);
        assert!(t.insert(3, 9));
        assert_eq!(t.get(3), Some(9));
        assert_eq!(t.get(9), None);

        // re-mapping the same page updates in place
        assert!(t.insert(3, 12));
        assert_eq!(t.get(3), Some(12));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_forwarding_collapses_chains() {
        let mut t = MappingTable::new(4);
        t.insert(3, 9);
        // page 9 is itself superseded; the old entry follows along
        t.insert(9, 15);
        assert_eq!(t.get(3), Some(15));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_self_map_is_removed() {
        let mut t = MappingTable::new(4);
        t.insert(3, 9);
        // 9 moves back onto page 3: the redirect collapses away
        t.insert(9, 3);
        assert_eq!(t.get(3), None);
        assert_eq!(t.get(9), Some(3));
    }

    #[test]
    fn test_capacity_bound() {
        let mut t = MappingTable::new(2);
        assert!(t.insert(1, 11));
        assert!(t.insert(2, 12));
        assert!(!t.insert(3, 13));
        assert_eq!(t.len(), 2);

        t.remove(1);
        assert!(t.insert(3, 13));
    }
}
