//! The consistent-hash ring.
//!
//! Entries are kept in a `Vec` sorted by ring position. Every query is a
//! binary search over that order; the successor of the last entry is the
//! first. A node at index `i` owns the interval
//! `(entries[i-1].position, entries[i].position]`.

use crate::entry::RingEntry;
use crate::RingError;
use rand::Rng;
use ringkv_common::{hash_key, RingHash};

// ---------------------------------------------------------------------------
// PoppedEntry
// ---------------------------------------------------------------------------

/// Outcome of [`HashRing::pop_one`]: the removed entry and its neighbours as
/// they were before removal.
#[derive(Debug, Clone)]
pub struct PoppedEntry {
    pub predecessor: RingEntry,
    pub removed: RingEntry,
    pub successor: RingEntry,
}

// ---------------------------------------------------------------------------
// HashRing
// ---------------------------------------------------------------------------

/// Sorted, wrap-around set of [`RingEntry`].
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    entries: Vec<RingEntry>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from arbitrary entries. Later duplicates of an
    /// `(address, port)` pair are dropped.
    pub fn from_entries(entries: impl IntoIterator<Item = RingEntry>) -> Self {
        let mut ring = Self::new();
        for entry in entries {
            if let Err(e) = ring.add(entry) {
                tracing::warn!("skipping ring entry: {}", e);
            }
        }
        ring
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in ring order.
    pub fn entries(&self) -> &[RingEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RingEntry> {
        self.entries.iter()
    }

    fn search(&self, position: &RingHash) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|probe| probe.position.cmp(position))
    }

    /// Index of a member entry.
    fn index_of(&self, entry: &RingEntry) -> Result<usize, RingError> {
        if self.entries.is_empty() {
            return Err(RingError::Empty);
        }
        match self.search(&entry.position) {
            Ok(idx) if self.entries[idx] == *entry => Ok(idx),
            _ => Err(RingError::NotMember(entry.to_string())),
        }
    }

    // ── Mutation ──

    /// Insert an entry, keeping ring order.
    pub fn add(&mut self, entry: RingEntry) -> Result<(), RingError> {
        if self
            .entries
            .iter()
            .any(|e| e.address == entry.address && e.port == entry.port)
        {
            return Err(RingError::Duplicate(entry.addr()));
        }
        match self.search(&entry.position) {
            Ok(_) => Err(RingError::Duplicate(entry.addr())),
            Err(idx) => {
                self.entries.insert(idx, entry);
                Ok(())
            }
        }
    }

    /// Remove a member. Returns it if it was present.
    pub fn remove(&mut self, entry: &RingEntry) -> Option<RingEntry> {
        let idx = self.index_of(entry).ok()?;
        Some(self.entries.remove(idx))
    }

    /// Remove every listed entry that is a member; returns the ones removed.
    pub fn remove_all<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a RingEntry>,
    ) -> Vec<RingEntry> {
        entries
            .into_iter()
            .filter_map(|e| self.remove(e))
            .collect()
    }

    /// Move every entry of `other` into this ring.
    pub fn merge(&mut self, other: HashRing) {
        for entry in other.entries {
            if let Err(e) = self.add(entry) {
                tracing::debug!("merge skipped entry: {}", e);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove `n` entries chosen uniformly at random and return them as a
    /// separate ring.
    pub fn pop(&mut self, n: usize) -> Result<HashRing, RingError> {
        self.pop_with(n, &mut rand::thread_rng())
    }

    pub fn pop_with<R: Rng>(
        &mut self,
        n: usize,
        rng: &mut R,
    ) -> Result<HashRing, RingError> {
        if n > self.entries.len() {
            return Err(RingError::NotEnough {
                requested: n,
                available: self.entries.len(),
            });
        }
        let mut popped = HashRing::new();
        for _ in 0..n {
            let idx = rng.gen_range(0..self.entries.len());
            let entry = self.entries.remove(idx);
            popped.entries.push(entry);
        }
        popped.entries.sort_by(|a, b| a.position.cmp(&b.position));
        Ok(popped)
    }

    /// Remove one random entry. Its neighbours are computed before removal,
    /// so in a one-entry ring all three fields are the same entry.
    pub fn pop_one(&mut self) -> Result<PoppedEntry, RingError> {
        self.pop_one_with(&mut rand::thread_rng())
    }

    pub fn pop_one_with<R: Rng>(&mut self, rng: &mut R) -> Result<PoppedEntry, RingError> {
        if self.entries.is_empty() {
            return Err(RingError::Empty);
        }
        let idx = rng.gen_range(0..self.entries.len());
        let predecessor = self.entries[self.prev_index(idx)].clone();
        let successor = self.entries[self.next_index(idx)].clone();
        let removed = self.entries.remove(idx);
        Ok(PoppedEntry {
            predecessor,
            removed,
            successor,
        })
    }

    // ── Queries ──

    fn prev_index(&self, idx: usize) -> usize {
        if idx == 0 {
            self.entries.len() - 1
        } else {
            idx - 1
        }
    }

    fn next_index(&self, idx: usize) -> usize {
        (idx + 1) % self.entries.len()
    }

    pub fn contains(&self, entry: &RingEntry) -> bool {
        self.index_of(entry).is_ok()
    }

    /// Whether any entry sits exactly at `position`.
    pub fn contains_position(&self, position: &RingHash) -> bool {
        self.search(position).is_ok()
    }

    /// Entry immediately before `entry`, wrapping to the last.
    pub fn predecessor(&self, entry: &RingEntry) -> Result<&RingEntry, RingError> {
        let idx = self.index_of(entry)?;
        Ok(&self.entries[self.prev_index(idx)])
    }

    /// Entry immediately after `entry`, wrapping to the first.
    pub fn successor(&self, entry: &RingEntry) -> Result<&RingEntry, RingError> {
        let idx = self.index_of(entry)?;
        Ok(&self.entries[self.next_index(idx)])
    }

    /// The entry responsible for `key`.
    pub fn route(&self, key: &str) -> Result<&RingEntry, RingError> {
        self.route_hash(&hash_key(key))
    }

    /// First entry whose position is >= `position`, wrapping to the first.
    pub fn route_hash(&self, position: &RingHash) -> Result<&RingEntry, RingError> {
        if self.entries.is_empty() {
            return Err(RingError::Empty);
        }
        let idx = match self.search(position) {
            Ok(idx) => idx,
            Err(insert_at) => insert_at % self.entries.len(),
        };
        Ok(&self.entries[idx])
    }

    /// Binary-tree fan-out: entries at indices `2i+1` and `2i+2` (mod len),
    /// excluding `entry` itself. A non-member has no targets.
    pub fn ping_targets(&self, entry: &RingEntry) -> Vec<RingEntry> {
        let Ok(idx) = self.index_of(entry) else {
            return Vec::new();
        };
        let len = self.entries.len();
        [(2 * idx + 1) % len, (2 * idx + 2) % len]
            .into_iter()
            .filter(|&i| i != idx)
            .map(|i| self.entries[i].clone())
            .collect()
    }

    /// `(predecessor.position, entry.position)`: the primary range bounds.
    pub fn primary_range(&self, entry: &RingEntry) -> Result<(RingHash, RingHash), RingError> {
        let pred = self.predecessor(entry)?;
        Ok((pred.position, entry.position))
    }

    /// Bounds of the primary range widened by `steps_back` predecessors.
    /// `steps_back == 1` is the primary range; once `steps_back` reaches the
    /// ring size the bounds coincide and cover the whole ring.
    pub fn widened_range(
        &self,
        entry: &RingEntry,
        steps_back: usize,
    ) -> Result<(RingHash, RingHash), RingError> {
        let idx = self.index_of(entry)?;
        let len = self.entries.len();
        let lower = (idx + len - steps_back.min(len)) % len;
        Ok((self.entries[lower].position, entry.position))
    }

    // ── Serialization ──

    /// Newline-joined `"name address port"` lines in ring order.
    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(RingEntry::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the text form. Lines split on `\r?\n`; blank lines are skipped.
    pub fn from_text(text: &str) -> Result<Self, RingError> {
        let mut ring = Self::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            ring.add(RingEntry::parse_line(line)?)?;
        }
        Ok(ring)
    }
}

impl<'a> IntoIterator for &'a HashRing {
    type Item = &'a RingEntry;
    type IntoIter = std::slice::Iter<'a, RingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn entries(n: u16) -> Vec<RingEntry> {
        (0..n)
            .map(|i| RingEntry::new(format!("node{}", i), "127.0.0.1", 50000 + i))
            .collect()
    }

    fn make_ring(n: u16) -> HashRing {
        HashRing::from_entries(entries(n))
    }

    fn at(first: u8) -> RingHash {
        let mut b = [0u8; 16];
        b[0] = first;
        RingHash::from_bytes(b)
    }

    fn fixed(name: &str, port: u16, first: u8) -> RingEntry {
        RingEntry::with_position(name, "h", port, at(first))
    }

    /// Sort-and-scan reference for `route`.
    fn reference_route(all: &[RingEntry], key: &str) -> RingEntry {
        let mut sorted = all.to_vec();
        sorted.sort_by(|a, b| a.position.cmp(&b.position));
        let h = hash_key(key);
        sorted
            .iter()
            .find(|e| e.position >= h)
            .unwrap_or(&sorted[0])
            .clone()
    }

    #[test]
    fn test_from_entries_drops_duplicate_addresses() {
        let mut list = entries(3);
        list.push(RingEntry::new("again", "127.0.0.1", 50001));
        let ring = HashRing::from_entries(list);
        assert_eq!(ring.len(), 3);
        assert!(ring.entries().iter().all(|e| e.name != "again"));
    }

    #[test]
    fn test_entries_are_sorted() {
        let ring = make_ring(10);
        let positions: Vec<_> = ring.iter().map(|e| e.position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn test_route_matches_reference() {
        let all = entries(7);
        let ring = HashRing::from_entries(all.clone());
        for i in 0..500 {
            let key = format!("key-{}", i);
            assert_eq!(*ring.route(&key).unwrap(), reference_route(&all, &key));
        }
    }

    #[test]
    fn test_route_independent_of_insertion_order() {
        let mut all = entries(9);
        let ring_a = HashRing::from_entries(all.clone());
        let mut rng = StdRng::seed_from_u64(7);
        all.shuffle(&mut rng);
        let ring_b = HashRing::from_entries(all);
        for i in 0..200 {
            let key = format!("k{}", i);
            assert_eq!(ring_a.route(&key).unwrap(), ring_b.route(&key).unwrap());
        }
    }

    #[test]
    fn test_route_wraps_and_hits_exact() {
        let ring = HashRing::from_entries(vec![fixed("a", 1, 10), fixed("b", 2, 20)]);
        assert_eq!(ring.route_hash(&at(5)).unwrap().name, "a");
        assert_eq!(ring.route_hash(&at(10)).unwrap().name, "a");
        assert_eq!(ring.route_hash(&at(15)).unwrap().name, "b");
        assert_eq!(ring.route_hash(&at(200)).unwrap().name, "a", "wraps");
    }

    #[test]
    fn test_route_single_and_empty() {
        let ring = make_ring(1);
        for i in 0..20 {
            assert_eq!(ring.route(&format!("{}", i)).unwrap().name, "node0");
        }
        let empty = HashRing::new();
        assert!(matches!(empty.route("x"), Err(RingError::Empty)));
    }

    #[test]
    fn test_predecessor_successor_inverse() {
        let ring = make_ring(8);
        for e in ring.iter() {
            let succ = ring.successor(e).unwrap();
            assert_eq!(ring.predecessor(succ).unwrap(), e);
            let pred = ring.predecessor(e).unwrap();
            assert_eq!(ring.successor(pred).unwrap(), e);
        }
    }

    #[test]
    fn test_neighbours_wrap() {
        let ring = make_ring(5);
        let first = &ring.entries()[0];
        let last = &ring.entries()[4];
        assert_eq!(ring.predecessor(first).unwrap(), last);
        assert_eq!(ring.successor(last).unwrap(), first);
    }

    #[test]
    fn test_single_entry_is_own_neighbour() {
        let ring = make_ring(1);
        let only = &ring.entries()[0];
        assert_eq!(ring.predecessor(only).unwrap(), only);
        assert_eq!(ring.successor(only).unwrap(), only);
    }

    #[test]
    fn test_non_member_queries() {
        let ring = make_ring(3);
        let stranger = RingEntry::new("x", "10.9.9.9", 1);
        assert!(matches!(
            ring.predecessor(&stranger),
            Err(RingError::NotMember(_))
        ));
        assert!(ring.ping_targets(&stranger).is_empty());
        assert!(!ring.contains(&stranger));
    }

    #[test]
    fn test_ping_targets_tree() {
        let ring = make_ring(7);
        let e = ring.entries();
        assert_eq!(ring.ping_targets(&e[0]), vec![e[1].clone(), e[2].clone()]);
        assert_eq!(ring.ping_targets(&e[2]), vec![e[5].clone(), e[6].clone()]);
        // 2*3+1 = 7 -> 0, 2*3+2 = 8 -> 1
        assert_eq!(ring.ping_targets(&e[3]), vec![e[0].clone(), e[1].clone()]);
    }

    #[test]
    fn test_ping_targets_exclude_self() {
        let ring = make_ring(2);
        let e = ring.entries();
        assert_eq!(ring.ping_targets(&e[0]), vec![e[1].clone()]);
        assert_eq!(ring.ping_targets(&e[1]), vec![e[0].clone()]);
        let single = make_ring(1);
        assert!(single.ping_targets(&single.entries()[0]).is_empty());
    }

    #[test]
    fn test_add_rejects_duplicate_addr() {
        let mut ring = make_ring(3);
        let dup = RingEntry::new("other-name", "127.0.0.1", 50001);
        assert!(matches!(ring.add(dup), Err(RingError::Duplicate(_))));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_remove_and_remove_all() {
        let all = entries(5);
        let mut ring = HashRing::from_entries(all.clone());
        assert!(ring.remove(&all[2]).is_some());
        assert!(ring.remove(&all[2]).is_none());
        let removed = ring.remove_all(&all[0..3]);
        assert_eq!(removed.len(), 2);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_pop_n() {
        let mut ring = make_ring(10);
        let mut rng = StdRng::seed_from_u64(42);
        let popped = ring.pop_with(4, &mut rng).unwrap();
        assert_eq!(popped.len(), 4);
        assert_eq!(ring.len(), 6);
        for e in popped.iter() {
            assert!(!ring.contains(e));
        }
        let positions: Vec<_> = popped.iter().map(|e| e.position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert!(matches!(
            ring.pop(7),
            Err(RingError::NotEnough {
                requested: 7,
                available: 6
            })
        ));
    }

    #[test]
    fn test_pop_one_reports_old_neighbours() {
        let original = make_ring(6);
        let mut ring = original.clone();
        let popped = ring.pop_one().unwrap();
        assert_eq!(
            original.predecessor(&popped.removed).unwrap(),
            &popped.predecessor
        );
        assert_eq!(
            original.successor(&popped.removed).unwrap(),
            &popped.successor
        );
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.successor(&popped.predecessor).unwrap(), &popped.successor);
    }

    #[test]
    fn test_pop_one_empty() {
        let mut ring = HashRing::new();
        assert!(matches!(ring.pop_one(), Err(RingError::Empty)));
    }

    #[test]
    fn test_merge_keeps_order() {
        let all = entries(8);
        let mut a = HashRing::from_entries(all[..4].to_vec());
        let b = HashRing::from_entries(all[4..].to_vec());
        a.merge(b);
        assert_eq!(a.len(), 8);
        let reference = HashRing::from_entries(all);
        assert_eq!(a.entries(), reference.entries());
    }

    #[test]
    fn test_text_roundtrip() {
        let ring = make_ring(4);
        let text = ring.to_text();
        assert_eq!(text.lines().count(), 4);
        let parsed = HashRing::from_text(&text).unwrap();
        assert_eq!(parsed.entries(), ring.entries());
    }

    #[test]
    fn test_from_text_crlf_and_blank_lines() {
        let text = "a 127.0.0.1 1\r\n\r\nb 127.0.0.1 2\n";
        let ring = HashRing::from_text(text).unwrap();
        assert_eq!(ring.len(), 2);
        assert!(HashRing::from_text("").unwrap().is_empty());
        assert!(HashRing::from_text("bad line").is_err());
    }

    #[test]
    fn test_primary_and_widened_ranges() {
        let ring = HashRing::from_entries(vec![
            fixed("a", 1, 10),
            fixed("b", 2, 20),
            fixed("c", 3, 30),
            fixed("d", 4, 40),
            fixed("e", 5, 50),
        ]);
        let c = &ring.entries()[2];
        assert_eq!(ring.primary_range(c).unwrap(), (at(20), at(30)));
        assert_eq!(ring.widened_range(c, 1).unwrap(), (at(20), at(30)));
        assert_eq!(ring.widened_range(c, 3).unwrap(), (at(50), at(30)));

        let pair = HashRing::from_entries(vec![fixed("a", 1, 10), fixed("b", 2, 20)]);
        let (lo, hi) = pair.widened_range(&pair.entries()[0], 3).unwrap();
        assert_eq!(lo, hi, "a two-node ring holds everything");
    }
}
