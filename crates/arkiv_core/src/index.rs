//! Primary index, order index, and active-segment cache.
//!
//! The index manager owns the three in-memory structures that must stay
//! mutually consistent:
//!
//! - primary index: key → [`Location`]
//! - order index: sequence number → key (the inverse of the primary
//!   index's seq field)
//! - active cache: values not yet archived, newest-first
//!
//! `BTreeMap` is used for both indexes so snapshot serialization is
//! deterministic (two checkpoints with no intervening mutation must produce
//! byte-identical files) and growth is always by explicit, bounds-checked
//! insertion.

use crate::error::{CoreError, CoreResult};
use crate::types::{Location, SegmentId, Seq};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// In-memory indexes plus the active-segment cache.
#[derive(Debug, Default)]
pub(crate) struct IndexManager {
    /// key → location.
    primary: BTreeMap<String, Location>,
    /// seq → key.
    order: BTreeMap<u64, String>,
    /// Values still resident in memory, newest-first.
    cache: VecDeque<Value>,
}

impl IndexManager {
    /// Creates an empty index manager.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an index manager from loaded snapshots.
    pub(crate) fn from_parts(
        primary: BTreeMap<String, Location>,
        order: BTreeMap<u64, String>,
        cache: VecDeque<Value>,
    ) -> Self {
        Self {
            primary,
            order,
            cache,
        }
    }

    /// Number of distinct keys ever inserted.
    pub(crate) fn len(&self) -> usize {
        self.primary.len()
    }

    /// Number of values still resident in the cache.
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// The cache content, newest-first.
    pub(crate) fn cache(&self) -> &VecDeque<Value> {
        &self.cache
    }

    /// Clears the cache after its content has been sealed.
    pub(crate) fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Inserts a brand-new key.
    ///
    /// Assigns `seq = len`, records the location in the primary index, the
    /// inverse entry in the order index, and prepends the value to the
    /// cache. The three updates are infallible once entered, so one index is
    /// never updated without the other.
    pub(crate) fn insert_new(
        &mut self,
        key: String,
        value: Value,
        segment_id: SegmentId,
        created_at: u64,
    ) -> Seq {
        let seq = Seq::new(self.primary.len() as u64);
        let location = Location {
            seq,
            segment_id,
            created_at,
        };
        self.order.insert(seq.as_u64(), key.clone());
        self.primary.insert(key, location);
        self.cache.push_front(value);
        seq
    }

    /// Looks up a key's location.
    pub(crate) fn locate(&self, key: &str) -> Option<&Location> {
        self.primary.get(key)
    }

    /// Cache position of a sequence number, if still resident.
    ///
    /// The cache is newest-first, so `pos = len - (seq + 1)`; the entry has
    /// been sealed once that position falls outside the cache.
    pub(crate) fn cache_offset(&self, seq: Seq) -> Option<usize> {
        let pos = (self.primary.len() as u64).checked_sub(seq.as_u64() + 1)?;
        let pos = usize::try_from(pos).ok()?;
        (pos < self.cache.len()).then_some(pos)
    }

    /// Reads a cached value by cache position.
    pub(crate) fn cached(&self, pos: usize) -> Option<&Value> {
        self.cache.get(pos)
    }

    /// Overwrites a cached value in place (re-put of a resident key).
    pub(crate) fn overwrite_cached(&mut self, pos: usize, value: Value) {
        if let Some(slot) = self.cache.get_mut(pos) {
            *slot = value;
        }
    }

    /// The key holding a given sequence number.
    pub(crate) fn key_at(&self, seq: Seq) -> Option<&str> {
        self.order.get(&seq.as_u64()).map(String::as_str)
    }

    /// Insertion timestamp of a given sequence number.
    pub(crate) fn created_at_at(&self, seq: Seq) -> Option<u64> {
        let key = self.order.get(&seq.as_u64())?;
        self.primary.get(key).map(|loc| loc.created_at)
    }

    /// Snapshot view of the primary index.
    pub(crate) fn primary(&self) -> &BTreeMap<String, Location> {
        &self.primary
    }

    /// Snapshot view of the order index.
    pub(crate) fn order(&self) -> &BTreeMap<u64, String> {
        &self.order
    }

    /// Verifies the mutual invariants against the catalog total.
    ///
    /// - primary and order index sizes match
    /// - order-index keys form a contiguous `0..n-1` range, checked by
    ///   sum-of-range equality rather than enumeration
    /// - `cache_len == len - catalog_total`
    pub(crate) fn check_invariants(&self, catalog_total: usize) -> CoreResult<()> {
        let n = self.primary.len();
        if n != self.order.len() {
            return Err(CoreError::corrupt_state(format!(
                "primary index has {} entries but order index has {}",
                n,
                self.order.len()
            )));
        }

        // Keys are distinct, so matching the minimal possible sum means the
        // set is exactly 0..n-1.
        let sum: u128 = self.order.keys().map(|&k| u128::from(k)).sum();
        let expected = if n == 0 {
            0
        } else {
            (n as u128) * (n as u128 - 1) / 2
        };
        if sum != expected {
            return Err(CoreError::corrupt_state(format!(
                "order index keys are not the contiguous range 0..{n} (key sum {sum}, expected {expected})"
            )));
        }

        let expected_cache = n.checked_sub(catalog_total).ok_or_else(|| {
            CoreError::corrupt_state(format!(
                "catalog records {catalog_total} archived items but only {n} keys exist"
            ))
        })?;
        if self.cache.len() != expected_cache {
            return Err(CoreError::corrupt_state(format!(
                "cache holds {} items, expected {} (index size {} minus {} archived)",
                self.cache.len(),
                expected_cache,
                n,
                catalog_total
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn insert(index: &mut IndexManager, key: &str, value: Value) -> Seq {
        index.insert_new(key.to_string(), value, SegmentId::new(1), 1000)
    }

    #[test]
    fn seq_assignment_is_dense() {
        let mut index = IndexManager::new();
        assert_eq!(insert(&mut index, "a", json!(1)), Seq::new(0));
        assert_eq!(insert(&mut index, "b", json!(2)), Seq::new(1));
        assert_eq!(insert(&mut index, "c", json!(3)), Seq::new(2));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn cache_is_newest_first() {
        let mut index = IndexManager::new();
        insert(&mut index, "a", json!("first"));
        insert(&mut index, "b", json!("second"));

        assert_eq!(index.cached(0), Some(&json!("second")));
        assert_eq!(index.cached(1), Some(&json!("first")));
    }

    #[test]
    fn cache_offset_mirrors_seq() {
        let mut index = IndexManager::new();
        for i in 0..4 {
            insert(&mut index, &format!("k{i}"), json!(i));
        }

        assert_eq!(index.cache_offset(Seq::new(0)), Some(3));
        assert_eq!(index.cache_offset(Seq::new(3)), Some(0));
        assert_eq!(index.cache_offset(Seq::new(4)), None);
    }

    #[test]
    fn cache_offset_after_sealing() {
        let mut index = IndexManager::new();
        for i in 0..4 {
            insert(&mut index, &format!("k{i}"), json!(i));
        }
        index.clear_cache();
        insert(&mut index, "k4", json!(4));

        // Archived entries report no cache position.
        assert_eq!(index.cache_offset(Seq::new(0)), None);
        assert_eq!(index.cache_offset(Seq::new(3)), None);
        // The new entry is resident at position 0.
        assert_eq!(index.cache_offset(Seq::new(4)), Some(0));
    }

    #[test]
    fn locate_returns_location() {
        let mut index = IndexManager::new();
        insert(&mut index, "a", json!(1));

        let loc = index.locate("a").unwrap();
        assert_eq!(loc.seq, Seq::new(0));
        assert_eq!(loc.segment_id, SegmentId::new(1));
        assert!(index.locate("missing").is_none());
    }

    #[test]
    fn invariants_hold_for_empty() {
        IndexManager::new().check_invariants(0).unwrap();
    }

    #[test]
    fn invariants_detect_size_mismatch() {
        let mut index = IndexManager::new();
        insert(&mut index, "a", json!(1));
        index.order.remove(&0);

        assert!(matches!(
            index.check_invariants(0),
            Err(CoreError::CorruptState { .. })
        ));
    }

    #[test]
    fn invariants_detect_gapped_order_index() {
        let mut index = IndexManager::new();
        insert(&mut index, "a", json!(1));
        insert(&mut index, "b", json!(2));
        // Corrupt the order index: move seq 1 to seq 5.
        let key = index.order.remove(&1).unwrap();
        index.order.insert(5, key);

        assert!(matches!(
            index.check_invariants(0),
            Err(CoreError::CorruptState { .. })
        ));
    }

    #[test]
    fn invariants_detect_cache_length_drift() {
        let mut index = IndexManager::new();
        insert(&mut index, "a", json!(1));
        insert(&mut index, "b", json!(2));

        assert!(index.check_invariants(1).is_err());
        assert!(index.check_invariants(0).is_ok());
    }

    proptest! {
        #[test]
        fn order_index_preserves_insertion_order(keys in proptest::collection::vec("[a-z]{1,8}", 1..40)) {
            let mut index = IndexManager::new();
            let mut inserted = Vec::new();
            for key in keys {
                if index.locate(&key).is_none() {
                    insert(&mut index, &key, json!(null));
                    inserted.push(key);
                }
            }

            prop_assert_eq!(index.len(), inserted.len());
            for (i, key) in inserted.iter().enumerate() {
                prop_assert_eq!(index.key_at(Seq::new(i as u64)), Some(key.as_str()));
            }
            prop_assert!(index.check_invariants(0).is_ok());
        }
    }
}
