//! Query engine: point lookup, range queries, scan and filter.
//!
//! Three position spaces meet here:
//!
//! - **seq**: global insertion order, 0 = first key ever inserted
//! - **logical position**: rank from the newest entry, 0 = most recent
//!   insertion (`pos = index_size - seq - 1`)
//! - **in-segment position**: index into one newest-first segment file
//!
//! An archived entry with sequence number `seq` living in segment `s` sits
//! at `segment_len - 1 - (seq - items_before(s))` inside the file, because
//! segments store newest-first, mirroring the cache.
//!
//! `range_by_time` addresses newest-first, consistently with
//! `range_by_position`: it returns entries whose `created_at` falls in
//! `[t0, t1)`, most recent first. Each bound is resolved with a binary
//! search over the ascending-by-seq `created_at` sequence (first position
//! with `created_at >= t`, ties resolving to the first match), and the
//! resulting oldest-first bounds are mirrored into newest-first positions.

use crate::engine::Core;
use crate::error::{CoreError, CoreResult};
use crate::types::{SegmentId, Seq};
use serde_json::Value;

impl Core {
    /// Resolves a key to its current value, across cache and sealed
    /// segments.
    pub(crate) fn get_value(&self, key: &str) -> CoreResult<Option<Value>> {
        self.validate_key(key)?;

        let Some(loc) = self.index.locate(key).copied() else {
            return Ok(None);
        };

        if let Some(pos) = self.index.cache_offset(loc.seq) {
            return Ok(self.index.cached(pos).cloned());
        }

        let values = self.segments.read_sealed(loc.segment_id)?;
        let pos = self.sealed_position(loc.seq, loc.segment_id, values.len())?;
        let value = values.get(pos).ok_or_else(|| {
            CoreError::corrupt_state(format!(
                "{} resolves to position {pos} outside {}",
                loc.seq, loc.segment_id
            ))
        })?;
        Ok(Some(value.clone()))
    }

    /// Position of an archived entry inside its segment file.
    pub(crate) fn sealed_position(
        &self,
        seq: Seq,
        segment_id: SegmentId,
        segment_len: usize,
    ) -> CoreResult<usize> {
        let offset = self.segments.items_before(segment_id) as u64;
        let from_oldest = seq.as_u64().checked_sub(offset).ok_or_else(|| {
            CoreError::corrupt_state(format!(
                "{seq} precedes the items archived before {segment_id}"
            ))
        })?;
        (segment_len as u64)
            .checked_sub(from_oldest + 1)
            .and_then(|p| usize::try_from(p).ok())
            .ok_or_else(|| {
                CoreError::corrupt_state(format!(
                    "{seq} is beyond the {segment_len} items of {segment_id}"
                ))
            })
    }

    /// Values in logical positions `[start, end)`, newest first.
    ///
    /// `end` is clamped to the index size; `start >= end` yields an empty
    /// result. Served from the cache alone whenever the range fits, else
    /// sealed segments are concatenated newest-to-oldest just far enough to
    /// cover the oldest requested entry.
    pub(crate) fn range_by_position(&self, start: usize, end: usize) -> CoreResult<Vec<Value>> {
        let n = self.index.len();
        let end = end.min(n);
        if start >= end {
            return Ok(Vec::new());
        }

        let cache_len = self.index.cache_len();
        if end <= cache_len {
            return Ok(self
                .index
                .cache()
                .iter()
                .skip(start)
                .take(end - start)
                .cloned()
                .collect());
        }

        // The oldest requested entry carries seq n - end; walk sealed
        // segments newest-first until the one owning it is included.
        let boundary = Seq::new((n - end) as u64);
        let key = self.index.key_at(boundary).ok_or_else(|| {
            CoreError::corrupt_state(format!("order index has no entry for {boundary}"))
        })?;
        let owner = self
            .index
            .locate(key)
            .ok_or_else(|| {
                CoreError::corrupt_state(format!("order index names unknown key {key:?}"))
            })?
            .segment_id;

        let mut buf: Vec<Value> = self.index.cache().iter().cloned().collect();
        for id in self.segments.sealed_ids_newest_first() {
            buf.extend(self.segments.read_sealed(id)?);
            if id == owner {
                break;
            }
        }

        buf.get(start..end)
            .map(<[Value]>::to_vec)
            .ok_or_else(|| {
                CoreError::corrupt_state(format!(
                    "catalog covers {} items but positions {start}..{end} were requested",
                    buf.len()
                ))
            })
    }

    /// Values inserted within `[t0, t1)`, newest first.
    pub(crate) fn range_by_time(&self, t0: u64, t1: u64) -> CoreResult<Vec<Value>> {
        let n = self.index.len() as u64;
        let lo = self.first_seq_at_or_after(t0);
        let hi = self.first_seq_at_or_after(t1);
        if lo >= hi {
            return Ok(Vec::new());
        }
        // Oldest-first seq bounds [lo, hi) mirror to newest-first logical
        // positions [n - hi, n - lo).
        self.range_by_position((n - hi) as usize, (n - lo) as usize)
    }

    /// First sequence number whose `created_at` is `>= t`.
    ///
    /// `created_at` is non-decreasing in seq order, so a binary search over
    /// the seq space suffices; equal timestamps resolve to the first match.
    fn first_seq_at_or_after(&self, t: u64) -> u64 {
        let mut lo = 0u64;
        let mut hi = self.index.len() as u64;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let created = self
                .index
                .created_at_at(Seq::new(mid))
                .unwrap_or(u64::MAX);
            if created < t {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Traverses up to `limit` values - the cache first, then each sealed
    /// segment newest-first - handing each batch to `f`.
    ///
    /// The final batch is truncated so the cumulative count never exceeds
    /// `limit`.
    pub(crate) fn for_each_batch<F>(&self, limit: usize, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&[Value]),
    {
        let mut remaining = limit;
        if remaining == 0 {
            return Ok(());
        }

        let cache: Vec<Value> = self
            .index
            .cache()
            .iter()
            .take(remaining)
            .cloned()
            .collect();
        if !cache.is_empty() {
            remaining -= cache.len();
            f(&cache);
        }

        for id in self.segments.sealed_ids_newest_first() {
            if remaining == 0 {
                break;
            }
            let values = self.segments.read_sealed(id)?;
            let take = values.len().min(remaining);
            if take > 0 {
                f(&values[..take]);
                remaining -= take;
            }
        }

        Ok(())
    }

    /// Applies every visitor to each traversed batch.
    pub(crate) fn scan_batches(
        &self,
        visitors: &mut [&mut dyn FnMut(&[Value])],
        limit: usize,
    ) -> CoreResult<()> {
        self.for_each_batch(limit, |batch| {
            for visitor in visitors.iter_mut() {
                visitor(batch);
            }
        })
    }

    /// Selects traversed values matching `predicate`, in traversal order.
    ///
    /// `limit` bounds the number of examined entries, exactly as in
    /// [`Core::scan_batches`], not the number of selected ones.
    pub(crate) fn filter_values(
        &self,
        predicate: &dyn Fn(&Value) -> bool,
        limit: usize,
    ) -> CoreResult<Vec<Value>> {
        let mut selected = Vec::new();
        self.for_each_batch(limit, |batch| {
            selected.extend(batch.iter().filter(|v| predicate(v)).cloned());
        })?;
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Core;
    use crate::index::IndexManager;
    use crate::lifecycle::EngineState;
    use crate::segment::SegmentStore;
    use arkiv_storage::{MemoryStore, SnapshotStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Builds a core with `sealed` segments of the given sizes followed by
    /// `cached` resident entries. Keys are `k0, k1, ...` in insertion
    /// order; values are `"v0", "v1", ...`; created_at starts at 1000 and
    /// advances by 10 per insertion.
    fn build_core(sealed: &[usize], cached: usize) -> Core {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let mut segments = SegmentStore::open(store, &Config::default(), 1000).unwrap();
        let mut index = IndexManager::new();

        let mut i = 0usize;
        let mut insert = |index: &mut IndexManager, segments: &SegmentStore| {
            index.insert_new(
                format!("k{i}"),
                json!(format!("v{i}")),
                segments.active_id(),
                1000 + 10 * i as u64,
            );
            i += 1;
        };

        for (round, &count) in sealed.iter().enumerate() {
            for _ in 0..count {
                insert(&mut index, &segments);
            }
            segments
                .maybe_rotate(
                    &mut index,
                    u64::MAX,
                    Duration::ZERO,
                    2000 + 1000 * round as u64,
                )
                .unwrap();
        }
        for _ in 0..cached {
            insert(&mut index, &segments);
        }

        Core {
            config: Config::default(),
            index,
            segments,
            state: EngineState::Running,
            last_rotation: Instant::now(),
        }
    }

    fn values(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn get_from_cache() {
        let core = build_core(&[], 3);
        assert_eq!(core.get_value("k2").unwrap(), Some(json!("v2")));
        assert_eq!(core.get_value("k0").unwrap(), Some(json!("v0")));
    }

    #[test]
    fn get_from_sealed_segment() {
        let core = build_core(&[3, 2], 2);
        // Seqs 0..2 live in the first sealed segment, 3..4 in the second.
        assert_eq!(core.get_value("k0").unwrap(), Some(json!("v0")));
        assert_eq!(core.get_value("k2").unwrap(), Some(json!("v2")));
        assert_eq!(core.get_value("k3").unwrap(), Some(json!("v3")));
        assert_eq!(core.get_value("k6").unwrap(), Some(json!("v6")));
    }

    #[test]
    fn get_missing_key() {
        let core = build_core(&[2], 1);
        assert_eq!(core.get_value("absent").unwrap(), None);
    }

    #[test]
    fn get_invalid_key() {
        let core = build_core(&[], 1);
        assert!(matches!(
            core.get_value(""),
            Err(CoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn range_within_cache() {
        let core = build_core(&[], 5);
        let result = core.range_by_position(0, 3).unwrap();
        assert_eq!(values(&result), vec!["v4", "v3", "v2"]);
    }

    #[test]
    fn range_full_is_reverse_insertion_order() {
        let core = build_core(&[3, 2], 2);
        let result = core.range_by_position(0, 7).unwrap();
        assert_eq!(
            values(&result),
            vec!["v6", "v5", "v4", "v3", "v2", "v1", "v0"]
        );
    }

    #[test]
    fn range_spanning_cache_and_segments() {
        let core = build_core(&[3, 2], 2);
        // Positions 1..5 reach from the cache into the middle segment.
        let result = core.range_by_position(1, 5).unwrap();
        assert_eq!(values(&result), vec!["v5", "v4", "v3", "v2"]);
    }

    #[test]
    fn range_clamps_end() {
        let core = build_core(&[2], 1);
        let result = core.range_by_position(0, 100).unwrap();
        assert_eq!(values(&result), vec!["v2", "v1", "v0"]);
    }

    #[test]
    fn range_empty_when_inverted() {
        let core = build_core(&[2], 1);
        assert!(core.range_by_position(2, 2).unwrap().is_empty());
        assert!(core.range_by_position(5, 1).unwrap().is_empty());
    }

    #[test]
    fn time_range_selects_half_open_window() {
        // created_at: k0=1000, k1=1010, ..., k5=1050.
        let core = build_core(&[3], 3);
        let result = core.range_by_time(1010, 1040).unwrap();
        assert_eq!(values(&result), vec!["v3", "v2", "v1"]);
    }

    #[test]
    fn time_range_is_newest_first() {
        let core = build_core(&[], 4);
        let result = core.range_by_time(0, u64::MAX).unwrap();
        assert_eq!(values(&result), vec!["v3", "v2", "v1", "v0"]);
    }

    #[test]
    fn time_range_boundary_is_inclusive_exclusive() {
        let core = build_core(&[], 3);
        // Exactly [1010, 1020): only k1.
        let result = core.range_by_time(1010, 1020).unwrap();
        assert_eq!(values(&result), vec!["v1"]);
    }

    #[test]
    fn time_range_ties_resolve_to_first() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let segments = SegmentStore::open(store, &Config::default(), 1000).unwrap();
        let mut index = IndexManager::new();
        // Three insertions in the same millisecond.
        for i in 0..3 {
            index.insert_new(format!("k{i}"), json!(i), segments.active_id(), 1000);
        }
        let core = Core {
            config: Config::default(),
            index,
            segments,
            state: EngineState::Running,
            last_rotation: Instant::now(),
        };

        assert_eq!(core.range_by_time(1000, 1001).unwrap().len(), 3);
        assert!(core.range_by_time(1001, 2000).unwrap().is_empty());
    }

    #[test]
    fn time_range_empty_window() {
        let core = build_core(&[], 3);
        assert!(core.range_by_time(500, 500).unwrap().is_empty());
        assert!(core.range_by_time(2000, 3000).unwrap().is_empty());
        assert!(core.range_by_time(1040, 1010).unwrap().is_empty());
    }

    #[test]
    fn scan_visits_cache_then_segments() {
        let core = build_core(&[2], 2);
        let mut seen: Vec<String> = Vec::new();
        let mut batches = 0usize;
        {
            let mut collect = |batch: &[Value]| {
                seen.extend(values(batch));
            };
            let mut count = |_batch: &[Value]| {
                batches += 1;
            };
            let mut visitors: [&mut dyn FnMut(&[Value]); 2] = [&mut collect, &mut count];
            core.scan_batches(&mut visitors, usize::MAX).unwrap();
        }

        assert_eq!(seen, vec!["v3", "v2", "v1", "v0"]);
        assert_eq!(batches, 2);
    }

    #[test]
    fn scan_respects_limit() {
        let core = build_core(&[3], 2);
        let mut seen: Vec<String> = Vec::new();
        {
            let mut collect = |batch: &[Value]| {
                seen.extend(values(batch));
            };
            let mut visitors: [&mut dyn FnMut(&[Value]); 1] = [&mut collect];
            core.scan_batches(&mut visitors, 3).unwrap();
        }

        assert_eq!(seen, vec!["v4", "v3", "v2"]);
    }

    #[test]
    fn filter_selects_in_traversal_order() {
        let core = build_core(&[3], 3);
        let result = core
            .filter_values(
                &|v| {
                    let s = v.as_str().unwrap();
                    s.ends_with('0') || s.ends_with('4')
                },
                usize::MAX,
            )
            .unwrap();
        assert_eq!(values(&result), vec!["v4", "v0"]);
    }

    #[test]
    fn filter_limit_bounds_examined_entries() {
        let core = build_core(&[3], 3);
        // Only the two newest entries are examined; v0 never seen.
        let result = core
            .filter_values(&|v| v.as_str().unwrap().ends_with('0'), 2)
            .unwrap();
        assert!(result.is_empty());
    }
}
