//! Time-Sliced Root
//!
//! A lazily built forest. The root holds the ruleset; each query time maps
//! to the slice of the timeline it falls in, where a slice is a maximal
//! half-open interval between consecutive break-points drawn from rule
//! validity starts and ends (plus the epoch / far-future sentinels). The
//! slice's sub-tree compiles on first use from the rules whose validity
//! fully covers the slice (an untimed tree, since every rule in it is
//! active for the whole slice) and is cached in a bounded LRU.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::ruleset::Ruleset;
use crate::tree::compiler::MatcherTree;
use crate::tree::evaluator::RuleMatch;
use crate::tree::lru::LruCache;

/// Default capacity of the per-root slice cache
pub const DEFAULT_SLICE_CACHE_CAPACITY: usize = 20;

/// Half-open `[start, end)` validity slice
pub type Slice = (DateTime<Utc>, DateTime<Utc>);

/// Sliced tree root: a ruleset snapshot plus the lazy sub-tree cache
#[derive(Debug)]
pub struct SlicedTree {
    ruleset: Ruleset,
    cache: Mutex<LruCache<Slice, Arc<MatcherTree>>>,
}

impl SlicedTree {
    pub fn new(ruleset: &Ruleset, cache_capacity: usize) -> SlicedTree {
        SlicedTree {
            ruleset: ruleset.clone(),
            cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    /// Evaluate against the sub-tree for the slice containing `time`
    pub fn evaluate(
        &self,
        inputs: &[String],
        time: DateTime<Utc>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        self.subtree_for(time).evaluate(inputs, None, evaluation_inputs)
    }

    /// Same as [`SlicedTree::evaluate`] but visiting wildcard branches
    /// unconditionally
    pub fn evaluate_exhaustive(
        &self,
        inputs: &[String],
        time: DateTime<Utc>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        self.subtree_for(time)
            .evaluate_exhaustive(inputs, None, evaluation_inputs)
    }

    /// Look up or build the sub-tree for the slice containing `time`.
    /// The build happens outside the cache lock; insertion is first-writer-
    /// wins, so a racing builder adopts the winner's tree.
    pub fn subtree_for(&self, time: DateTime<Utc>) -> Arc<MatcherTree> {
        let slice = self.slice_containing(time);
        if let Some(tree) = self.cache.lock().get(&slice) {
            return tree;
        }

        let (start, end) = slice;
        let tree = Arc::new(MatcherTree::compile_filtered(
            &self.ruleset,
            false,
            |rule| rule.start() <= start && end <= rule.end(),
        ));
        debug!(
            ruleset = %self.ruleset.name(),
            slice_start = %start,
            slice_end = %end,
            nodes = tree.node_count(),
            "slice_tree_built"
        );
        self.cache.lock().put(slice, tree)
    }

    /// The slice containing `time`: consecutive break-points `[a, b)` with
    /// `a <= time < b`. Times outside the covered span clamp to the first
    /// or last slice.
    pub fn slice_containing(&self, time: DateTime<Utc>) -> Slice {
        let breaks = self.break_points();
        for pair in breaks.windows(2) {
            if pair[0] <= time && time < pair[1] {
                return (pair[0], pair[1]);
            }
        }
        if time < breaks[0] {
            (breaks[0], breaks[1])
        } else {
            (breaks[breaks.len() - 2], breaks[breaks.len() - 1])
        }
    }

    /// Sorted, deduplicated break-points: every rule start and end plus the
    /// epoch and far-future sentinels
    fn break_points(&self) -> Vec<DateTime<Utc>> {
        let mut points = vec![crate::driver::epoch(), crate::driver::distant_future()];
        for rule in self.ruleset.rules().values() {
            points.push(rule.start());
            points.push(rule.end());
        }
        points.sort_unstable();
        points.dedup();
        points
    }

    /// Snapshot of the cached slices, least recently used first
    pub fn cached_slices(&self) -> Vec<Slice> {
        self.cache.lock().keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::parse_instant;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn instant(text: &str) -> DateTime<Utc> {
        parse_instant(text).unwrap()
    }

    fn dated_ruleset() -> Ruleset {
        let mut ruleset = Ruleset::new("test", vec!["A".into()]).unwrap();
        let early = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE"], HashMap::from([("tag".into(), "early".into())]))
            .unwrap()
            .with_validity(instant("2013-01-01T00:00:00Z"), instant("2013-04-05T00:00:00Z"));
        let late = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE"], HashMap::from([("tag".into(), "late".into())]))
            .unwrap()
            .with_validity(instant("2013-04-05T00:00:00Z"), instant("2013-12-31T00:00:00Z"));
        ruleset.add_rule(early).unwrap();
        ruleset.add_rule(late).unwrap();
        ruleset
    }

    #[test]
    fn test_slice_containing_picks_between_breakpoints() {
        let ruleset = dated_ruleset();
        let tree = SlicedTree::new(&ruleset, DEFAULT_SLICE_CACHE_CAPACITY);
        let slice = tree.slice_containing(instant("2013-02-01T00:00:00Z"));
        assert_eq!(slice.0, instant("2013-01-01T00:00:00Z"));
        assert_eq!(slice.1, instant("2013-04-05T00:00:00Z"));
    }

    #[test]
    fn test_slice_filters_to_fully_covering_rules() {
        let ruleset = dated_ruleset();
        let tree = SlicedTree::new(&ruleset, DEFAULT_SLICE_CACHE_CAPACITY);

        let results = tree.evaluate(
            &["VOICE".to_string()],
            instant("2013-02-01T00:00:00Z"),
            &[],
        );
        assert_eq!(results.len(), 1);
        let early_id = ruleset
            .rules()
            .values()
            .find(|r| r.outputs()["tag"] == "early")
            .unwrap()
            .id();
        assert_eq!(results[0].rule_id, early_id);

        let results = tree.evaluate(
            &["VOICE".to_string()],
            instant("2013-06-01T00:00:00Z"),
            &[],
        );
        let late_id = ruleset
            .rules()
            .values()
            .find(|r| r.outputs()["tag"] == "late")
            .unwrap()
            .id();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, late_id);
    }

    #[test]
    fn test_subtrees_cache_per_slice() {
        let ruleset = dated_ruleset();
        let tree = SlicedTree::new(&ruleset, DEFAULT_SLICE_CACHE_CAPACITY);

        let a = tree.subtree_for(instant("2013-02-01T00:00:00Z"));
        let b = tree.subtree_for(instant("2013-03-01T00:00:00Z"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tree.cached_slices().len(), 1);

        tree.subtree_for(instant("2013-06-01T00:00:00Z"));
        assert_eq!(tree.cached_slices().len(), 2);
    }

    #[test]
    fn test_time_outside_any_rule_yields_empty() {
        let ruleset = dated_ruleset();
        let tree = SlicedTree::new(&ruleset, DEFAULT_SLICE_CACHE_CAPACITY);
        // After every rule has expired only the empty tail slice remains
        let results = tree.evaluate(
            &["VOICE".to_string()],
            instant("2014-06-01T00:00:00Z"),
            &[],
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_empty_ruleset_has_single_slice() {
        let ruleset = Ruleset::new("test", vec!["A".into()]).unwrap();
        let tree = SlicedTree::new(&ruleset, DEFAULT_SLICE_CACHE_CAPACITY);
        let slice = tree.slice_containing(Utc::now());
        assert_eq!(slice.0, crate::driver::epoch());
        assert_eq!(slice.1, crate::driver::distant_future());
    }
}
