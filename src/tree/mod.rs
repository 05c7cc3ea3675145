//! Matcher Tree
//!
//! Compiles a ruleset into a k-level matcher tree and answers weighted
//! lookups against it. Three flavors trade memory for lookup cost:
//!
//! - **Single**: untimed; wildcard fall-through via precomputed failure
//!   links; cheapest lookups.
//! - **Dated**: children keyed by `(driver, validity range)`; the query
//!   time is checked at every step; no failure links.
//! - **Sliced**: a lazily built forest; the query time selects a validity
//!   slice whose untimed sub-tree compiles on demand and lives in a small
//!   LRU.
//!
//! Trees are immutable after compilation; a changed ruleset compiles a
//! fresh tree and the engine swaps the shared reference.

pub mod compiler;
pub mod evaluator;
pub mod failure;
pub mod lru;
pub mod node;
pub mod sliced;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ruleset::Ruleset;

pub use compiler::MatcherTree;
pub use evaluator::{best_matches, select_single, RuleMatch, SelectionMode};
pub use sliced::{SlicedTree, DEFAULT_SLICE_CACHE_CAPACITY};

/// Tree flavor selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    #[default]
    Single,
    Dated,
    Sliced,
}

/// A compiled matcher tree of any flavor
#[derive(Debug)]
pub enum Tree {
    Matcher(MatcherTree),
    Sliced(SlicedTree),
}

impl Tree {
    /// Compile the ruleset with the default slice-cache capacity
    pub fn build(ruleset: &Ruleset, kind: TreeKind) -> Tree {
        Tree::build_with_slice_capacity(ruleset, kind, DEFAULT_SLICE_CACHE_CAPACITY)
    }

    /// Compile the ruleset; `slice_capacity` only affects the sliced flavor
    pub fn build_with_slice_capacity(
        ruleset: &Ruleset,
        kind: TreeKind,
        slice_capacity: usize,
    ) -> Tree {
        match kind {
            TreeKind::Single => Tree::Matcher(MatcherTree::compile(ruleset, false)),
            TreeKind::Dated => Tree::Matcher(MatcherTree::compile(ruleset, true)),
            TreeKind::Sliced => Tree::Sliced(SlicedTree::new(ruleset, slice_capacity)),
        }
    }

    pub fn kind(&self) -> TreeKind {
        match self {
            Tree::Matcher(tree) if tree.is_dated() => TreeKind::Dated,
            Tree::Matcher(_) => TreeKind::Single,
            Tree::Sliced(_) => TreeKind::Sliced,
        }
    }

    /// Every terminal the pruned walk reaches for this input vector. Time
    /// defaults to now for the time-aware flavors and is ignored by the
    /// untimed one.
    pub fn evaluate(
        &self,
        inputs: &[String],
        time: Option<DateTime<Utc>>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        match self {
            Tree::Matcher(tree) => tree.evaluate(inputs, time, evaluation_inputs),
            Tree::Sliced(tree) => tree.evaluate(
                inputs,
                time.unwrap_or_else(Utc::now),
                evaluation_inputs,
            ),
        }
    }

    /// Every terminal reachable for this input vector, wildcard branches
    /// included; backs the detail ("all results") mode
    pub fn evaluate_exhaustive(
        &self,
        inputs: &[String],
        time: Option<DateTime<Utc>>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        match self {
            Tree::Matcher(tree) => tree.evaluate_exhaustive(inputs, time, evaluation_inputs),
            Tree::Sliced(tree) => tree.evaluate_exhaustive(
                inputs,
                time.unwrap_or_else(Utc::now),
                evaluation_inputs,
            ),
        }
    }
}

impl MatcherTree {
    pub fn is_dated(&self) -> bool {
        self.dated
    }
}
