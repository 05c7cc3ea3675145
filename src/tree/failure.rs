//! Failure-Link Precomputation
//!
//! Untimed trees resolve wildcards without backtracking: every node stores
//! the id of its wildcard (`*`) child, and the evaluator drops into that
//! sub-tree when the specifically-matched branches of the node produce no
//! result. A node with no wildcard child simply yields an empty branch, so
//! the fall-through to an ancestor's wildcard child happens one frame up in
//! the recursion.
//!
//! Only the highest-specificity match can win through a wildcard: a
//! wildcard slot contributes zero weight at its position while a specific
//! slot contributes more than every later position combined, so pruning the
//! wildcard branch whenever a specific branch produced a result preserves
//! the maximal-weight result set.

use crate::tree::compiler::MatcherTree;

/// Point every node at its wildcard child, if it has one
pub fn compute_failure_links(tree: &mut MatcherTree) {
    for id in 0..tree.nodes.len() {
        let wildcard_child = tree.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&c| tree.nodes[c].driver.is_wildcard());
        tree.nodes[id].failure = wildcard_child;
    }
}
