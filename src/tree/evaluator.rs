//! Tree Evaluation
//!
//! Walks the matcher tree level by level: at each node the input for that
//! level selects the matching children (direct index lookup when the node
//! is deterministic, a driver scan otherwise), candidates recurse, and
//! depth-`k` terminals whose evaluation predicates pass become results.
//!
//! Untimed walks prune wildcard branches through failure links (see
//! [`crate::tree::failure`]); dated walks have no failure links and instead
//! take wildcard children inline while also requiring each child's validity
//! range to contain the query time. The exhaustive walk visits wildcard
//! branches unconditionally and backs the `all_results` detail mode as well
//! as the equivalence tests for the pruned walk.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::driver::DriverHandle;
use crate::tree::compiler::MatcherTree;
use crate::tree::node::NodeId;

/// One matched rule with its specificity weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_id: Uuid,
    pub weight: u64,
}

/// How many of the matched terminals a caller wants back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Highest weight; ties broken by smallest rule id
    Single,
    /// All terminals tied for the highest weight
    All,
    /// Every terminal reached, with weights
    AllResults,
}

/// Reduce raw matches to the maximal-weight subset
pub fn best_matches(mut matches: Vec<RuleMatch>) -> Vec<RuleMatch> {
    let Some(max) = matches.iter().map(|m| m.weight).max() else {
        return matches;
    };
    matches.retain(|m| m.weight == max);
    matches
}

/// Deterministic single-result selection: highest weight, then smallest
/// rule id among ties
pub fn select_single(matches: Vec<RuleMatch>) -> Option<RuleMatch> {
    best_matches(matches)
        .into_iter()
        .min_by_key(|m| m.rule_id)
}

impl MatcherTree {
    /// Evaluate one input vector, returning every terminal the pruned walk
    /// reaches. An input arity that does not match the tree depth yields an
    /// empty result; evaluation is total.
    pub fn evaluate(
        &self,
        inputs: &[String],
        time: Option<DateTime<Utc>>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        let mut out = Vec::new();
        if inputs.len() == self.depth {
            self.walk(self.root, inputs, time, evaluation_inputs, false, &mut out);
        }
        out
    }

    /// Evaluate visiting wildcard branches unconditionally. Same best-weight
    /// subset as [`MatcherTree::evaluate`], but reports lower-weight
    /// terminals that the pruned walk skips.
    pub fn evaluate_exhaustive(
        &self,
        inputs: &[String],
        time: Option<DateTime<Utc>>,
        evaluation_inputs: &[String],
    ) -> Vec<RuleMatch> {
        let mut out = Vec::new();
        if inputs.len() == self.depth {
            self.walk(self.root, inputs, time, evaluation_inputs, true, &mut out);
        }
        out
    }

    fn walk(
        &self,
        id: NodeId,
        inputs: &[String],
        time: Option<DateTime<Utc>>,
        evaluation_inputs: &[String],
        exhaustive: bool,
        out: &mut Vec<RuleMatch>,
    ) {
        let node = self.node(id);
        if node.level == self.depth {
            for terminal in &node.terminals {
                // Widened node ranges can admit a path whose rule is not
                // active, so dated lookups re-check the terminal's own range
                if self.dated {
                    if let Some(t) = time {
                        if t < terminal.range.0 || terminal.range.1 < t {
                            continue;
                        }
                    }
                }
                if evaluations_pass(&terminal.evaluations, evaluation_inputs) {
                    out.push(RuleMatch {
                        rule_id: terminal.rule_id,
                        weight: terminal.weight,
                    });
                }
            }
            return;
        }

        let input = inputs[node.level].as_str();
        let mut matched: Vec<NodeId> = Vec::new();
        match (&node.index, exhaustive) {
            (Some(index), false) => {
                if let Some(&child) = index.get(input) {
                    matched.push(child);
                }
            }
            _ => {
                for &child_id in &node.children {
                    let child = self.node(child_id);
                    let driver_ok = if self.dated || exhaustive {
                        child.driver.is_wildcard() || child.driver.matches(input)
                    } else {
                        child.driver.matches(input)
                    };
                    if !driver_ok {
                        continue;
                    }
                    if self.dated {
                        if let (Some(t), Some((start, end))) = (time, child.date_range) {
                            if t < start || end < t {
                                continue;
                            }
                        }
                    }
                    matched.push(child_id);
                }
            }
        }

        let before = out.len();
        for child_id in &matched {
            self.walk(*child_id, inputs, time, evaluation_inputs, exhaustive, out);
        }

        // Wildcard fall-through: only when the specific branches came up
        // empty, and never in dated mode (wildcards were taken inline)
        if !self.dated && !exhaustive && out.len() == before {
            if let Some(failure) = node.failure {
                if !matched.contains(&failure) {
                    self.walk(failure, inputs, time, evaluation_inputs, exhaustive, out);
                }
            }
        }
    }
}

/// Disjunctive evaluation-predicate check: absence passes unconditionally,
/// otherwise any driver matching its positional input admits the terminal
fn evaluations_pass(evaluations: &[DriverHandle], evaluation_inputs: &[String]) -> bool {
    if evaluations.is_empty() {
        return true;
    }
    evaluations
        .iter()
        .enumerate()
        .any(|(j, driver)| evaluation_inputs.get(j).is_some_and(|v| driver.matches(v)))
}
