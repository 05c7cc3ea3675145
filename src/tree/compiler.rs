//! Tree Compiler
//!
//! Converts a ruleset into a layered matcher tree: one node per driver
//! position along each rule's path, merged with existing paths wherever the
//! driver (and, for dated trees, an overlapping validity range) already has
//! a node at that level. Depth-`k` nodes collect terminals.
//!
//! Untimed trees additionally get failure links and a compaction pass;
//! dated trees key children by `(driver, range)` and widen a child's range
//! to the union whenever an inserted rule's range overlaps or touches it.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::driver::{Driver, DriverHandle};
use crate::rule::Rule;
use crate::ruleset::Ruleset;
use crate::tree::failure::compute_failure_links;
use crate::tree::node::{Node, NodeId, Terminal};

/// A compiled, frozen matcher tree (untimed or dated)
#[derive(Debug)]
pub struct MatcherTree {
    pub(crate) dated: bool,
    pub(crate) depth: usize,
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl MatcherTree {
    /// Compile every rule in the ruleset. Untimed compilation finishes with
    /// the failure-link pass and node compaction.
    pub fn compile(ruleset: &Ruleset, dated: bool) -> MatcherTree {
        let tree = MatcherTree::compile_filtered(ruleset, dated, |_| true);
        debug!(
            ruleset = %ruleset.name(),
            dated,
            nodes = tree.nodes.len(),
            rules = ruleset.rule_count(),
            "tree_compiled"
        );
        tree
    }

    /// Compile only the rules accepted by `filter`
    pub fn compile_filtered<F>(ruleset: &Ruleset, dated: bool, filter: F) -> MatcherTree
    where
        F: Fn(&Rule) -> bool,
    {
        let mut tree = MatcherTree::empty(ruleset.driver_count(), dated);
        for rule in ruleset.rules().values().filter(|r| filter(r)) {
            tree.insert_rule(rule);
        }
        if !dated {
            compute_failure_links(&mut tree);
        }
        tree.optimise();
        tree
    }

    fn empty(depth: usize, dated: bool) -> MatcherTree {
        let mut root = Node::new(std::sync::Arc::new(Driver::literal(crate::driver::WILDCARD)), 0);
        if dated {
            root.index = None;
        }
        MatcherTree {
            dated,
            depth,
            nodes: vec![root],
            root: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Insert one rule's driver path, merging with existing nodes
    fn insert_rule(&mut self, rule: &Rule) {
        let range = (rule.start(), rule.end());
        let mut current = self.root;
        for (i, driver) in rule.drivers().iter().enumerate() {
            current = self.child_for(current, driver, range, i + 1);
        }
        self.nodes[current].set_terminal(Terminal {
            rule_id: rule.id(),
            weight: rule.weight(),
            range,
            evaluations: rule.evaluations().map(<[_]>::to_vec).unwrap_or_default(),
        });
    }

    /// Find or create the child of `parent` for `driver` at `level`. Dated
    /// trees require the same driver plus an overlapping-or-touching range,
    /// which then widens to the union; the driver itself never repeats for
    /// the merged slot.
    fn child_for(
        &mut self,
        parent: NodeId,
        driver: &DriverHandle,
        range: (DateTime<Utc>, DateTime<Utc>),
        level: usize,
    ) -> NodeId {
        let existing = self.nodes[parent].children.iter().copied().find(|&c| {
            let child = &self.nodes[c];
            if child.driver.as_ref() != driver.as_ref() {
                return false;
            }
            if !self.dated {
                return true;
            }
            match child.date_range {
                Some((start, end)) => ranges_touch((start, end), range),
                None => true,
            }
        });
        if let Some(id) = existing {
            if self.dated {
                if let Some((start, end)) = self.nodes[id].date_range {
                    self.nodes[id].date_range =
                        Some((start.min(range.0), end.max(range.1)));
                }
            }
            return id;
        }

        let mut node = Node::new(DriverHandle::clone(driver), level);
        if self.dated {
            node.index = None;
            node.date_range = Some(range);
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        let indexed = !self.dated;
        self.nodes[parent].register_child(id, driver, indexed);
        id
    }

    /// Compact single-child nodes: with one child the direct-lookup index
    /// buys nothing over the scan
    fn optimise(&mut self) {
        for node in &mut self.nodes {
            if node.children.len() <= 1 {
                node.index = None;
            }
        }
    }
}

/// Overlapping or adjacent (touching endpoints count)
fn ranges_touch(a: (DateTime<Utc>, DateTime<Utc>), b: (DateTime<Utc>, DateTime<Utc>)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::parse_instant;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ruleset_with(rules: &[&[&str]]) -> Ruleset {
        let mut ruleset = Ruleset::new(
            "test",
            vec!["A".into(), "B".into(), "C".into()],
        )
        .unwrap();
        for inputs in rules {
            let rule = ruleset
                .build_rule(Uuid::new_v4(), inputs, HashMap::new())
                .unwrap();
            ruleset.add_rule(rule).unwrap();
        }
        ruleset
    }

    #[test]
    fn test_paths_merge_on_shared_prefixes() {
        let ruleset = ruleset_with(&[
            &["VOICE", "CME", "ED"],
            &["VOICE", "CME", "S&P"],
            &["VOICE", "LSE", "ED"],
        ]);
        let tree = MatcherTree::compile(&ruleset, false);
        // root + VOICE + (CME, LSE) + (ED, S&P, ED) = 1 + 1 + 2 + 3
        assert_eq!(tree.node_count(), 7);
    }

    #[test]
    fn test_terminal_dedup_on_double_insert() {
        let mut ruleset = ruleset_with(&[]);
        let rule = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], HashMap::new())
            .unwrap();
        ruleset.add_rule(rule.clone()).unwrap();

        let mut tree = MatcherTree::compile(&ruleset, false);
        // Re-inserting the same rule replaces its terminal
        tree.insert_rule(&rule);
        let leaf = tree
            .nodes
            .iter()
            .find(|n| !n.terminals.is_empty())
            .unwrap();
        assert_eq!(leaf.terminals.len(), 1);
    }

    #[test]
    fn test_determinism_flag_flips_on_non_string_child() {
        let ruleset = ruleset_with(&[
            &["VOICE", "CME", "ED"],
            &["DMA", "CME", "ED"],
        ]);
        let tree = MatcherTree::compile(&ruleset, false);
        assert!(tree.node(tree.root).deterministic);

        let ruleset = ruleset_with(&[
            &["VOICE", "CME", "ED"],
            &["RE:V.*", "CME", "ED"],
        ]);
        let tree = MatcherTree::compile(&ruleset, false);
        assert!(!tree.node(tree.root).deterministic);
        assert!(tree.node(tree.root).index.is_none());
    }

    #[test]
    fn test_single_child_nodes_drop_index() {
        let ruleset = ruleset_with(&[&["VOICE", "CME", "ED"]]);
        let tree = MatcherTree::compile(&ruleset, false);
        assert!(tree.nodes.iter().all(|n| n.index.is_none()));
    }

    #[test]
    fn test_dated_overlapping_ranges_widen() {
        let mut ruleset = ruleset_with(&[]);
        let r1 = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], HashMap::new())
            .unwrap()
            .with_validity(
                parse_instant("2013-01-01T00:00:00Z").unwrap(),
                parse_instant("2013-06-01T00:00:00Z").unwrap(),
            );
        let r2 = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "S&P"], HashMap::new())
            .unwrap()
            .with_validity(
                parse_instant("2013-04-01T00:00:00Z").unwrap(),
                parse_instant("2013-12-01T00:00:00Z").unwrap(),
            );
        ruleset.add_rule(r1).unwrap();
        ruleset.add_rule(r2).unwrap();

        let tree = MatcherTree::compile(&ruleset, true);
        // The shared VOICE node widened to the union of both ranges
        let voice = tree
            .nodes
            .iter()
            .find(|n| n.level == 1 && n.driver.value() == "VOICE")
            .unwrap();
        assert_eq!(
            voice.date_range,
            Some((
                parse_instant("2013-01-01T00:00:00Z").unwrap(),
                parse_instant("2013-12-01T00:00:00Z").unwrap(),
            ))
        );
    }

    #[test]
    fn test_dated_disjoint_ranges_stay_separate() {
        let mut ruleset = ruleset_with(&[]);
        let r1 = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], HashMap::new())
            .unwrap()
            .with_validity(
                parse_instant("2013-01-01T00:00:00Z").unwrap(),
                parse_instant("2013-02-01T00:00:00Z").unwrap(),
            );
        let r2 = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "LSE", "ED"], HashMap::new())
            .unwrap()
            .with_validity(
                parse_instant("2013-06-01T00:00:00Z").unwrap(),
                parse_instant("2013-07-01T00:00:00Z").unwrap(),
            );
        ruleset.add_rule(r1).unwrap();
        ruleset.add_rule(r2).unwrap();

        let tree = MatcherTree::compile(&ruleset, true);
        let voice_nodes: Vec<_> = tree
            .nodes
            .iter()
            .filter(|n| n.level == 1 && n.driver.value() == "VOICE")
            .collect();
        // Disjoint validity on the same driver keeps two sibling slots
        assert_eq!(voice_nodes.len(), 2);
    }
}
