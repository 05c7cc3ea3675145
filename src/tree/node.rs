//! Matcher-tree nodes
//!
//! Nodes live in a flat arena (`Vec<Node>`) and reference each other by
//! index, so the tree is a strict DAG from the root and failure edges are
//! non-owning back-references. After compilation the arena is frozen;
//! evaluation is lock-free reads.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::driver::{DriverHandle, DriverKind};

/// Index into the tree's node arena
pub type NodeId = usize;

/// Leaf payload: the rule a completed driver path resolves to.
///
/// Terminals are keyed by rule id within their node, so re-inserting a rule
/// replaces its terminal instead of duplicating it.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub rule_id: Uuid,
    pub weight: u64,
    /// Rule validity, carried for introspection; untimed lookups ignore it
    pub range: (DateTime<Utc>, DateTime<Utc>),
    /// Evaluation predicate drivers; empty means unconditional
    pub evaluations: Vec<DriverHandle>,
}

/// One level of the matcher tree
#[derive(Debug)]
pub struct Node {
    pub driver: DriverHandle,
    /// Root is level 0; a node at level `l` holds the driver for input
    /// position `l - 1` and its children match input position `l`
    pub level: usize,
    /// Child ids in insertion order
    pub children: Vec<NodeId>,
    /// Direct-lookup index, maintained while the node is deterministic
    /// (untimed trees only; dated siblings can share a value across ranges)
    pub index: Option<HashMap<String, NodeId>>,
    /// True while every child is a String driver
    pub deterministic: bool,
    /// Wildcard fall-through target computed by the failure-link pass
    pub failure: Option<NodeId>,
    /// Validity range for dated trees, widened as overlapping rules merge
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub terminals: Vec<Terminal>,
}

impl Node {
    pub fn new(driver: DriverHandle, level: usize) -> Node {
        Node {
            driver,
            level,
            children: Vec::new(),
            index: Some(HashMap::new()),
            deterministic: true,
            failure: None,
            date_range: None,
            terminals: Vec::new(),
        }
    }

    /// Record a new child, keeping the determinism flag and direct-lookup
    /// index consistent
    pub fn register_child(&mut self, child_id: NodeId, driver: &DriverHandle, indexed: bool) {
        self.children.push(child_id);
        if driver.kind() == DriverKind::String {
            if indexed {
                if let Some(index) = self.index.as_mut() {
                    index.insert(driver.value().to_string(), child_id);
                }
            }
        } else {
            // A single non-string child makes the whole level non-deterministic
            self.deterministic = false;
            self.index = None;
        }
    }

    /// Insert or replace the terminal for a rule
    pub fn set_terminal(&mut self, terminal: Terminal) {
        if let Some(existing) = self
            .terminals
            .iter_mut()
            .find(|t| t.rule_id == terminal.rule_id)
        {
            *existing = terminal;
        } else {
            self.terminals.push(terminal);
        }
    }
}
