//! Rule Data Model
//!
//! Immutable rule records: a rule pairs a driver per input position with an
//! output map, an optional list of evaluation predicate drivers and a
//! validity range. `id` is the primary key for equality; `code` links
//! revisions of the same semantic rule across amendments.
//!
//! ## Weight
//!
//! Specificity is a deterministic positional weight: position `i` of `k`
//! contributes `2^(k-1-i)` when its driver is not the wildcard, so an
//! earlier specific driver always outweighs any combination of later ones.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::driver::{distant_future, epoch, DriverHandle};

/// A single weighted decision rule
#[derive(Debug, Clone)]
pub struct Rule {
    id: Uuid,
    code: Uuid,
    drivers: Vec<DriverHandle>,
    evaluations: Option<Vec<DriverHandle>>,
    outputs: HashMap<String, String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Rule {
    /// Create a rule valid from the epoch to the far future. The rule code
    /// defaults to the rule id until [`Rule::with_code`] links a revision.
    pub fn new(id: Uuid, drivers: Vec<DriverHandle>, outputs: HashMap<String, String>) -> Rule {
        Rule {
            id,
            code: id,
            drivers,
            evaluations: None,
            outputs,
            start: epoch(),
            end: distant_future(),
        }
    }

    /// Link this rule to a revision chain
    pub fn with_code(mut self, code: Uuid) -> Rule {
        self.code = code;
        self
    }

    /// Restrict validity to `[start, end]` (inclusive at both ends)
    pub fn with_validity(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Rule {
        self.start = start;
        self.end = end;
        self
    }

    /// Attach evaluation predicate drivers
    pub fn with_evaluations(mut self, evaluations: Vec<DriverHandle>) -> Rule {
        self.evaluations = Some(evaluations);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn code(&self) -> Uuid {
        self.code
    }

    pub fn drivers(&self) -> &[DriverHandle] {
        &self.drivers
    }

    pub fn evaluations(&self) -> Option<&[DriverHandle]> {
        self.evaluations.as_deref()
    }

    pub fn outputs(&self) -> &HashMap<String, String> {
        &self.outputs
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether the rule's validity range contains `time` (inclusive)
    pub fn is_active_at(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time <= self.end
    }

    /// Positional specificity weight. Zero iff every driver is the
    /// wildcard; at most `2^k - 1` for `k` drivers.
    pub fn weight(&self) -> u64 {
        positional_weight(&self.drivers)
    }

    /// Same input drivers, pairwise
    pub fn is_duplicate_input(&self, other: &Rule) -> bool {
        self.drivers == other.drivers
    }

    /// Same evaluation drivers (both absent counts as equal)
    pub fn is_duplicate_evaluation(&self, other: &Rule) -> bool {
        self.evaluations == other.evaluations
    }

    /// Same output map
    pub fn is_duplicate_output(&self, other: &Rule) -> bool {
        self.outputs == other.outputs
    }

    /// Same validity range
    pub fn is_duplicate_date_range(&self, other: &Rule) -> bool {
        self.start == other.start && self.end == other.end
    }

    /// Inputs, evaluations, outputs and validity all equal
    pub fn is_duplicate_rule(&self, other: &Rule) -> bool {
        self.is_duplicate_input(other)
            && self.is_duplicate_evaluation(other)
            && self.is_duplicate_output(other)
            && self.is_duplicate_date_range(other)
    }
}

// Rules are value-equal on their primary key only; richer comparisons go
// through the is_duplicate_* predicates.
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Weight of a driver vector: `2^(k-1-i)` per non-wildcard position
pub fn positional_weight(drivers: &[DriverHandle]) -> u64 {
    let k = drivers.len();
    drivers
        .iter()
        .enumerate()
        .filter(|(_, d)| !d.is_wildcard())
        .map(|(i, _)| 1u64 << (k - 1 - i))
        .sum()
}
