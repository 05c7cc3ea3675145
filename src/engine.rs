//! Decision Engine
//!
//! The embedding surface: owns the ruleset behind a read-write lock and the
//! compiled tree behind an atomically swappable reference. Evaluations are
//! lock-free against the current tree snapshot; change application mutates
//! the ruleset under its lock, compiles a fresh tree and swaps the shared
//! reference, so in-flight evaluations finish against the old tree while
//! new ones see the new one.
//!
//! Loading and persistence stay external: a [`RulesetLoader`] yields a
//! ruleset (with an optional retry predicate), a [`RulesetPersister`]
//! accepts one. IO errors live at that seam and never surface through
//! evaluation.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::change::Change;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::rule::Rule;
use crate::ruleset::Ruleset;
use crate::tree::{best_matches, select_single, RuleMatch, SelectionMode, Tree, TreeKind};

/// Source of rulesets; retries are driven by the predicate
pub trait RulesetLoader {
    fn load(&self) -> anyhow::Result<Ruleset>;

    /// Whether a failed load should be retried; defaults to giving up
    fn should_retry(&self, error: &anyhow::Error) -> bool {
        let _ = error;
        false
    }
}

/// Sink for rulesets; opaque to the engine
pub trait RulesetPersister {
    fn persist(&self, ruleset: &Ruleset);
}

/// One evaluation request: input values in driver order, an optional
/// evaluation instant and the evaluation predicate inputs
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    ruleset_name: String,
    values: Vec<String>,
    time: Option<DateTime<Utc>>,
    evaluation_values: Vec<String>,
}

impl EvaluationInput {
    pub fn ruleset_name(&self) -> &str {
        &self.ruleset_name
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn evaluation_values(&self) -> &[String] {
        &self.evaluation_values
    }
}

/// A resolved rule: identity, specificity and the configured outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub rule_id: Uuid,
    pub rule_code: Uuid,
    pub weight: u64,
    pub outputs: HashMap<String, String>,
}

/// The weighted decision-tree rule engine
pub struct DecisionEngine {
    kind: TreeKind,
    slice_capacity: usize,
    ruleset: RwLock<Ruleset>,
    tree: ArcSwap<Tree>,
}

impl DecisionEngine {
    /// Compile the ruleset with the given tree flavor
    pub fn new(ruleset: Ruleset, kind: TreeKind) -> DecisionEngine {
        DecisionEngine::with_slice_capacity(ruleset, kind, crate::tree::DEFAULT_SLICE_CACHE_CAPACITY)
    }

    /// Compile with flavor and slice-cache capacity taken from config
    pub fn from_config(ruleset: Ruleset, config: &Config) -> DecisionEngine {
        DecisionEngine::with_slice_capacity(ruleset, config.tree.flavor, config.tree.slice_cache_size)
    }

    pub fn with_slice_capacity(
        ruleset: Ruleset,
        kind: TreeKind,
        slice_capacity: usize,
    ) -> DecisionEngine {
        let tree = Tree::build_with_slice_capacity(&ruleset, kind, slice_capacity);
        info!(
            ruleset = %ruleset.name(),
            kind = ?kind,
            rules = ruleset.rule_count(),
            "engine_started"
        );
        DecisionEngine {
            kind,
            slice_capacity,
            ruleset: RwLock::new(ruleset),
            tree: ArcSwap::from_pointee(tree),
        }
    }

    /// Load a ruleset through the loader, retrying while its predicate
    /// allows, then compile
    pub fn from_loader(loader: &dyn RulesetLoader, kind: TreeKind) -> anyhow::Result<DecisionEngine> {
        loop {
            match loader.load() {
                Ok(ruleset) => return Ok(DecisionEngine::new(ruleset, kind)),
                Err(error) => {
                    if !loader.should_retry(&error) {
                        return Err(error);
                    }
                    warn!(error = %error, "ruleset_load_retry");
                }
            }
        }
    }

    pub fn tree_kind(&self) -> TreeKind {
        self.kind
    }

    /// Snapshot of the current ruleset
    pub fn ruleset(&self) -> Ruleset {
        self.ruleset.read().clone()
    }

    /// Hand the current ruleset to a persister
    pub fn persist_to(&self, persister: &dyn RulesetPersister) {
        persister.persist(&self.ruleset.read());
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Build an evaluation input for the current ruleset, validating arity
    pub fn create_input(&self, values: Vec<String>) -> EngineResult<EvaluationInput> {
        self.create_input_at(values, None, &HashMap::new())
    }

    /// Build an evaluation input with an instant and an evaluation map
    /// keyed by evaluation names
    pub fn create_input_at(
        &self,
        values: Vec<String>,
        time: Option<DateTime<Utc>>,
        evaluation_map: &HashMap<String, String>,
    ) -> EngineResult<EvaluationInput> {
        let ruleset = self.ruleset.read();
        if values.len() != ruleset.driver_count() {
            return Err(EngineError::InputArityMismatch {
                ruleset: ruleset.name().to_string(),
                expected: ruleset.driver_count(),
                actual: values.len(),
            });
        }
        let evaluation_values = ruleset
            .evaluation_names()
            .iter()
            .map(|name| evaluation_map.get(name).cloned().unwrap_or_default())
            .collect();
        Ok(EvaluationInput {
            ruleset_name: ruleset.name().to_string(),
            values,
            time,
            evaluation_values,
        })
    }

    /// The single best match: highest weight, smallest rule id among ties
    pub fn single_evaluation(&self, input: &EvaluationInput) -> Option<EvaluationOutcome> {
        let matched = select_single(self.raw_matches(input))?;
        self.outcome(matched)
    }

    /// Every rule tied for the highest weight
    pub fn all_evaluations(&self, input: &EvaluationInput) -> Vec<EvaluationOutcome> {
        best_matches(self.raw_matches(input))
            .into_iter()
            .filter_map(|m| self.outcome(m))
            .collect()
    }

    /// Every terminal reachable for the input, wildcard branches included,
    /// with weights; the detail mode
    pub fn all_results(&self, input: &EvaluationInput) -> Vec<EvaluationOutcome> {
        self.tree
            .load()
            .evaluate_exhaustive(&input.values, input.time, &input.evaluation_values)
            .into_iter()
            .filter_map(|m| self.outcome(m))
            .collect()
    }

    /// Evaluate under an explicit result-selection mode
    pub fn evaluate(&self, input: &EvaluationInput, mode: SelectionMode) -> Vec<EvaluationOutcome> {
        match mode {
            SelectionMode::Single => self.single_evaluation(input).into_iter().collect(),
            SelectionMode::All => self.all_evaluations(input),
            SelectionMode::AllResults => self.all_results(input),
        }
    }

    fn raw_matches(&self, input: &EvaluationInput) -> Vec<RuleMatch> {
        self.tree
            .load()
            .evaluate(&input.values, input.time, &input.evaluation_values)
    }

    fn outcome(&self, matched: RuleMatch) -> Option<EvaluationOutcome> {
        let ruleset = self.ruleset.read();
        ruleset.rule(matched.rule_id).map(|rule| EvaluationOutcome {
            rule_id: rule.id(),
            rule_code: rule.code(),
            weight: matched.weight,
            outputs: rule.outputs().clone(),
        })
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Apply a built change and swap in a freshly compiled tree
    pub fn apply_change(&self, change: &mut Change) -> EngineResult<()> {
        let mut ruleset = self.ruleset.write();
        change.apply(&mut ruleset)?;
        self.swap_tree(&ruleset);
        Ok(())
    }

    /// Merge rule updates (absent value deletes) and recompile
    pub fn update_rules(&self, changes: HashMap<Uuid, Option<Rule>>) -> EngineResult<()> {
        let mut ruleset = self.ruleset.write();
        ruleset.update_rules(changes)?;
        self.swap_tree(&ruleset);
        Ok(())
    }

    /// Recompile the tree from the current ruleset
    pub fn rebuild(&self) {
        let ruleset = self.ruleset.read();
        self.swap_tree(&ruleset);
    }

    fn swap_tree(&self, ruleset: &Ruleset) {
        let tree = Tree::build_with_slice_capacity(ruleset, self.kind, self.slice_capacity);
        self.tree.store(Arc::new(tree));
        info!(
            ruleset = %ruleset.name(),
            rules = ruleset.rule_count(),
            kind = ?self.kind,
            "tree_rebuilt"
        );
    }
}
