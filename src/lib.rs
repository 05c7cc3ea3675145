//! # RuleTree Decision Engine
//!
//! A weighted decision-tree rule engine: compile a named ruleset of
//! multi-driver predicate rules into an in-memory matcher tree and, for a
//! vector of input strings (and optionally an evaluation instant plus an
//! auxiliary evaluation map), resolve the rule(s) whose driver pattern
//! matches with the highest specificity.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Ruleset (rules + value groups + driver cache)
//!     ↓
//! [Tree Compiler]          → layered matcher tree (single/dated/sliced)
//!     ↓
//! [Failure Links]          → wildcard fall-through edges (single flavor)
//!     ↓
//! [Evaluator]              → (inputs, time) → best-weight rule id(s)
//!     ↓
//! Outputs (rule output map)
//! ```
//!
//! Changes flow separately: a [`change::Change`] is drafted, built and
//! applied to the ruleset atomically, after which the engine compiles a
//! fresh tree and swaps the shared reference.
//!
//! ## Usage
//!
//! ```rust
//! use ruletree::{DecisionEngine, Ruleset, TreeKind};
//! use std::collections::HashMap;
//! use uuid::Uuid;
//!
//! let mut ruleset = Ruleset::new(
//!     "commissions",
//!     vec!["EXMETHOD".into(), "EXCHANGE".into(), "PRODUCT".into()],
//! )?;
//! let rule = ruleset.build_rule(
//!     Uuid::new_v4(),
//!     &["VOICE", "CME", "*"],
//!     HashMap::from([("Rate".to_string(), "1.4".to_string())]),
//! )?;
//! ruleset.add_rule(rule)?;
//!
//! let engine = DecisionEngine::new(ruleset, TreeKind::Single);
//! let input = engine.create_input(vec![
//!     "VOICE".into(), "CME".into(), "ED".into(),
//! ])?;
//! let outcome = engine.single_evaluation(&input).expect("matched");
//! assert_eq!(outcome.outputs["Rate"], "1.4");
//! # Ok::<(), ruletree::EngineError>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `driver` | Match atoms (string/regex/ranges/groups) + shared interning cache |
//! | `rule` / `ruleset` | Immutable rule records, weighting, ruleset invariants |
//! | `tree` | Compiler, failure links, evaluator, time-sliced root + LRU |
//! | `change` | Atomic rule / value-group change application |
//! | `serialize` | Canonical JSON text form |
//! | `engine` | Evaluation API, loader/persister seams, tree swapping |
//! | `config` | Figment configuration + tracing init |

pub mod change;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod rule;
pub mod ruleset;
pub mod serialize;
pub mod tree;

// Re-export the embedding surface
pub use change::{Change, ChangeState, ChangeType, RuleChange, ValueGroupChange};
pub use config::{init_logging, Config, LoggingConfig, TreeConfig};
pub use driver::cache::DriverCache;
pub use driver::{Driver, DriverHandle, DriverKind, WILDCARD};
pub use engine::{
    DecisionEngine, EvaluationInput, EvaluationOutcome, RulesetLoader, RulesetPersister,
};
pub use error::{EngineError, EngineResult};
pub use rule::Rule;
pub use ruleset::{Ruleset, ValueGroup, MAX_DRIVER_COUNT};
pub use serialize::{from_json, rulesets_equivalent, to_json, RulesetDoc};
pub use tree::{RuleMatch, SelectionMode, Tree, TreeKind};
