//! Engine Error Types

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by ruleset construction, change application and the
/// canonical text form.
///
/// Evaluation never produces an error: inputs that match no rule yield an
/// empty result set.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required field was null or empty
    #[error("required field is empty: {0}")]
    EmptyField(String),

    /// Rule supplies a different number of drivers than the ruleset defines
    #[error("rule {rule} supplies {actual} drivers but ruleset '{ruleset}' defines {expected}")]
    DriverCountMismatch {
        rule: Uuid,
        ruleset: String,
        expected: usize,
        actual: usize,
    },

    /// Ruleset defines more driver positions than a 64-bit weight can carry
    #[error("ruleset '{0}' defines {1} driver positions; the maximum is 32")]
    TooManyDrivers(String, usize),

    /// Evaluation input with the wrong number of values
    #[error("input supplies {actual} values but ruleset '{ruleset}' defines {expected} drivers")]
    InputArityMismatch {
        ruleset: String,
        expected: usize,
        actual: usize,
    },

    /// Two changes in the same change set target the same rule code
    #[error("multiple changes target rule code {0}")]
    DuplicateRuleCode(Uuid),

    /// Two changes in the same change set target the same value group
    #[error("multiple changes target value group '{0}'")]
    DuplicateGroupName(String),

    /// Change references a driver name the ruleset does not define
    #[error("unknown driver name '{0}'")]
    UnknownDriverName(String),

    /// Reference to a value group that is not registered
    #[error("unknown value group '{0}'")]
    UnknownValueGroup(String),

    /// Change references a rule that is not in the ruleset
    #[error("rule {0} not found")]
    RuleNotFound(Uuid),

    /// Canonical driver text that cannot be parsed
    #[error("malformed driver text '{text}': {reason}")]
    MalformedDriver { text: String, reason: String },

    /// Instant that is not a valid ISO-8601 timestamp
    #[error("invalid instant: '{0}'")]
    InvalidInstant(String),

    /// Integer bound that cannot be parsed
    #[error("invalid integer: '{0}'")]
    InvalidInteger(String),

    /// Regular expression rejected by the regex engine
    #[error("invalid regular expression '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// Change applied from the wrong state
    #[error("change {id} is in state '{state}'; only built changes can be applied")]
    ChangeNotBuilt { id: Uuid, state: String },

    /// Change mutated after drafting closed
    #[error("change {id} is in state '{state}'; drafting is closed")]
    ChangeSealed { id: Uuid, state: String },

    /// JSON error from the canonical text form
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
