//! Change Engine
//!
//! Additive and subtractive mutations of a ruleset, applied atomically.
//! A change collects rule changes and value-group changes while drafting,
//! is validated and sealed by [`Change::build`], and is applied to a
//! ruleset from the `Built` state only. Every validation runs before the
//! first mutation, so a rejected change leaves the ruleset untouched; the
//! caller rebuilds the matcher tree afterwards.
//!
//! ## State machine
//!
//! ```text
//! Drafting --build()--> Built --apply()--> Applied
//! ```
//!
//! The audit record is stamped at each transition: initiator at creation,
//! authoriser at build, application instant at apply.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::driver::{distant_future, epoch, GROUP_PREFIX};
use crate::error::{EngineError, EngineResult};
use crate::rule::Rule;
use crate::ruleset::{Ruleset, ValueGroup};

/// What a single entry does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Insert a new rule / group
    New,
    /// Replace the rule at its id / the group's values
    Amend,
    /// Restore a prior snapshot
    Original,
    /// Leave the target alone (groups: assert it exists)
    None,
}

/// Lifecycle of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Drafting,
    Built,
    Applied,
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChangeState::Drafting => "drafting",
            ChangeState::Built => "built",
            ChangeState::Applied => "applied",
        };
        f.write_str(text)
    }
}

/// Who touched the change, and when
#[derive(Debug, Clone)]
pub struct Audit {
    pub initiator: String,
    pub initiated_at: DateTime<Utc>,
    pub authoriser: Option<String>,
    pub authorised_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// One rule mutation
#[derive(Debug, Clone)]
pub struct RuleChange {
    pub change_type: ChangeType,
    pub rule: Rule,
}

/// One value-group mutation. When `rule_codes` and `driver_name` are both
/// given, applying the change also binds the group into those rules at the
/// named driver position.
#[derive(Debug, Clone)]
pub struct ValueGroupChange {
    pub change_type: ChangeType,
    pub group: ValueGroup,
    pub rule_codes: Vec<Uuid>,
    pub driver_name: Option<String>,
}

/// An atomic set of rule and value-group mutations against one ruleset
#[derive(Debug, Clone)]
pub struct Change {
    id: Uuid,
    ruleset_name: String,
    activation_time: Option<DateTime<Utc>>,
    change_range: (DateTime<Utc>, DateTime<Utc>),
    audit: Audit,
    state: ChangeState,
    rule_changes: Vec<RuleChange>,
    group_changes: Vec<ValueGroupChange>,
}

impl Change {
    /// Open a drafting change against the named ruleset
    pub fn new(ruleset_name: &str, initiator: &str) -> Change {
        Change {
            id: Uuid::new_v4(),
            ruleset_name: ruleset_name.to_string(),
            activation_time: None,
            change_range: (epoch(), distant_future()),
            audit: Audit {
                initiator: initiator.to_string(),
                initiated_at: Utc::now(),
                authoriser: None,
                authorised_at: None,
                applied_at: None,
            },
            state: ChangeState::Drafting,
            rule_changes: Vec::new(),
            group_changes: Vec::new(),
        }
    }

    pub fn with_activation_time(mut self, time: DateTime<Utc>) -> Change {
        self.activation_time = Some(time);
        self
    }

    pub fn with_change_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Change {
        self.change_range = (start, end);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ruleset_name(&self) -> &str {
        &self.ruleset_name
    }

    pub fn state(&self) -> ChangeState {
        self.state
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    pub fn activation_time(&self) -> Option<DateTime<Utc>> {
        self.activation_time
    }

    pub fn change_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.change_range
    }

    pub fn rule_changes(&self) -> &[RuleChange] {
        &self.rule_changes
    }

    pub fn group_changes(&self) -> &[ValueGroupChange] {
        &self.group_changes
    }

    /// Add a rule mutation; only allowed while drafting
    pub fn add_rule_change(&mut self, change_type: ChangeType, rule: Rule) -> EngineResult<()> {
        self.ensure_drafting()?;
        self.rule_changes.push(RuleChange { change_type, rule });
        Ok(())
    }

    /// Add a group mutation; only allowed while drafting
    pub fn add_group_change(&mut self, change: ValueGroupChange) -> EngineResult<()> {
        self.ensure_drafting()?;
        self.group_changes.push(change);
        Ok(())
    }

    /// Validate and seal the change. After this the change is immutable
    /// and eligible for [`Change::apply`].
    pub fn build(&mut self, authoriser: &str) -> EngineResult<()> {
        self.ensure_drafting()?;

        let mut codes = HashSet::new();
        for change in &self.rule_changes {
            if !codes.insert(change.rule.code()) {
                return Err(EngineError::DuplicateRuleCode(change.rule.code()));
            }
        }
        let mut names = HashSet::new();
        for change in &self.group_changes {
            if !names.insert(change.group.name.clone()) {
                return Err(EngineError::DuplicateGroupName(change.group.name.clone()));
            }
        }

        self.state = ChangeState::Built;
        self.audit.authoriser = Some(authoriser.to_string());
        self.audit.authorised_at = Some(Utc::now());
        Ok(())
    }

    /// Apply the change to the ruleset. All validation happens before the
    /// first mutation; on error the ruleset is unchanged. The caller owns
    /// rebuilding the matcher tree afterwards.
    pub fn apply(&mut self, ruleset: &mut Ruleset) -> EngineResult<()> {
        if self.state != ChangeState::Built {
            return Err(EngineError::ChangeNotBuilt {
                id: self.id,
                state: self.state.to_string(),
            });
        }

        // Read-only validation pass
        for change in &self.group_changes {
            if change.change_type == ChangeType::None
                && ruleset.value_group_by_id(change.group.id).is_none()
            {
                return Err(EngineError::UnknownValueGroup(change.group.name.clone()));
            }
            if let Some(driver_name) = bound_driver_name(change) {
                if ruleset.driver_position(driver_name).is_none() {
                    return Err(EngineError::UnknownDriverName(driver_name.to_string()));
                }
                for code in &change.rule_codes {
                    if ruleset.rule_by_code(*code).is_none() {
                        return Err(EngineError::RuleNotFound(*code));
                    }
                }
            }
        }
        for change in &self.rule_changes {
            validate_rule_arity(ruleset, &change.rule)?;
            if change.change_type == ChangeType::Amend
                && ruleset.rule(change.rule.id()).is_none()
            {
                return Err(EngineError::RuleNotFound(change.rule.id()));
            }
        }

        // Mutation pass: groups first so synthesized rule changes see them
        let mut synthesized: Vec<RuleChange> = Vec::new();
        for change in &self.group_changes {
            if change.change_type != ChangeType::None {
                ruleset.add_value_group(change.group.clone())?;
            }
            if let Some(driver_name) = bound_driver_name(change) {
                synthesized.extend(synthesize_bindings(ruleset, change, driver_name)?);
            }
        }

        for change in self.rule_changes.iter().chain(synthesized.iter()) {
            match change.change_type {
                ChangeType::New | ChangeType::Amend | ChangeType::Original => {
                    // Rules may have been authored against another cache;
                    // make sure this ruleset's cache knows their drivers
                    for driver in change.rule.drivers() {
                        ruleset.driver_cache().adopt(driver);
                    }
                    for driver in change.rule.evaluations().unwrap_or_default() {
                        ruleset.driver_cache().adopt(driver);
                    }
                    ruleset.add_rule(change.rule.clone())?;
                }
                ChangeType::None => {}
            }
        }

        self.state = ChangeState::Applied;
        self.audit.applied_at = Some(Utc::now());
        info!(
            change = %self.id,
            ruleset = %self.ruleset_name,
            rules = self.rule_changes.len(),
            synthesized = synthesized.len(),
            groups = self.group_changes.len(),
            "change_applied"
        );
        Ok(())
    }

    fn ensure_drafting(&self) -> EngineResult<()> {
        if self.state != ChangeState::Drafting {
            return Err(EngineError::ChangeSealed {
                id: self.id,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }
}

/// The driver name a group change binds into rules, when it binds at all
fn bound_driver_name(change: &ValueGroupChange) -> Option<&str> {
    if change.rule_codes.is_empty() {
        return None;
    }
    change.driver_name.as_deref()
}

/// Amend rule changes binding the group driver into every referenced rule
/// at the named position
fn synthesize_bindings(
    ruleset: &Ruleset,
    change: &ValueGroupChange,
    driver_name: &str,
) -> EngineResult<Vec<RuleChange>> {
    let position = ruleset
        .driver_position(driver_name)
        .ok_or_else(|| EngineError::UnknownDriverName(driver_name.to_string()))?;
    let group_driver = ruleset
        .driver_cache()
        .get_or_create(&format!("{GROUP_PREFIX}{}", change.group.name))?;

    let mut changes = Vec::new();
    for code in &change.rule_codes {
        let rule = ruleset
            .rule_by_code(*code)
            .ok_or(EngineError::RuleNotFound(*code))?;
        let mut drivers = rule.drivers().to_vec();
        drivers[position] = std::sync::Arc::clone(&group_driver);
        let mut patched = Rule::new(rule.id(), drivers, rule.outputs().clone())
            .with_code(rule.code())
            .with_validity(rule.start(), rule.end());
        if let Some(evaluations) = rule.evaluations() {
            patched = patched.with_evaluations(evaluations.to_vec());
        }
        changes.push(RuleChange {
            change_type: ChangeType::Amend,
            rule: patched,
        });
    }
    Ok(changes)
}

fn validate_rule_arity(ruleset: &Ruleset, rule: &Rule) -> EngineResult<()> {
    if rule.drivers().len() != ruleset.driver_count() {
        return Err(EngineError::DriverCountMismatch {
            rule: rule.id(),
            ruleset: ruleset.name().to_string(),
            expected: ruleset.driver_count(),
            actual: rule.drivers().len(),
        });
    }
    Ok(())
}
