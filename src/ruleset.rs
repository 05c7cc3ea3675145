//! Ruleset Data Model
//!
//! A named collection of rules sharing one driver-name schema, one
//! evaluation-name schema, a set of value groups and a shared driver
//! cache. The ruleset is the unit the tree compiler consumes and the unit
//! the change engine mutates; the engine treats it as copy-on-rebuild.
//!
//! Invariants:
//! - every rule carries exactly `driver_names.len()` drivers
//! - between 1 and 32 driver positions, so weights fit a `u64`

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::driver::cache::DriverCache;
use crate::driver::{distant_future, epoch, DriverHandle, DriverKind};
use crate::error::{EngineError, EngineResult};
use crate::rule::Rule;

/// Hard cap on driver positions; keeps every weight inside a `u64`
pub const MAX_DRIVER_COUNT: usize = 32;

/// A named, possibly nested, set of driver values treated as one matcher.
///
/// `values` entries of the form `VG:<uuid>` (or `VG:<name>`) refer to other
/// groups; resolution replaces them with the actual group driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueGroup {
    pub id: Uuid,
    pub name: String,
    pub values: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValueGroup {
    /// Group valid from the epoch to the far future
    pub fn new(name: &str, values: Vec<String>) -> ValueGroup {
        ValueGroup {
            id: Uuid::new_v4(),
            name: name.to_string(),
            values,
            start: epoch(),
            end: distant_future(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> ValueGroup {
        self.id = id;
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> ValueGroup {
        self.start = start;
        self.end = end;
        self
    }
}

/// A named ruleset: rule map, value groups and the shared driver cache
#[derive(Debug, Clone)]
pub struct Ruleset {
    name: String,
    driver_names: Vec<String>,
    evaluation_names: Vec<String>,
    rules: HashMap<Uuid, Rule>,
    groups: HashMap<String, ValueGroup>,
    cache: Arc<DriverCache>,
}

impl Ruleset {
    /// Create an empty ruleset over the given driver positions
    pub fn new(name: &str, driver_names: Vec<String>) -> EngineResult<Ruleset> {
        if name.is_empty() {
            return Err(EngineError::EmptyField("ruleset name".to_string()));
        }
        if driver_names.is_empty() {
            return Err(EngineError::EmptyField("driver names".to_string()));
        }
        if driver_names.len() > MAX_DRIVER_COUNT {
            return Err(EngineError::TooManyDrivers(
                name.to_string(),
                driver_names.len(),
            ));
        }
        if driver_names.iter().any(String::is_empty) {
            return Err(EngineError::EmptyField("driver name".to_string()));
        }
        Ok(Ruleset {
            name: name.to_string(),
            driver_names,
            evaluation_names: Vec::new(),
            rules: HashMap::new(),
            groups: HashMap::new(),
            cache: Arc::new(DriverCache::new()),
        })
    }

    /// Name the evaluation predicate positions
    pub fn with_evaluation_names(mut self, names: Vec<String>) -> Ruleset {
        self.evaluation_names = names;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_names(&self) -> &[String] {
        &self.driver_names
    }

    pub fn evaluation_names(&self) -> &[String] {
        &self.evaluation_names
    }

    /// Number of driver positions (`k`)
    pub fn driver_count(&self) -> usize {
        self.driver_names.len()
    }

    /// The shared driver interning cache
    pub fn driver_cache(&self) -> &Arc<DriverCache> {
        &self.cache
    }

    /// Position of a named driver
    pub fn driver_position(&self, driver_name: &str) -> Option<usize> {
        self.driver_names.iter().position(|n| n == driver_name)
    }

    /// All interned drivers of one kind
    pub fn drivers_by_kind(&self, kind: DriverKind) -> Vec<DriverHandle> {
        self.cache.drivers_by_kind(kind)
    }

    // ========================================================================
    // Value groups
    // ========================================================================

    /// Register (or redefine) a value group and intern its driver
    pub fn add_value_group(&mut self, group: ValueGroup) -> EngineResult<DriverHandle> {
        if group.name.is_empty() {
            return Err(EngineError::EmptyField("value group name".to_string()));
        }
        let handle = self.cache.intern_group(&group)?;
        self.groups.insert(group.name.clone(), group);
        Ok(handle)
    }

    /// Replace an existing group's values in place. Every rule holding the
    /// group driver observes the new membership without a rebuild of the
    /// rule records themselves.
    pub fn update_group_values(&mut self, name: &str, values: Vec<String>) -> EngineResult<()> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| EngineError::UnknownValueGroup(name.to_string()))?;
        let mut updated = group.clone();
        updated.values = values;
        // Re-link membership before committing so a malformed member text
        // leaves the registered group untouched
        self.cache.intern_group(&updated)?;
        self.groups.insert(name.to_string(), updated);
        Ok(())
    }

    pub fn value_group(&self, name: &str) -> Option<&ValueGroup> {
        self.groups.get(name)
    }

    /// Find a group by id
    pub fn value_group_by_id(&self, id: Uuid) -> Option<&ValueGroup> {
        self.groups.values().find(|g| g.id == id)
    }

    pub fn value_groups(&self) -> impl Iterator<Item = &ValueGroup> {
        self.groups.values()
    }

    // ========================================================================
    // Rules
    // ========================================================================

    /// Intern a list of driver texts through the shared cache
    pub fn build_drivers(&self, texts: &[&str]) -> EngineResult<Vec<DriverHandle>> {
        texts.iter().map(|t| self.cache.get_or_create(t)).collect()
    }

    /// Build a rule from driver texts, validating the driver count
    pub fn build_rule(
        &self,
        id: Uuid,
        input_texts: &[&str],
        outputs: HashMap<String, String>,
    ) -> EngineResult<Rule> {
        let rule = Rule::new(id, self.build_drivers(input_texts)?, outputs);
        self.validate_rule(&rule)?;
        Ok(rule)
    }

    /// Insert a rule, replacing any rule with the same id
    pub fn add_rule(&mut self, rule: Rule) -> EngineResult<()> {
        self.validate_rule(&rule)?;
        self.rules.insert(rule.id(), rule);
        Ok(())
    }

    /// Atomic merge: for each entry, an absent value deletes the rule and a
    /// present value inserts or replaces it. All rules are validated before
    /// any mutation, so a failing entry leaves the ruleset untouched.
    pub fn update_rules(&mut self, changes: HashMap<Uuid, Option<Rule>>) -> EngineResult<()> {
        for rule in changes.values().flatten() {
            self.validate_rule(rule)?;
        }
        for (id, entry) in changes {
            match entry {
                Some(rule) => {
                    self.rules.insert(id, rule);
                }
                None => {
                    self.rules.remove(&id);
                }
            }
        }
        Ok(())
    }

    /// Remove rules by id; unknown ids are ignored
    pub fn remove_rules(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.rules.remove(id);
        }
    }

    pub fn rule(&self, id: Uuid) -> Option<&Rule> {
        self.rules.get(&id)
    }

    /// Latest rule carrying the given rule code, if any
    pub fn rule_by_code(&self, code: Uuid) -> Option<&Rule> {
        self.rules.values().find(|r| r.code() == code)
    }

    pub fn rules(&self) -> &HashMap<Uuid, Rule> {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn validate_rule(&self, rule: &Rule) -> EngineResult<()> {
        if rule.drivers().len() != self.driver_names.len() {
            return Err(EngineError::DriverCountMismatch {
                rule: rule.id(),
                ruleset: self.name.clone(),
                expected: self.driver_names.len(),
                actual: rule.drivers().len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ruleset() -> Ruleset {
        Ruleset::new(
            "commissions",
            vec!["EXMETHOD".into(), "EXCHANGE".into(), "PRODUCT".into()],
        )
        .unwrap()
    }

    fn outputs(rate: &str) -> HashMap<String, String> {
        HashMap::from([("Rate".to_string(), rate.to_string())])
    }

    #[test]
    fn test_rejects_empty_name_and_drivers() {
        assert!(Ruleset::new("", vec!["A".into()]).is_err());
        assert!(Ruleset::new("x", vec![]).is_err());
        assert!(Ruleset::new("x", vec!["A".into(), String::new()]).is_err());
    }

    #[test]
    fn test_rejects_too_many_drivers() {
        let names: Vec<String> = (0..33).map(|i| format!("D{i}")).collect();
        assert!(matches!(
            Ruleset::new("x", names),
            Err(EngineError::TooManyDrivers(_, 33))
        ));
    }

    #[test]
    fn test_rule_arity_enforced() {
        let mut ruleset = test_ruleset();
        let err = ruleset.build_rule(Uuid::new_v4(), &["VOICE", "CME"], outputs("1.0"));
        assert!(matches!(err, Err(EngineError::DriverCountMismatch { .. })));

        let rule = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap();
        ruleset.add_rule(rule).unwrap();
        assert_eq!(ruleset.rule_count(), 1);
    }

    #[test]
    fn test_build_rule_shares_drivers() {
        let mut ruleset = test_ruleset();
        let a = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap();
        let b = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "S&P"], outputs("1.1"))
            .unwrap();
        ruleset.add_rule(a.clone()).unwrap();
        ruleset.add_rule(b.clone()).unwrap();
        assert!(Arc::ptr_eq(&a.drivers()[0], &b.drivers()[0]));
        assert!(Arc::ptr_eq(&a.drivers()[1], &b.drivers()[1]));
        assert!(!Arc::ptr_eq(&a.drivers()[2], &b.drivers()[2]));
    }

    #[test]
    fn test_update_rules_postconditions() {
        let mut ruleset = test_ruleset();
        let keep = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap();
        let drop = ruleset
            .build_rule(Uuid::new_v4(), &["*", "CME", "ED"], outputs("1.1"))
            .unwrap();
        ruleset.add_rule(keep.clone()).unwrap();
        ruleset.add_rule(drop.clone()).unwrap();

        let added = ruleset
            .build_rule(Uuid::new_v4(), &["DMA", "*", "*"], outputs("1.2"))
            .unwrap();
        let changes = HashMap::from([
            (drop.id(), None),
            (added.id(), Some(added.clone())),
        ]);
        ruleset.update_rules(changes).unwrap();

        assert!(ruleset.rule(drop.id()).is_none());
        assert!(ruleset.rule(added.id()).is_some());
        // Untouched rules stay
        assert!(ruleset.rule(keep.id()).is_some());
        assert_eq!(ruleset.rule_count(), 2);
    }

    #[test]
    fn test_update_rules_is_atomic_on_validation_failure() {
        let mut ruleset = test_ruleset();
        let existing = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap();
        ruleset.add_rule(existing.clone()).unwrap();

        // One valid entry, one with the wrong arity
        let good = ruleset
            .build_rule(Uuid::new_v4(), &["DMA", "*", "*"], outputs("1.2"))
            .unwrap();
        let bad = Rule::new(
            Uuid::new_v4(),
            ruleset.build_drivers(&["DMA"]).unwrap(),
            outputs("1.3"),
        );
        let changes = HashMap::from([
            (good.id(), Some(good.clone())),
            (bad.id(), Some(bad)),
            (existing.id(), None),
        ]);

        assert!(ruleset.update_rules(changes).is_err());
        // Nothing was applied
        assert!(ruleset.rule(existing.id()).is_some());
        assert!(ruleset.rule(good.id()).is_none());
        assert_eq!(ruleset.rule_count(), 1);
    }

    #[test]
    fn test_group_registration_and_lookup() {
        let mut ruleset = test_ruleset();
        let group = ValueGroup::new("CMEGroup", vec!["CME".into(), "CBOT".into()]);
        let id = group.id;
        let handle = ruleset.add_value_group(group).unwrap();
        assert!(handle.matches("CBOT"));
        assert_eq!(ruleset.value_group("CMEGroup").map(|g| g.id), Some(id));
        assert!(ruleset.value_group_by_id(id).is_some());
    }

    #[test]
    fn test_update_group_values_updates_shared_driver() {
        let mut ruleset = test_ruleset();
        let group = ValueGroup::new("CMEGroup", vec!["CME".into()]);
        let handle = ruleset.add_value_group(group).unwrap();
        assert!(!handle.matches("CBOT"));

        ruleset
            .update_group_values("CMEGroup", vec!["CME".into(), "CBOT".into()])
            .unwrap();
        // The already-held handle observes the new membership
        assert!(handle.matches("CBOT"));

        assert!(ruleset
            .update_group_values("Missing", vec!["x".into()])
            .is_err());
    }

    #[test]
    fn test_remove_rules_ignores_unknown_ids() {
        let mut ruleset = test_ruleset();
        let rule = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap();
        ruleset.add_rule(rule.clone()).unwrap();
        ruleset.remove_rules(&[rule.id(), Uuid::new_v4()]);
        assert!(ruleset.is_empty());
    }

    #[test]
    fn test_rule_by_code() {
        let mut ruleset = test_ruleset();
        let code = Uuid::new_v4();
        let rule = ruleset
            .build_rule(Uuid::new_v4(), &["VOICE", "CME", "ED"], outputs("1.0"))
            .unwrap()
            .with_code(code);
        ruleset.add_rule(rule.clone()).unwrap();
        assert_eq!(ruleset.rule_by_code(code).map(Rule::id), Some(rule.id()));
        assert!(ruleset.rule_by_code(Uuid::new_v4()).is_none());
    }
}
