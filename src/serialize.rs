//! Canonical Ruleset Text Form
//!
//! Serializable document types mirroring the ruleset for JSON storage and
//! interchange. Unknown fields are tolerated; missing validity bounds
//! default to the epoch / far-future sentinels and a missing rule code
//! defaults to the rule's uuid.
//!
//! Group references inside a rule's input list may name a group either as
//! `VG:<uuid>` or `VG:<name>`; parsing resolves both through the document's
//! `groups` table and rejects references to groups it does not declare.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::{distant_future, epoch, GROUP_PREFIX};
use crate::error::{EngineError, EngineResult};
use crate::rule::Rule;
use crate::ruleset::{Ruleset, ValueGroup};

/// Ruleset document for JSON storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesetDoc {
    pub name: String,
    pub drivers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluations: Option<Vec<String>>,
    #[serde(default)]
    pub groups: Vec<GroupDoc>,
    #[serde(default)]
    pub rules: Vec<RuleDoc>,
}

/// Value-group document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDoc {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// Epoch millis; absent means the epoch sentinel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Epoch millis; absent means the far-future sentinel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Rule document. Outputs serialize as `"key:value"` strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDoc {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Uuid>,
    #[serde(rename = "in")]
    pub inputs: Vec<String>,
    #[serde(default, rename = "eval", skip_serializing_if = "Option::is_none")]
    pub evaluations: Option<Vec<String>>,
    #[serde(default, rename = "out")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Serialize a ruleset to its canonical JSON text
pub fn to_json(ruleset: &Ruleset) -> EngineResult<String> {
    Ok(serde_json::to_string_pretty(&to_doc(ruleset))?)
}

/// Parse a ruleset from its canonical JSON text
pub fn from_json(text: &str) -> EngineResult<Ruleset> {
    let doc: RulesetDoc = serde_json::from_str(text)?;
    from_doc(&doc)
}

/// Build the document form of a ruleset. Groups and rules are emitted in
/// name / uuid order so the text form is stable across runs.
pub fn to_doc(ruleset: &Ruleset) -> RulesetDoc {
    let mut groups: Vec<GroupDoc> = ruleset
        .value_groups()
        .map(|group| GroupDoc {
            id: group.id,
            name: group.name.clone(),
            values: group.values.clone(),
            start: instant_to_millis(group.start, epoch()),
            end: instant_to_millis(group.end, distant_future()),
        })
        .collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    let mut rules: Vec<RuleDoc> = ruleset
        .rules()
        .values()
        .map(|rule| {
            let mut outputs: Vec<String> = rule
                .outputs()
                .iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect();
            outputs.sort();
            RuleDoc {
                uuid: rule.id(),
                code: (rule.code() != rule.id()).then(|| rule.code()),
                inputs: rule.drivers().iter().map(|d| d.canonical_text()).collect(),
                evaluations: rule
                    .evaluations()
                    .map(|evals| evals.iter().map(|d| d.canonical_text()).collect()),
                outputs,
                start: instant_to_millis(rule.start(), epoch()),
                end: instant_to_millis(rule.end(), distant_future()),
            }
        })
        .collect();
    rules.sort_by_key(|r| r.uuid);

    RulesetDoc {
        name: ruleset.name().to_string(),
        drivers: ruleset.driver_names().to_vec(),
        evaluations: (!ruleset.evaluation_names().is_empty())
            .then(|| ruleset.evaluation_names().to_vec()),
        groups,
        rules,
    }
}

/// Materialize a ruleset from its document form
pub fn from_doc(doc: &RulesetDoc) -> EngineResult<Ruleset> {
    let mut ruleset = Ruleset::new(&doc.name, doc.drivers.clone())?;
    if let Some(evaluations) = &doc.evaluations {
        ruleset = ruleset.with_evaluation_names(evaluations.clone());
    }

    // Groups first; intern order does not matter because nested references
    // create placeholders that later definitions fill
    for group in &doc.groups {
        ruleset.add_value_group(ValueGroup {
            id: group.id,
            name: group.name.clone(),
            values: group.values.clone(),
            start: millis_to_instant(group.start, epoch()),
            end: millis_to_instant(group.end, distant_future()),
        })?;
    }

    for rule_doc in &doc.rules {
        let drivers = resolve_driver_texts(&ruleset, doc, &rule_doc.inputs)?;
        let mut outputs = std::collections::HashMap::new();
        for entry in &rule_doc.outputs {
            let (key, value) = entry.split_once(':').unwrap_or((entry.as_str(), ""));
            outputs.insert(key.to_string(), value.to_string());
        }
        let mut rule = Rule::new(rule_doc.uuid, drivers, outputs)
            .with_code(rule_doc.code.unwrap_or(rule_doc.uuid))
            .with_validity(
                millis_to_instant(rule_doc.start, epoch()),
                millis_to_instant(rule_doc.end, distant_future()),
            );
        if let Some(evaluations) = &rule_doc.evaluations {
            rule = rule.with_evaluations(resolve_driver_texts(&ruleset, doc, evaluations)?);
        }
        ruleset.add_rule(rule)?;
    }
    Ok(ruleset)
}

/// Semantic ruleset equality for round-trip checks: same rules by uuid with
/// equal drivers (by canonical text), outputs, codes and validity; same
/// groups by id
pub fn rulesets_equivalent(a: &Ruleset, b: &Ruleset) -> bool {
    if a.name() != b.name()
        || a.driver_names() != b.driver_names()
        || a.evaluation_names() != b.evaluation_names()
        || a.rule_count() != b.rule_count()
    {
        return false;
    }
    let groups_match = a.value_groups().all(|group| {
        b.value_group(&group.name)
            .is_some_and(|other| other.id == group.id && other.values == group.values)
    }) && a.value_groups().count() == b.value_groups().count();
    if !groups_match {
        return false;
    }
    a.rules().values().all(|rule| {
        b.rule(rule.id()).is_some_and(|other| {
            other.code() == rule.code()
                && canonical_texts(rule.drivers()) == canonical_texts(other.drivers())
                && other.outputs() == rule.outputs()
                && other.start() == rule.start()
                && other.end() == rule.end()
        })
    })
}

fn canonical_texts(drivers: &[crate::driver::DriverHandle]) -> Vec<String> {
    drivers.iter().map(|d| d.canonical_text()).collect()
}

/// Resolve rule driver texts, routing group references through the
/// document's groups table
fn resolve_driver_texts(
    ruleset: &Ruleset,
    doc: &RulesetDoc,
    texts: &[String],
) -> EngineResult<Vec<crate::driver::DriverHandle>> {
    texts
        .iter()
        .map(|text| {
            if let Some(reference) = text.strip_prefix(GROUP_PREFIX) {
                // Embedded expansions define their own groups inline
                if !reference.contains(':') {
                    let declared = doc.groups.iter().any(|g| {
                        g.name == reference || g.id.to_string() == reference
                    });
                    if !declared {
                        return Err(EngineError::UnknownValueGroup(reference.to_string()));
                    }
                }
            }
            ruleset.driver_cache().get_or_create(text)
        })
        .collect()
}

fn millis_to_instant(millis: Option<i64>, default: DateTime<Utc>) -> DateTime<Utc> {
    match millis {
        Some(ms) => Utc.timestamp_millis_opt(ms).single().unwrap_or(default),
        None => default,
    }
}

fn instant_to_millis(instant: DateTime<Utc>, sentinel: DateTime<Utc>) -> Option<i64> {
    (instant != sentinel).then(|| instant.timestamp_millis())
}
