//! Boundary Value Tests
//!
//! Edge cases of the driver model exercised through full evaluations:
//! integer-range bounds, date-range inclusivity, regex auto-detection and
//! group-of-group cycles.

use std::collections::HashMap;
use uuid::Uuid;

use ruletree::{DecisionEngine, DriverKind, Ruleset, TreeKind, ValueGroup};

fn values(texts: &[&str]) -> Vec<String> {
    texts.iter().map(ToString::to_string).collect()
}

fn engine_with_driver(text: &str) -> DecisionEngine {
    let mut ruleset = Ruleset::new("boundary", vec!["VALUE".into()]).unwrap();
    let rule = ruleset
        .build_rule(Uuid::new_v4(), &[text], HashMap::new())
        .unwrap();
    ruleset.add_rule(rule).unwrap();
    DecisionEngine::new(ruleset, TreeKind::Single)
}

fn matches(engine: &DecisionEngine, input: &str) -> bool {
    let input = engine.create_input(values(&[input])).unwrap();
    engine.single_evaluation(&input).is_some()
}

// ============================================================================
// Integer ranges
// ============================================================================

#[test]
fn test_integer_range_min_only_spans_down_to_platform_minimum() {
    let engine = engine_with_driver("IR:|100");
    assert!(matches(&engine, "12"));
    assert!(matches(&engine, "100"));
    assert!(matches(&engine, &i32::MIN.to_string()));
    assert!(!matches(&engine, "101"));
}

#[test]
fn test_integer_range_max_only_excludes_platform_maximum() {
    let engine = engine_with_driver("IR:100|");
    assert!(matches(&engine, "123"));
    assert!(!matches(&engine, &i32::MAX.to_string()));
    assert!(!matches(&engine, "12"));
}

#[test]
fn test_integer_range_both_bounds_inclusive() {
    let engine = engine_with_driver("IR:10|20");
    assert!(matches(&engine, "10"));
    assert!(matches(&engine, "20"));
    assert!(!matches(&engine, "9"));
    assert!(!matches(&engine, "21"));
}

#[test]
fn test_integer_range_non_numeric_input_never_matches() {
    let engine = engine_with_driver("IR:10|20");
    assert!(!matches(&engine, "fifteen"));
    assert!(!matches(&engine, "*"));
    assert!(!matches(&engine, ""));
}

// ============================================================================
// Date ranges
// ============================================================================

#[test]
fn test_date_range_inclusive_at_both_ends() {
    let engine = engine_with_driver("DR:2013-01-01T00:00:00Z|2013-12-31T00:00:00Z");
    assert!(matches(&engine, "2013-01-01T00:00:00Z"));
    assert!(matches(&engine, "2013-12-31T00:00:00Z"));
    assert!(!matches(&engine, "2012-12-31T23:59:59Z"));
    assert!(!matches(&engine, "2013-12-31T00:00:01Z"));
}

#[test]
fn test_date_range_passes_wildcard_input() {
    let engine = engine_with_driver("DR:2013-01-01T00:00:00Z|2013-12-31T00:00:00Z");
    assert!(matches(&engine, "*"));
    assert!(!matches(&engine, "not-a-date"));
}

// ============================================================================
// Regex auto-detection
// ============================================================================

#[test]
fn test_regex_auto_detection_boundaries() {
    let auto = engine_with_driver("AP.?C");
    assert!(matches(&auto, "APAC"));
    assert!(matches(&auto, "APC"));

    let plain = engine_with_driver("APAC");
    assert!(matches(&plain, "APAC"));
    // A plain string stays a plain string even for regex-like inputs
    assert!(!matches(&plain, "APBC"));

    let forced = engine_with_driver("RE:APAC");
    assert!(matches(&forced, "APAC"));
}

#[test]
fn test_detected_kinds() {
    let mut ruleset = Ruleset::new("kinds", vec!["A".into()]).unwrap();
    for text in ["AP.?C", "APAC", "RE:APAC", "IR:|5", "DR:|"] {
        ruleset.build_drivers(&[text]).unwrap();
    }
    assert_eq!(ruleset.drivers_by_kind(DriverKind::Regex).len(), 2);
    assert_eq!(ruleset.drivers_by_kind(DriverKind::String).len(), 1);
    assert_eq!(ruleset.drivers_by_kind(DriverKind::IntegerRange).len(), 1);
    assert_eq!(ruleset.drivers_by_kind(DriverKind::DateRange).len(), 1);
}

// ============================================================================
// Group cycles
// ============================================================================

#[test]
fn test_group_cycle_yields_transitive_closure() {
    let mut ruleset = Ruleset::new("cycles", vec!["EXCHANGE".into()]).unwrap();
    ruleset
        .add_value_group(ValueGroup::new(
            "A",
            vec!["one".into(), "VG:B".into()],
        ))
        .unwrap();
    ruleset
        .add_value_group(ValueGroup::new(
            "B",
            vec!["two".into(), "VG:A".into()],
        ))
        .unwrap();
    let rule = ruleset
        .build_rule(Uuid::new_v4(), &["VG:A"], HashMap::new())
        .unwrap();
    ruleset.add_rule(rule).unwrap();
    let engine = DecisionEngine::new(ruleset, TreeKind::Single);

    // The full closure of literals is reachable through either group
    assert!(matches(&engine, "one"));
    assert!(matches(&engine, "two"));
    assert!(!matches(&engine, "three"));
}

#[test]
fn test_deep_group_nesting_terminates() {
    let mut ruleset = Ruleset::new("nesting", vec!["EXCHANGE".into()]).unwrap();
    // G0 -> G1 -> ... -> G9, literal only at the bottom
    for i in 0..10 {
        let values = if i == 9 {
            vec!["bottom".to_string()]
        } else {
            vec![format!("VG:G{}", i + 1)]
        };
        ruleset
            .add_value_group(ValueGroup::new(&format!("G{i}"), values))
            .unwrap();
    }
    let rule = ruleset
        .build_rule(Uuid::new_v4(), &["VG:G0"], HashMap::new())
        .unwrap();
    ruleset.add_rule(rule).unwrap();
    let engine = DecisionEngine::new(ruleset, TreeKind::Single);
    assert!(matches(&engine, "bottom"));
    assert!(!matches(&engine, "middle"));
}

// ============================================================================
// Weight extremes
// ============================================================================

#[test]
fn test_thirty_two_driver_positions_supported() {
    let names: Vec<String> = (0..32).map(|i| format!("D{i}")).collect();
    let mut ruleset = Ruleset::new("wide", names).unwrap();
    let texts: Vec<String> = (0..32).map(|i| format!("v{i}")).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let rule = ruleset
        .build_rule(Uuid::new_v4(), &refs, HashMap::new())
        .unwrap();
    assert_eq!(rule.weight(), u64::from(u32::MAX));
    ruleset.add_rule(rule).unwrap();

    let engine = DecisionEngine::new(ruleset, TreeKind::Single);
    let input = engine.create_input(texts.clone()).unwrap();
    assert!(engine.single_evaluation(&input).is_some());
}
