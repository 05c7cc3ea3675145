//! Serialization Round-Trip Tests
//!
//! The canonical JSON text form: emit, re-parse and compare under the
//! semantic matcher (same rules by uuid, same drivers by canonical text,
//! same outputs, same groups), plus behavioural parity of the parsed copy.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use ruletree::{
    from_json, rulesets_equivalent, to_json, DecisionEngine, Ruleset, TreeKind, ValueGroup,
};

fn instant(text: &str) -> DateTime<Utc> {
    ruletree::driver::parse_instant(text).unwrap()
}

fn rich_ruleset() -> Ruleset {
    let mut ruleset = Ruleset::new(
        "commissions",
        vec![
            "EXMETHOD".into(),
            "EXCHANGE".into(),
            "PRODUCT".into(),
            "REGION".into(),
            "ASSET".into(),
        ],
    )
    .unwrap()
    .with_evaluation_names(vec!["STATUS".into()]);

    ruleset
        .add_value_group(ValueGroup::new("CMEGroup", vec!["CME".into(), "CBOT".into()]))
        .unwrap();

    let plain = ruleset
        .build_rule(
            Uuid::new_v4(),
            &["VOICE", "VG:CMEGroup", "ED", "*", "RATE"],
            HashMap::from([("Rate".into(), "1.4".into())]),
        )
        .unwrap();
    let dated = ruleset
        .build_rule(
            Uuid::new_v4(),
            &["*", "RE:L.*", "IR:|100", "UK", "DR:2013-01-01T00:00:00Z|2013-12-31T00:00:00Z"],
            HashMap::from([("Rate".into(), "2.0".into()), ("Venue".into(), "LDN".into())]),
        )
        .unwrap()
        .with_code(Uuid::new_v4())
        .with_validity(
            instant("2013-01-01T00:00:00Z"),
            instant("2013-12-31T00:00:00Z"),
        )
        .with_evaluations(ruleset.build_drivers(&["SETTLED"]).unwrap());
    ruleset.add_rule(plain).unwrap();
    ruleset.add_rule(dated).unwrap();
    ruleset
}

#[test]
fn test_round_trip_equivalence() {
    let original = rich_ruleset();
    let json = to_json(&original).unwrap();
    let parsed = from_json(&json).unwrap();
    assert!(rulesets_equivalent(&original, &parsed));
}

#[test]
fn test_double_round_trip_is_stable() {
    let original = rich_ruleset();
    let once = to_json(&original).unwrap();
    let twice = to_json(&from_json(&once).unwrap()).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_parsed_copy_evaluates_identically() {
    let original = rich_ruleset();
    let parsed = from_json(&to_json(&original).unwrap()).unwrap();

    let original_engine = DecisionEngine::new(original, TreeKind::Single);
    let parsed_engine = DecisionEngine::new(parsed, TreeKind::Single);

    let queries: &[&[&str]] = &[
        &["VOICE", "CBOT", "ED", "US", "RATE"],
        &["DMA", "LSE", "42", "UK", "2013-06-01T00:00:00Z"],
        &["DMA", "TSE", "NK", "JP", "INDEX"],
    ];
    for query in queries {
        let values: Vec<String> = query.iter().map(ToString::to_string).collect();
        let eval_map = HashMap::from([("STATUS".to_string(), "SETTLED".to_string())]);
        let a = original_engine
            .create_input_at(values.clone(), None, &eval_map)
            .unwrap();
        let b = parsed_engine
            .create_input_at(values, None, &eval_map)
            .unwrap();
        assert_eq!(
            original_engine.single_evaluation(&a).map(|o| o.outputs),
            parsed_engine.single_evaluation(&b).map(|o| o.outputs),
            "query {query:?}"
        );
    }
}

#[test]
fn test_validity_bounds_round_trip_as_epoch_millis() {
    let original = rich_ruleset();
    let parsed = from_json(&to_json(&original).unwrap()).unwrap();
    let dated = original
        .rules()
        .values()
        .find(|r| r.start() != ruletree::driver::epoch())
        .unwrap();
    let copy = parsed.rule(dated.id()).unwrap();
    assert_eq!(copy.start(), dated.start());
    assert_eq!(copy.end(), dated.end());
    assert_eq!(copy.code(), dated.code());
}

#[test]
fn test_group_membership_survives_round_trip() {
    let original = rich_ruleset();
    let parsed = from_json(&to_json(&original).unwrap()).unwrap();
    let handle = parsed
        .driver_cache()
        .get("CMEGroup", ruletree::DriverKind::ValueGroup)
        .unwrap();
    assert!(handle.matches("CME"));
    assert!(handle.matches("CBOT"));
    assert!(!handle.matches("LSE"));
    assert_eq!(
        parsed.value_group("CMEGroup").map(|g| g.id),
        original.value_group("CMEGroup").map(|g| g.id)
    );
}

#[test]
fn test_evaluation_drivers_round_trip() {
    let original = rich_ruleset();
    let parsed = from_json(&to_json(&original).unwrap()).unwrap();
    let with_evals = parsed
        .rules()
        .values()
        .find(|r| r.evaluations().is_some())
        .unwrap();
    assert_eq!(with_evals.evaluations().unwrap()[0].value(), "SETTLED");
    assert_eq!(parsed.evaluation_names(), ["STATUS"]);
}
