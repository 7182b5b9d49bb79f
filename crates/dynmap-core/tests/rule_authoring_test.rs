//! Integration tests for the rule authoring flow: load a stored rule, capture
//! sample payloads, evaluate expressions against the sample and validate.

use dynmap_core::{
    validate_rule, Direction, ExpressionEvaluator, JsonPathEvaluator, MappingRule, SampleSource,
    SnoopSession, SnoopStatus, ValidationError,
};
use serde_json::{json, Value};

fn stored_rule() -> MappingRule {
    serde_json::from_value(json!({
        "id": "8b2f",
        "name": "Temperature",
        "direction": "INBOUND",
        "targetAPI": "MEASUREMENT",
        "mappingTopic": "device/+/temp",
        "mappingTopicSample": "device/berlin_01/temp",
        "subscriptionTopic": "device/#",
        "targetTemplate": "{\"c8y_TemperatureMeasurement\":{\"T\":{\"value\":0,\"unit\":\"C\"}},\"source\":{\"id\":\"0\"},\"type\":\"c8y_TemperatureMeasurement\"}",
        "substitutions": [
            {
                "pathSource": "_TOPIC_LEVEL_[1]",
                "pathTarget": "source.id",
                "repairStrategy": "DEFAULT",
                "expandArray": false
            },
            {
                "pathSource": "temp",
                "pathTarget": "c8y_TemperatureMeasurement.T.value",
                "repairStrategy": "DEFAULT",
                "expandArray": false
            }
        ],
        "useExternalId": true,
        "externalIdType": "c8y_Serial",
        "snoopStatus": "NONE"
    }))
    .unwrap()
}

#[test]
fn test_stored_rule_is_valid() {
    let rule = stored_rule();
    assert!(validate_rule(&rule, &[rule.clone()]).is_empty());
}

#[test]
fn test_overlapping_rules_are_reported() {
    let rule = stored_rule();
    let mut other = stored_rule();
    other.id = "9c3a".to_string();
    other.mapping_topic = "device/+".to_string();
    other.mapping_topic_sample = "device/berlin_01".to_string();

    let errors = validate_rule(&rule, &[rule.clone(), other]);
    assert_eq!(
        errors.into_iter().collect::<Vec<_>>(),
        vec![ValidationError::MappingTopicMustBeUnique]
    );
}

#[test]
fn test_snooped_sample_feeds_source_template() {
    let mut rule = stored_rule();
    let mut session = SnoopSession::from_rule(&rule, 10);
    assert_eq!(session.status(), SnoopStatus::None);

    session.enable().unwrap();
    session.record(r#"{"temp": 19.0}"#);
    session.record(r#"{"temp": 21.5}"#);
    session.stop().unwrap();
    session.next();
    session.apply_to(&mut rule).unwrap();

    let source: Value = serde_json::from_str(&rule.source_template).unwrap();
    let evaluator = JsonPathEvaluator::new();
    let temp = evaluator.evaluate(&source, &rule.substitutions[1].path_source).unwrap();
    assert_eq!(temp, Some(json!(21.5)));
    assert_eq!(rule.direction, Direction::Inbound);
}

#[test]
fn test_activation_blocked_while_snooping() {
    let mut rule = stored_rule();
    rule.snoop_status = SnoopStatus::Enabled;
    rule.active = true;
    assert!(validate_rule(&rule, &[])
        .contains(&ValidationError::DisableSnoopingBeforeActivating));
}
