//! Walk scenarios against mock collaborators

use super::*;
use crate::convert::MockConverter;
use crate::emit::RecordingSink;
use crate::mapping::{AttributeCatalog, FieldTerminology, MappingRule, ProfileRef, RuleTable};
use crate::nested::MergeError;
use crate::terminology::{coding, MockTerminology};
use crate::tree::{record_from_json, Record, Value};
use serde_json::json;
use std::sync::Arc;

fn record(json: serde_json::Value) -> Record {
    record_from_json(json).unwrap()
}

fn rule(path: &str, target: &str) -> MappingRule {
    MappingRule::new(path).converting(ProfileRef::new("SRC"), ProfileRef::new(target))
}

struct Harness {
    engine: Engine,
    converter: Arc<MockConverter>,
    sink: Arc<RecordingSink>,
}

fn harness(
    rules: Vec<MappingRule>,
    converter: MockConverter,
    terminology: MockTerminology,
    attributes: AttributeCatalog,
    sink: RecordingSink,
    depth_limit: usize,
) -> Harness {
    let converter = Arc::new(converter);
    let sink = Arc::new(sink);
    let engine = Engine::new(
        EngineConfig {
            rules: Arc::new(RuleTable::from_rules(rules)),
            attributes: Arc::new(attributes),
            depth_limit,
        },
        Collaborators {
            converter: converter.clone(),
            terminology: Arc::new(terminology),
            sink: sink.clone(),
        },
    );
    Harness {
        engine,
        converter,
        sink,
    }
}

fn simple(rules: Vec<MappingRule>, converter: MockConverter) -> Harness {
    harness(
        rules,
        converter,
        MockTerminology::new(),
        AttributeCatalog::new(),
        RecordingSink::new(),
        10,
    )
}

#[tokio::test]
async fn nested_rules_accumulate_into_split_record() {
    let h = simple(
        vec![rule("/a", "P1"), rule("/a/b", "P2").with_template("T").split()],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_response("P2", record(json!({"x": "2"}))),
    );
    let doc = record(json!({"a": {"b": {"v": 1}}}));

    let report = h.engine.walk_document(&doc).await;

    assert!(report.is_clean());
    assert_eq!(report.applied, vec!["/a".to_string(), "/a/b".to_string()]);
    assert_eq!(h.sink.records_for("T"), vec![record(json!({"x": ["1", "2"]}))]);
}

#[tokio::test]
async fn conversion_receives_the_matched_subtree() {
    let h = simple(
        vec![rule("/a", "P1")],
        MockConverter::new().with_response("P1", Record::new()),
    );
    let doc = record(json!({"a": {"k": "v", "n": {"m": 2}}}));

    h.engine.walk_document(&doc).await;

    let requests = h.converter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].values, record(json!({"k": "v", "n": {"m": 2}})));
    assert_eq!(requests[0].target_profile_code, "P1");
}

#[tokio::test]
async fn nothing_beyond_the_depth_limit_is_visited() {
    let h = harness(
        vec![rule("/a", "P1"), rule("/a/b", "P2").with_template("T").split()],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_response("P2", record(json!({"x": "2"}))),
        MockTerminology::new(),
        AttributeCatalog::new(),
        RecordingSink::new(),
        2,
    );
    let doc = record(json!({"a": {"b": {"c": {}}}}));

    let report = h.engine.walk_document(&doc).await;

    // root and /a are visited; /a/b lies at depth 3
    assert_eq!(report.visited, 2);
    assert_eq!(report.truncated, 1);
    assert_eq!(report.applied, vec!["/a".to_string()]);
    assert_eq!(h.converter.requests().len(), 1);
    assert!(h.sink.emitted().is_empty());
}

#[tokio::test]
async fn failed_conversion_passes_inherited_context_to_children() {
    let h = simple(
        vec![
            rule("/a", "P1"),
            rule("/a/b", "P2"),
            rule("/a/b/c", "P3").with_template("T").split(),
        ],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_failure("P2", "bad input")
            .with_response("P3", record(json!({"y": "3"}))),
    );
    let doc = record(json!({"a": {"b": {"c": {"v": true}}}}));

    let report = h.engine.walk_document(&doc).await;

    assert_eq!(report.conversion_failures().count(), 1);
    assert_eq!(report.failures[0].path, "/a/b");
    assert_eq!(
        h.sink.records_for("T"),
        vec![record(json!({"x": ["1"], "y": ["3"]}))]
    );
}

#[tokio::test]
async fn failed_conversion_does_not_suppress_a_sibling() {
    let h = simple(
        vec![
            rule("/root/a", "PA").with_template("T").split(),
            rule("/root/b", "PB").with_template("T").split(),
        ],
        MockConverter::new()
            .with_failure("PA", "unconvertible")
            .with_response("PB", record(json!({"x": "b"}))),
    );
    let doc = record(json!({"root": {"a": {"k": 1}, "b": {"k": 2}}}));

    let report = h.engine.walk_document(&doc).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.conversion_failures().next().unwrap().path, "/root/a");
    assert_eq!(
        h.sink.emitted(),
        vec![("T".to_string(), record(json!({"x": ["b"]})))]
    );
}

#[tokio::test]
async fn sibling_subtrees_do_not_share_context() {
    let h = simple(
        vec![
            rule("/left", "PL"),
            rule("/left/leaf", "PX").with_template("T").split(),
            rule("/right/leaf", "PY").with_template("T").split(),
        ],
        MockConverter::new()
            .with_response("PL", record(json!({"side": "left"})))
            .with_response("PX", record(json!({"v": "x"})))
            .with_response("PY", record(json!({"v": "y"}))),
    );
    let doc = record(json!({
        "left": {"leaf": {"n": 1}},
        "right": {"leaf": {"n": 2}},
    }));

    h.engine.walk_document(&doc).await;

    assert_eq!(
        h.sink.records_for("T"),
        vec![
            record(json!({"side": ["left"], "v": ["x"]})),
            record(json!({"v": ["y"]})),
        ]
    );
}

#[tokio::test]
async fn sequence_elements_each_get_a_walk() {
    let h = simple(
        vec![rule("/items", "P").with_template("T").split()],
        MockConverter::new().with_response("P", record(json!({"x": "1"}))),
    );
    let doc = record(json!({"items": [{"n": 1}, "skip", [{"n": 2}], {"n": 3}]}));

    let report = h.engine.walk_document(&doc).await;

    assert_eq!(report.applied.len(), 3);
    assert_eq!(h.sink.records_for("T").len(), 3);
    let values: Vec<_> = h
        .converter
        .requests()
        .into_iter()
        .map(|r| r.values["n"].clone())
        .collect();
    assert_eq!(values, vec![Value::from(json!(1)), json!(2).into(), json!(3).into()]);
}

#[tokio::test]
async fn codes_are_resolved_before_merging() {
    let h = harness(
        vec![rule("/obs", "P").with_template("T").split()],
        MockConverter::new().with_response("P", record(json!({"code": "c1", "note": "free"}))),
        MockTerminology::new().with_lookup("http://loinc.org", "c1", coding("http://loinc.org", "c1", Some("One"))),
        AttributeCatalog::new().with_field("P", "code", FieldTerminology::system("http://loinc.org")),
        RecordingSink::new(),
        10,
    );
    let doc = record(json!({"obs": {"raw": "c1"}}));

    let report = h.engine.walk_document(&doc).await;

    assert!(report.is_clean());
    let emitted = h.sink.records_for("T");
    assert_eq!(emitted.len(), 1);
    assert_eq!(
        emitted[0]["code"],
        Value::Sequence(vec![coding("http://loinc.org", "c1", Some("One"))])
    );
    assert_eq!(emitted[0]["note"], Value::Sequence(vec!["free".into()]));
}

#[tokio::test]
async fn resolution_miss_suppresses_the_rule() {
    let h = harness(
        vec![
            rule("/obs", "P").with_template("T").split(),
            rule("/obs/inner", "Q").with_template("T").split(),
        ],
        MockConverter::new()
            .with_response("P", record(json!({"code": "unknown"})))
            .with_response("Q", record(json!({"z": "1"}))),
        MockTerminology::new(),
        AttributeCatalog::new().with_field("P", "code", FieldTerminology::system("http://loinc.org")),
        RecordingSink::new(),
        10,
    );
    let doc = record(json!({"obs": {"inner": {"k": 1}}}));

    let report = h.engine.walk_document(&doc).await;

    let misses: Vec<_> = report.resolution_misses().collect();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].path, "/obs");
    // the child still applies, on the unchanged (empty) context
    assert_eq!(h.sink.records_for("T"), vec![record(json!({"z": ["1"]}))]);
}

#[tokio::test]
async fn merge_conflict_is_reported_and_isolated() {
    let h = simple(
        vec![
            rule("/a", "P1"),
            rule("/a/b", "P2").with_template("T").split(),
            rule("/a/c", "P3").with_template("T").split(),
        ],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_response("P2", record(json!({"x/y": "2"})))
            .with_response("P3", record(json!({"z": "3"}))),
    );
    let doc = record(json!({"a": {"b": {"k": 1}, "c": {"k": 2}}}));

    let report = h.engine.walk_document(&doc).await;

    let conflicts: Vec<_> = report.merge_conflicts().collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "/a/b");
    assert!(matches!(
        &conflicts[0].kind,
        FailureKind::Merge(MergeError::Conflict { existing: "sequence", .. })
    ));
    assert_eq!(
        h.sink.records_for("T"),
        vec![record(json!({"x": ["1"], "z": ["3"]}))]
    );
}

#[tokio::test]
async fn emission_failure_does_not_stop_the_walk() {
    let h = harness(
        vec![
            rule("/a", "P1").with_template("Bad").split(),
            rule("/a/b", "P2").with_template("Good").split(),
        ],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_response("P2", record(json!({"y": "2"}))),
        MockTerminology::new(),
        AttributeCatalog::new(),
        RecordingSink::new().failing_for("Bad"),
        10,
    );
    let doc = record(json!({"a": {"b": {}}}));

    let report = h.engine.walk_document(&doc).await;

    assert_eq!(report.emission_failures().count(), 1);
    assert_eq!(report.emitted.len(), 1);
    assert_eq!(
        h.sink.records_for("Good"),
        vec![record(json!({"x": ["1"], "y": ["2"]}))]
    );
}

#[tokio::test]
async fn split_emits_but_context_keeps_flowing() {
    let h = simple(
        vec![
            rule("/a", "P1").with_template("Outer").split(),
            rule("/a/b", "P2").with_template("Inner").split(),
        ],
        MockConverter::new()
            .with_response("P1", record(json!({"x": "1"})))
            .with_response("P2", record(json!({"x": "2"}))),
    );
    let doc = record(json!({"a": {"b": {}}}));

    h.engine.walk_document(&doc).await;

    let emitted = h.sink.emitted();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0], ("Outer".to_string(), record(json!({"x": ["1"]}))));
    assert_eq!(emitted[1], ("Inner".to_string(), record(json!({"x": ["1", "2"]}))));
}

#[tokio::test]
async fn unmatched_and_template_only_paths_pass_through() {
    let h = simple(
        vec![
            MappingRule::new("/a").with_template("T"),
            rule("/a/b/c", "P").with_template("T").split(),
        ],
        MockConverter::new().with_response("P", record(json!({"x": "1"}))),
    );
    let doc = record(json!({"a": {"b": {"c": {}}}}));

    let report = h.engine.walk_document(&doc).await;

    assert_eq!(report.applied, vec!["/a/b/c".to_string()]);
    assert_eq!(h.sink.records_for("T"), vec![record(json!({"x": ["1"]}))]);
}

#[tokio::test]
async fn repeated_walks_emit_identical_records() {
    let h = simple(
        vec![rule("/a", "P").with_template("T").split()],
        MockConverter::new().with_response("P", record(json!({"b": "1", "a": "2", "c/d": "3"}))),
    );
    let doc = record(json!({"a": {}}));

    h.engine.walk_document(&doc).await;
    h.engine.walk_document(&doc).await;

    let emitted = h.sink.records_for("T");
    assert_eq!(emitted.len(), 2);
    let keys: Vec<_> = emitted[0].keys().cloned().collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
    assert_eq!(emitted[0], emitted[1]);
}
