//! Workflow document parsing and task configuration tests.

use std::time::Duration;

use serde_json::json;

use taskplane::workflow::{TaskKind, Workflow};

const YAML_DOC: &str = r#"
name: nightly-check
timeout: 5m
tasks:
  - name: probe-api
    type: http
    config:
      url: https://example.invalid/health
      expected_status: [200, 204]
      timeout: 45s
  - name: restart
    type: command
    config:
      command: systemctl restart app
      shell: true
"#;

/// P8: parse -> serialize -> parse is equivalent.
#[test]
fn parse_round_trip() {
    let workflow = Workflow::parse(YAML_DOC).unwrap();
    assert_eq!(workflow.name, "nightly-check");
    assert_eq!(workflow.timeout, Some(Duration::from_secs(300)));
    assert_eq!(workflow.tasks.len(), 2);
    assert_eq!(workflow.tasks[0].task_type, "http");

    let json = serde_json::to_string(&workflow).unwrap();
    let reparsed = Workflow::parse(&json).unwrap();
    assert_eq!(workflow, reparsed);

    let value = serde_json::to_value(&workflow).unwrap();
    let from_payload = Workflow::from_payload(&value).unwrap();
    assert_eq!(workflow, from_payload);
}

#[test]
fn json_documents_parse_too() {
    let doc = json!({
        "name": "one-shot",
        "tasks": [
            { "name": "noop", "type": "command", "config": { "command": "true" } }
        ]
    });
    let workflow = Workflow::from_payload(&doc).unwrap();
    assert_eq!(workflow.tasks.len(), 1);
    assert_eq!(workflow.timeout, None);
}

#[test]
fn empty_or_nameless_documents_are_rejected() {
    assert!(Workflow::parse("name: x\ntasks: []").is_err());
    assert!(Workflow::parse("tasks:\n  - name: a\n    type: command").is_err());
}

#[test]
fn unknown_task_type_fails_configure() {
    let workflow = Workflow::from_payload(&json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "teleport", "config": {} } ]
    }))
    .unwrap();
    let err = TaskKind::configure(&workflow.tasks[0]).unwrap_err();
    assert!(err.to_string().contains("unknown task type"));
}

#[test]
fn unknown_config_keys_are_ignored() {
    let workflow = Workflow::from_payload(&json!({
        "name": "wf",
        "tasks": [ {
            "name": "x",
            "type": "command",
            "config": { "command": "true", "future_knob": 42 }
        } ]
    }))
    .unwrap();
    let kind = TaskKind::configure(&workflow.tasks[0]).unwrap();
    assert_eq!(kind.type_name(), "command");
}

#[test]
fn missing_required_keys_fail_configure() {
    let cases = [
        json!({ "name": "x", "type": "command", "config": {} }),
        json!({ "name": "x", "type": "http", "config": { "method": "GET" } }),
        json!({ "name": "x", "type": "db", "config": { "driver": "mysql", "dsn": "d" } }),
        json!({ "name": "x", "type": "ssh", "config": { "host": "h", "user": "u" } }),
        json!({ "name": "x", "type": "powershell", "config": {} }),
        json!({ "name": "x", "type": "downloadexec", "config": { "url": "https://e" } }),
    ];
    for doc in cases {
        let workflow = Workflow::from_payload(&json!({ "name": "wf", "tasks": [doc] })).unwrap();
        assert!(
            TaskKind::configure(&workflow.tasks[0]).is_err(),
            "config unexpectedly accepted: {:?}",
            workflow.tasks[0]
        );
    }
}

#[test]
fn task_timeouts_default_and_override() {
    let workflow = Workflow::from_payload(&json!({
        "name": "wf",
        "tasks": [
            { "name": "a", "type": "command", "config": { "command": "true" } },
            { "name": "b", "type": "command", "config": { "command": "true", "timeout": "2s" } },
            { "name": "c", "type": "downloadexec", "config": { "url": "https://e", "sha256": "00" } },
        ]
    }))
    .unwrap();
    assert_eq!(
        TaskKind::configure(&workflow.tasks[0]).unwrap().timeout(),
        Duration::from_secs(30)
    );
    assert_eq!(
        TaskKind::configure(&workflow.tasks[1]).unwrap().timeout(),
        Duration::from_secs(2)
    );
    assert_eq!(
        TaskKind::configure(&workflow.tasks[2]).unwrap().timeout(),
        Duration::from_secs(60)
    );
}

#[test]
fn downloadexec_signature_and_key_are_mutually_required() {
    let with_sig_only = json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "downloadexec", "config": {
            "url": "https://e", "sha256": "00", "signature": "c2ln"
        } } ]
    });
    let workflow = Workflow::from_payload(&with_sig_only).unwrap();
    assert!(TaskKind::configure(&workflow.tasks[0]).is_err());

    let with_key_only = json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "downloadexec", "config": {
            "url": "https://e", "sha256": "00", "public_key": "a2V5"
        } } ]
    });
    let workflow = Workflow::from_payload(&with_key_only).unwrap();
    assert!(TaskKind::configure(&workflow.tasks[0]).is_err());

    let with_both = json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "downloadexec", "config": {
            "url": "https://e", "sha256": "00", "signature": "c2ln", "public_key": "a2V5"
        } } ]
    });
    let workflow = Workflow::from_payload(&with_both).unwrap();
    assert!(TaskKind::configure(&workflow.tasks[0]).is_ok());

    let with_key_id_and_key = json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "downloadexec", "config": {
            "url": "https://e", "sha256": "00", "signature": "c2ln",
            "public_key": "a2V5", "key_id": "release"
        } } ]
    });
    let workflow = Workflow::from_payload(&with_key_id_and_key).unwrap();
    assert!(TaskKind::configure(&workflow.tasks[0]).is_err());
}

#[test]
fn db_driver_is_validated() {
    let workflow = Workflow::from_payload(&json!({
        "name": "wf",
        "tasks": [ { "name": "x", "type": "db", "config": {
            "driver": "sqlite", "dsn": "d", "query": "SELECT 1"
        } } ]
    }))
    .unwrap();
    assert!(TaskKind::configure(&workflow.tasks[0]).is_err());
}
