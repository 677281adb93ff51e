//! End-to-end scenarios through the dispatcher.

use std::sync::Arc;

use serde_json::{json, Value};

use blp_monitor::kernel::{Dispatcher, Mode, PolicyEngine, PolicySettings, Registry, Response};

fn dispatcher(mode: Mode) -> Dispatcher {
    Dispatcher::new(PolicyEngine::new(
        Arc::new(Registry::new()),
        PolicySettings {
            mode,
            ..PolicySettings::default()
        },
    ))
}

fn ok(response: Response) -> Value {
    match response {
        Response::Ok { result } => result,
        Response::Error { error, .. } => panic!("expected success, got error: {error}"),
    }
}

fn error_kind(response: &Response) -> &str {
    match response {
        Response::Error {
            kind: Some(kind), ..
        } => kind,
        other => panic!("expected error with kind, got {other:?}"),
    }
}

#[test]
fn auto_adjust_read_up_raises_bob() {
    let d = dispatcher(Mode::AutoAdjust);
    ok(d.dispatch("add_subject", &json!({"id": "bob", "level": 1})));
    ok(d.dispatch("add_object", &json!({"id": "doc2", "level": 3})));

    let read = ok(d.dispatch("read", &json!({"subj_id": "bob", "obj_id": "doc2"})));
    assert_eq!(read["object"], json!("doc2"));
    assert_eq!(read["label"]["level"], json!(3));
    let notice = read["notice"].as_str().expect("notice");
    assert!(notice.contains("raised"), "{notice}");

    let subjects = ok(d.dispatch("list_subjects", &json!({})));
    assert_eq!(subjects["bob"]["level"], json!("Top Secret"));

    let again = ok(d.dispatch("read", &json!({"subj_id": "bob", "obj_id": "doc2"})));
    assert!(again.get("notice").is_none());
}

#[test]
fn overridable_lower_write_restore() {
    let d = dispatcher(Mode::Overridable);
    ok(d.dispatch("add_subject", &json!({"id": "alice", "level": 2})));
    ok(d.dispatch("add_object", &json!({"id": "doc", "level": 1})));

    let denied = d.dispatch("write", &json!({"subj_id": "alice", "obj_id": "doc"}));
    assert_eq!(error_kind(&denied), "access_denied");

    ok(d.dispatch("override_level", &json!({"sid": "alice", "level": 1})));
    let subjects = ok(d.dispatch("list_subjects", &json!({})));
    assert_eq!(
        subjects["alice"],
        json!({
            "original_level": "Secret",
            "current_level": "Confidential",
            "temporary_level": "Confidential"
        })
    );

    let wrote = ok(d.dispatch("write", &json!({"subj_id": "alice", "obj_id": "doc"})));
    assert_eq!(wrote, json!("alice wrote to doc."));

    ok(d.dispatch("restore_level", &json!({"sid": "alice"})));
    let subjects = ok(d.dispatch("list_subjects", &json!({})));
    assert_eq!(
        subjects["alice"],
        json!({"original_level": "Secret", "current_level": "Secret"})
    );
}

#[test]
fn strict_write_down_denied() {
    let d = dispatcher(Mode::Strict);
    ok(d.dispatch("add_subject", &json!({"id": "charlie", "level": 3})));
    ok(d.dispatch("add_object", &json!({"id": "doc1", "level": 1})));
    let response = d.dispatch("write", &json!({"subj_id": "charlie", "obj_id": "doc1"}));
    assert_eq!(error_kind(&response), "access_denied");
    if let Response::Error { error, .. } = response {
        assert!(error.contains("charlie"));
        assert!(error.contains("doc1"));
    }
}

#[test]
fn unknown_ids_not_found_in_every_mode() {
    for mode in [Mode::Strict, Mode::Overridable, Mode::AutoAdjust] {
        let d = dispatcher(mode);
        ok(d.dispatch("add_object", &json!({"id": "doc", "level": 0})));
        for action in ["read", "write"] {
            let response = d.dispatch(action, &json!({"subj_id": "ghost", "obj_id": "doc"}));
            assert_eq!(error_kind(&response), "not_found", "{mode} {action}");
        }
        let response = d.dispatch("set_label", &json!({"id": "ghost", "level": 1}));
        assert_eq!(error_kind(&response), "not_found", "{mode} set_label");
    }
}

#[test]
fn failed_request_leaves_registry_untouched() {
    let d = dispatcher(Mode::Strict);
    ok(d.dispatch("add_subject", &json!({"id": "alice", "level": 2})));
    let before = ok(d.dispatch("list_subjects", &json!({})));

    for (action, params) in [
        ("set_label", json!({"id": "alice", "level": 0})),
        ("set_label", json!({"id": "alice", "level": 9})),
        ("override_level", json!({"sid": "alice", "level": 1})),
        ("launch", json!({})),
    ] {
        assert!(!d.dispatch(action, &params).is_ok(), "{action}");
    }
    assert_eq!(ok(d.dispatch("list_subjects", &json!({}))), before);
}

#[test]
fn categories_drive_decisions_when_tracked() {
    let d = Dispatcher::new(PolicyEngine::new(
        Arc::new(Registry::new()),
        PolicySettings {
            categories: true,
            ..PolicySettings::default()
        },
    ));
    ok(d.dispatch(
        "add_subject",
        &json!({"id": "eve", "level": 3, "categories": ["crypto"]}),
    ));
    ok(d.dispatch(
        "add_object",
        &json!({"id": "plans", "level": 1, "categories": ["nato"]}),
    ));
    let denied = d.dispatch("read", &json!({"subj_id": "eve", "obj_id": "plans"}));
    assert_eq!(error_kind(&denied), "access_denied");

    let objects = ok(d.dispatch("list_objects", &json!({})));
    assert_eq!(
        objects["plans"],
        json!({"level": "Confidential", "categories": ["nato"]})
    );
}
