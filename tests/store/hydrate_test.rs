//! Hydration and write-back between a store and a live registry.

use std::sync::Arc;

use serde_json::json;

use blp_monitor::kernel::{
    Dispatcher, Label, Level, Mode, PolicyEngine, PolicySettings, Registry, SubjectRecord,
};
use blp_monitor::store::sqlite::SqliteStore;
use blp_monitor::store::{hydrate, write_back, InMemoryStore, LabelStore};

fn engine(mode: Mode, levels: &[&str]) -> PolicyEngine {
    let scale = blp_monitor::kernel::ClearanceScale::new(
        levels.iter().map(|n| (*n).to_owned()).collect(),
    )
    .expect("scale");
    PolicyEngine::new(
        Arc::new(Registry::new()),
        PolicySettings {
            mode,
            scale,
            ..PolicySettings::default()
        },
    )
}

#[tokio::test]
async fn state_written_back_reloads_into_fresh_engine() {
    let store = InMemoryStore::new();
    let first = Dispatcher::new(engine(Mode::Overridable, &["U", "C", "S", "TS"]));
    for (action, params) in [
        ("add_subject", json!({"id": "alice", "level": 2})),
        ("add_object", json!({"id": "doc", "level": 1})),
        ("override_level", json!({"sid": "alice", "level": 1})),
    ] {
        let command = first.parse(action, &params).expect("parse");
        first.execute(&command).expect("execute");
        let touched = first.touched(&command).expect("mutating");
        write_back(&store, first.engine().registry(), &touched)
            .await
            .expect("write back");
    }

    let second = engine(Mode::Overridable, &["U", "C", "S", "TS"]);
    let stats = hydrate(&second, store.load().await.expect("load"));
    assert_eq!((stats.subjects, stats.objects), (1, 1));
    let alice = second.registry().get_subject("alice").expect("alice");
    assert_eq!(alice.current().level, Level::new(1));
    assert!(second.write("alice", "doc").is_ok());
}

#[tokio::test]
async fn shrunken_scale_skips_high_records() {
    let store = InMemoryStore::new();
    store
        .put_subject("alice", &SubjectRecord::new(Label::new(Level::new(3))))
        .await
        .expect("put");
    store
        .put_subject("bob", &SubjectRecord::new(Label::new(Level::new(1))))
        .await
        .expect("put");

    let e = engine(Mode::Strict, &["Low", "High"]);
    let stats = hydrate(&e, store.load().await.expect("load"));
    assert_eq!(stats.subjects, 1);
    assert_eq!(stats.skipped, 1);
    assert!(e.registry().get_subject("alice").is_err());
}

#[tokio::test]
async fn raised_subject_with_override_reloads_identically() {
    fn categorized() -> PolicyEngine {
        PolicyEngine::new(
            Arc::new(Registry::new()),
            PolicySettings {
                mode: Mode::Overridable,
                categories: true,
                ..PolicySettings::default()
            },
        )
    }
    let memo = Label::with_categories(Level::new(0), ["crypto"]);

    let live = categorized();
    live.add_subject("dana", Label::with_categories(Level::new(2), ["nato"]))
        .expect("dana");
    live.add_object("memo", memo.clone()).expect("memo");
    live.override_level("dana", Level::new(1)).expect("override");
    live.set_subject_label(
        "dana",
        Label::with_categories(Level::new(3), ["nato", "crypto"]),
    )
    .expect("raise");

    let store = SqliteStore::open_in_memory().await.expect("open");
    let saved = live.registry().get_subject("dana").expect("dana");
    store.put_subject("dana", &saved).await.expect("put");

    let reloaded = categorized();
    hydrate(&reloaded, store.load().await.expect("load"));
    reloaded.add_object("memo", memo).expect("memo");

    let after = reloaded.registry().get_subject("dana").expect("dana");
    assert_eq!(after, saved);
    assert_eq!(
        live.read("dana", "memo").is_ok(),
        reloaded.read("dana", "memo").is_ok()
    );
}
