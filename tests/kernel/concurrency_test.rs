//! Concurrent callers against one shared registry.

use std::sync::Arc;
use std::thread;

use serde_json::json;

use blp_monitor::kernel::{
    Dispatcher, Label, Level, Mode, PolicyEngine, PolicySettings, Registry,
};

fn shared(mode: Mode) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(PolicyEngine::new(
        Arc::new(Registry::new()),
        PolicySettings {
            mode,
            ..PolicySettings::default()
        },
    )))
}

#[test]
fn override_and_restore_never_tear() {
    let d = shared(Mode::Overridable);
    assert!(d
        .dispatch("add_subject", &json!({"id": "alice", "level": 3}))
        .is_ok());

    let mut handles = Vec::new();
    for worker in 0..8u8 {
        let d = Arc::clone(&d);
        handles.push(thread::spawn(move || {
            for round in 0..200u32 {
                if round % 2 == 0 {
                    let level = worker % 3;
                    let _ = d.dispatch("override_level", &json!({"sid": "alice", "level": level}));
                } else {
                    let _ = d.dispatch("restore_level", &json!({"sid": "alice"}));
                }
                let record = d
                    .engine()
                    .registry()
                    .get_subject("alice")
                    .expect("alice exists");
                assert_eq!(record.original, Label::new(Level::new(3)));
                if let Some(temporary) = &record.temporary {
                    assert!(temporary.level < record.original.level);
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }
}

#[test]
fn auto_adjust_reads_converge_to_highest_object() {
    let d = shared(Mode::AutoAdjust);
    assert!(d
        .dispatch("add_subject", &json!({"id": "bob", "level": 0}))
        .is_ok());
    for level in 0..4u8 {
        assert!(d
            .dispatch("add_object", &json!({"id": format!("doc{level}"), "level": level}))
            .is_ok());
    }

    let mut handles = Vec::new();
    for worker in 0..4u8 {
        let d = Arc::clone(&d);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let response = d.dispatch(
                    "read",
                    &json!({"subj_id": "bob", "obj_id": format!("doc{worker}")}),
                );
                assert!(response.is_ok());
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let bob = d.engine().registry().get_subject("bob").expect("bob");
    assert_eq!(bob.original.level, Level::new(3));
}

#[test]
fn listings_run_alongside_mutations() {
    let d = shared(Mode::Strict);
    let writer = {
        let d = Arc::clone(&d);
        thread::spawn(move || {
            for i in 0..200u32 {
                let _ = d.dispatch("add_object", &json!({"id": format!("o{i}"), "level": 1}));
            }
        })
    };
    for _ in 0..50 {
        let listing = d.engine().list_objects();
        for (_, record) in listing.iter() {
            assert_eq!(record.label.level, Level::new(1));
        }
    }
    writer.join().expect("writer panicked");
    assert_eq!(d.engine().list_objects().len(), 200);
}
