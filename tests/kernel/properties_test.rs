//! Exhaustive checks of the decision rules over the default scale.

use std::sync::Arc;

use blp_monitor::kernel::{
    Label, Level, Mode, PolicyEngine, PolicySettings, Registry, WriteRule,
};

const LEVELS: [u8; 4] = [0, 1, 2, 3];
const CATEGORY_SETS: [&[&str]; 4] = [&[], &["nato"], &["crypto"], &["nato", "crypto"]];

fn engine(mode: Mode, write_rule: WriteRule) -> PolicyEngine {
    PolicyEngine::new(
        Arc::new(Registry::new()),
        PolicySettings {
            mode,
            write_rule,
            categories: true,
            ..PolicySettings::default()
        },
    )
}

fn labels() -> Vec<Label> {
    LEVELS
        .iter()
        .flat_map(|rank| {
            CATEGORY_SETS
                .iter()
                .map(move |cats| Label::with_categories(Level::new(*rank), cats.iter().copied()))
        })
        .collect()
}

#[test]
fn dominance_is_reflexive() {
    for label in labels() {
        assert!(label.dominates(&label), "{label:?}");
    }
}

#[test]
fn dominance_follows_level_order_for_equal_categories() {
    for a in LEVELS {
        for b in LEVELS {
            let high = Label::new(Level::new(a));
            let low = Label::new(Level::new(b));
            assert_eq!(high.dominates(&low), a >= b, "{a} vs {b}");
        }
    }
}

#[test]
fn read_granted_iff_subject_dominates_object() {
    let all = labels();
    for subject in &all {
        for object in &all {
            let e = engine(Mode::Strict, WriteRule::LevelOnly);
            e.add_subject("s", subject.clone()).expect("subject");
            e.add_object("o", object.clone()).expect("object");
            let expected = subject.level >= object.level
                && subject.categories.is_superset(&object.categories);
            assert_eq!(e.read("s", "o").is_ok(), expected, "{subject:?} -> {object:?}");
        }
    }
}

#[test]
fn write_granted_iff_object_at_or_above_subject() {
    for s in LEVELS {
        for o in LEVELS {
            let e = engine(Mode::Strict, WriteRule::LevelOnly);
            e.add_subject("s", Label::new(Level::new(s))).expect("subject");
            e.add_object("o", Label::new(Level::new(o))).expect("object");
            assert_eq!(e.write("s", "o").is_ok(), o >= s, "{s} -> {o}");
        }
    }
}

#[test]
fn category_exact_write_requires_equal_sets() {
    let all = labels();
    for subject in &all {
        for object in &all {
            let e = engine(Mode::Strict, WriteRule::CategoryExact);
            e.add_subject("s", subject.clone()).expect("subject");
            e.add_object("o", object.clone()).expect("object");
            let expected =
                object.level >= subject.level && object.categories == subject.categories;
            assert_eq!(e.write("s", "o").is_ok(), expected, "{subject:?} -> {object:?}");
        }
    }
}

#[test]
fn override_succeeds_only_strictly_below_original() {
    for original in LEVELS {
        for temporary in LEVELS {
            let e = engine(Mode::Overridable, WriteRule::LevelOnly);
            e.add_subject("s", Label::new(Level::new(original)))
                .expect("subject");
            let result = e.override_level("s", Level::new(temporary));
            assert_eq!(result.is_ok(), temporary < original, "{original} -> {temporary}");
        }
    }
}

#[test]
fn strict_set_label_succeeds_iff_new_dominates_old() {
    for old in LEVELS {
        for new in LEVELS {
            let e = engine(Mode::Strict, WriteRule::LevelOnly);
            e.add_subject("s", Label::new(Level::new(old))).expect("subject");
            let result = e.set_subject_label("s", Label::new(Level::new(new)));
            assert_eq!(result.is_ok(), new >= old, "{old} -> {new}");
        }
    }
}
