//! Tests for the SQLite label store.

use blp_monitor::kernel::{Label, Level, ObjectRecord, SubjectRecord};
use blp_monitor::store::sqlite::SqliteStore;
use blp_monitor::store::LabelStore;

async fn open_temp_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.db");
    let store = SqliteStore::open(&path).await.expect("open store");
    (store, dir)
}

fn subject(level: u8, temporary: Option<u8>) -> SubjectRecord {
    let original = Label::with_categories(Level::new(level), ["nato"]);
    SubjectRecord {
        temporary: temporary.map(|t| original.at_level(Level::new(t))),
        original,
    }
}

#[tokio::test]
async fn open_creates_empty_tables() {
    let (store, _dir) = open_temp_store().await;
    let snapshot = store.load().await.expect("load");
    assert!(snapshot.subjects.is_empty());
    assert!(snapshot.objects.is_empty());
    assert!(store.get_subject("nobody").await.expect("get").is_none());
}

#[tokio::test]
async fn open_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("deeper").join("state.db");
    let store = SqliteStore::open(&path).await.expect("open store");
    store.close().await;
    assert!(path.exists());
}

#[tokio::test]
async fn subject_with_override_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.db");

    let store = SqliteStore::open(&path).await.expect("open");
    store
        .put_subject("alice", &subject(2, Some(1)))
        .await
        .expect("put");
    store
        .put_object(
            "doc",
            &ObjectRecord {
                label: Label::new(Level::new(1)),
            },
        )
        .await
        .expect("put");
    store.close().await;

    let reopened = SqliteStore::open(&path).await.expect("reopen");
    let snapshot = reopened.load().await.expect("load");
    assert_eq!(snapshot.subjects, vec![("alice".to_owned(), subject(2, Some(1)))]);
    assert_eq!(snapshot.objects.len(), 1);
    assert_eq!(snapshot.objects[0].1.label.level, Level::new(1));
}

#[tokio::test]
async fn clearing_override_deletes_its_row() {
    let (store, _dir) = open_temp_store().await;
    store
        .put_subject("alice", &subject(3, Some(0)))
        .await
        .expect("put");
    store
        .put_subject("alice", &subject(3, None))
        .await
        .expect("put");
    let record = store
        .get_subject("alice")
        .await
        .expect("get")
        .expect("alice");
    assert!(!record.has_override());
}

#[tokio::test]
async fn put_replaces_existing_label() {
    let store = SqliteStore::open_in_memory().await.expect("open");
    store.put_subject("bob", &subject(1, None)).await.expect("put");
    store.put_subject("bob", &subject(3, None)).await.expect("put");
    let snapshot = store.load().await.expect("load");
    assert_eq!(snapshot.subjects.len(), 1);
    assert_eq!(snapshot.subjects[0].1.original.level, Level::new(3));
}

#[tokio::test]
async fn load_orders_by_id() {
    let store = SqliteStore::open_in_memory().await.expect("open");
    for id in ["zoe", "adam", "mia"] {
        store
            .put_object(
                id,
                &ObjectRecord {
                    label: Label::new(Level::new(0)),
                },
            )
            .await
            .expect("put");
    }
    let snapshot = store.load().await.expect("load");
    let ids: Vec<&str> = snapshot.objects.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["adam", "mia", "zoe"]);
}
