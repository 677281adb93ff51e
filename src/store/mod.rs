//! Persistence capability for subject and object labels.
//!
//! The kernel never touches storage. The server hydrates the
//! [`Registry`](crate::kernel::Registry) from a [`LabelStore`] at startup and
//! writes changed records back after each successful mutating command.
//! [`InMemoryStore`] and [`sqlite::SqliteStore`] are interchangeable.

pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::kernel::{
    KernelError, Mode, ObjectRecord, PolicyEngine, Registry, SubjectRecord, Touched,
};

/// Storage failures. Kept apart from kernel conditions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database failed.
    #[error("storage backend error: {0}")]
    Database(#[from] sqlx::Error),
    /// The database directory could not be prepared.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored row could not be decoded.
    #[error("corrupt record '{id}': {reason}")]
    Corrupt {
        /// Row id.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Full contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Subject records, override included.
    pub subjects: Vec<(String, SubjectRecord)>,
    /// Object records.
    pub objects: Vec<(String, ObjectRecord)>,
}

/// Keyed get/put over the subject and object tables.
#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Read every stored record.
    async fn load(&self) -> Result<Snapshot, StoreError>;

    /// Fetch one subject.
    async fn get_subject(&self, id: &str) -> Result<Option<SubjectRecord>, StoreError>;

    /// Insert or replace one subject, override included.
    async fn put_subject(&self, id: &str, record: &SubjectRecord) -> Result<(), StoreError>;

    /// Fetch one object.
    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>, StoreError>;

    /// Insert or replace one object.
    async fn put_object(&self, id: &str, record: &ObjectRecord) -> Result<(), StoreError>;
}

/// Process-local store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    subjects: RwLock<HashMap<String, SubjectRecord>>,
    objects: RwLock<HashMap<String, ObjectRecord>>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LabelStore for InMemoryStore {
    async fn load(&self) -> Result<Snapshot, StoreError> {
        let subjects = self.subjects.read().await;
        let objects = self.objects.read().await;
        let mut snapshot = Snapshot {
            subjects: subjects.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            objects: objects.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        snapshot.subjects.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot.objects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(snapshot)
    }

    async fn get_subject(&self, id: &str) -> Result<Option<SubjectRecord>, StoreError> {
        Ok(self.subjects.read().await.get(id).cloned())
    }

    async fn put_subject(&self, id: &str, record: &SubjectRecord) -> Result<(), StoreError> {
        self.subjects
            .write()
            .await
            .insert(id.to_owned(), record.clone());
        Ok(())
    }

    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>, StoreError> {
        Ok(self.objects.read().await.get(id).cloned())
    }

    async fn put_object(&self, id: &str, record: &ObjectRecord) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(id.to_owned(), record.clone());
        Ok(())
    }
}

/// Counts from [`hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateStats {
    /// Subjects loaded.
    pub subjects: usize,
    /// Objects loaded.
    pub objects: usize,
    /// Records skipped because they no longer fit the configuration.
    pub skipped: usize,
    /// Stored overrides discarded.
    pub overrides_dropped: usize,
}

/// Load a snapshot into the engine's registry.
///
/// Records whose labels no longer fit the configured scale or category
/// tracking are skipped. Overrides are kept only in `Overridable` mode and
/// only while strictly below the original level.
pub fn hydrate(engine: &PolicyEngine, snapshot: Snapshot) -> HydrateStats {
    let mut stats = HydrateStats::default();
    let registry: &Registry = engine.registry();

    for (id, mut record) in snapshot.subjects {
        if let Err(e) = engine.admit(&record.original) {
            warn!(subject = %id, error = %e, "skipping stored subject");
            stats.skipped = stats.skipped.saturating_add(1);
            continue;
        }
        if let Some(temporary) = &record.temporary {
            let keep = engine.mode() == Mode::Overridable
                && temporary.level < record.original.level;
            if !keep {
                warn!(subject = %id, mode = %engine.mode(), "discarding stored override");
                record.temporary = None;
                stats.overrides_dropped = stats.overrides_dropped.saturating_add(1);
            }
        }
        registry.put_subject_record(&id, record);
        stats.subjects = stats.subjects.saturating_add(1);
    }

    for (id, record) in snapshot.objects {
        if let Err(e) = engine.admit(&record.label) {
            warn!(object = %id, error = %e, "skipping stored object");
            stats.skipped = stats.skipped.saturating_add(1);
            continue;
        }
        registry.put_object(&id, record.label);
        stats.objects = stats.objects.saturating_add(1);
    }

    info!(
        subjects = stats.subjects,
        objects = stats.objects,
        skipped = stats.skipped,
        "registry hydrated"
    );
    stats
}

/// Copy the current registry state of a touched record into the store.
///
/// # Errors
///
/// Returns the store's error if the write fails.
pub async fn write_back(
    store: &dyn LabelStore,
    registry: &Registry,
    touched: &Touched,
) -> Result<(), StoreError> {
    match touched {
        Touched::Subject(id) => match registry.get_subject(id) {
            Ok(record) => store.put_subject(id, &record).await,
            Err(KernelError::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            }),
        },
        Touched::Object(id) => match registry.get_object(id) {
            Ok(record) => store.put_object(id, &record).await,
            Err(KernelError::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            }),
        },
    }
}
