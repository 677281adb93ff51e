//! Subject and object registry.
//!
//! The registry is the only owner of subject/object records. Callers get
//! cloned snapshots from accessors and change state only through the
//! explicit setters here. One process-wide `RwLock` covers both tables,
//! so a read-modify-write done inside [`Registry::transact`] is never
//! observed half-applied.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::KernelError;
use super::label::Label;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Stored state of a subject.
///
/// `original` is the label set at creation or at the last permanent
/// change. When `temporary` is present it *is* the current label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    /// Permanent label, restored after an override.
    pub original: Label,
    /// Active override installed by an explicit temporary downgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<Label>,
}

impl SubjectRecord {
    /// Record with no override.
    pub fn new(label: Label) -> Self {
        Self {
            original: label,
            temporary: None,
        }
    }

    /// Label in effect for decisions right now.
    pub fn current(&self) -> &Label {
        self.temporary.as_ref().unwrap_or(&self.original)
    }

    /// Whether an override is active.
    pub fn has_override(&self) -> bool {
        self.temporary.is_some()
    }
}

/// Stored state of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object label, fixed until the object is re-added.
    pub label: Label,
}

/// Point-in-time copy of one registry table, sorted by id.
///
/// Iterating does not touch the registry, so a listing can be walked any
/// number of times and never sees a half-written record.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    entries: Vec<(String, T)>,
}

impl<T> Listing<T> {
    fn from_map(map: &HashMap<String, T>) -> Self
    where
        T: Clone,
    {
        let mut entries: Vec<(String, T)> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// Borrowing iterator over `(id, record)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Record for `id`, if it was present when the listing was taken.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(id))
            .ok()
            .and_then(|i| self.entries.get(i))
            .map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table was empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> IntoIterator for Listing<T> {
    type Item = (String, T);
    type IntoIter = std::vec::IntoIter<(String, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    subjects: HashMap<String, SubjectRecord>,
    objects: HashMap<String, ObjectRecord>,
}

/// Shared subject/object tables.
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a whole-value replacement, so a poisoned lock still
    // guards consistent records.
    fn read_tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| {
            warn!("registry lock poisoned, recovering for read");
            e.into_inner()
        })
    }

    fn write_tables(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| {
            warn!("registry lock poisoned, recovering for write");
            e.into_inner()
        })
    }

    /// Insert or replace a subject with a fresh record (no override).
    pub fn put_subject(&self, id: &str, label: Label) -> SubjectRecord {
        self.put_subject_record(id, SubjectRecord::new(label))
    }

    /// Insert or replace a full subject record, override included.
    pub fn put_subject_record(&self, id: &str, record: SubjectRecord) -> SubjectRecord {
        let mut tables = self.write_tables();
        tables.subjects.insert(id.to_owned(), record.clone());
        debug!(subject = %id, "subject stored");
        record
    }

    /// Insert or replace an object.
    pub fn put_object(&self, id: &str, label: Label) -> ObjectRecord {
        let record = ObjectRecord { label };
        let mut tables = self.write_tables();
        tables.objects.insert(id.to_owned(), record.clone());
        debug!(object = %id, "object stored");
        record
    }

    /// Snapshot of one subject.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn get_subject(&self, id: &str) -> Result<SubjectRecord, KernelError> {
        self.read_tables()
            .subjects
            .get(id)
            .cloned()
            .ok_or_else(|| KernelError::subject_not_found(id))
    }

    /// Snapshot of one object.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn get_object(&self, id: &str) -> Result<ObjectRecord, KernelError> {
        self.read_tables()
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| KernelError::object_not_found(id))
    }

    /// Replace a subject's current label: the override while one is
    /// active, the permanent label otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn update_subject_label(&self, id: &str, label: Label) -> Result<SubjectRecord, KernelError> {
        self.transact(|tx| {
            if tx.subject(id)?.has_override() {
                tx.set_temporary(id, Some(label)).cloned()
            } else {
                tx.set_label(id, label).cloned()
            }
        })
    }

    /// Snapshot of all subjects.
    pub fn list_subjects(&self) -> Listing<SubjectRecord> {
        Listing::from_map(&self.read_tables().subjects)
    }

    /// Snapshot of all objects.
    pub fn list_objects(&self) -> Listing<ObjectRecord> {
        Listing::from_map(&self.read_tables().objects)
    }

    /// Run `f` with exclusive access to both tables.
    ///
    /// The closure must finish its checks before it writes: an error
    /// returned after a setter ran does not roll that setter back.
    ///
    /// # Errors
    ///
    /// Propagates whatever `f` returns.
    pub fn transact<T, F>(&self, f: F) -> Result<T, KernelError>
    where
        F: FnOnce(&mut RegistryTxn<'_>) -> Result<T, KernelError>,
    {
        let mut tables = self.write_tables();
        let mut tx = RegistryTxn {
            tables: &mut *tables,
        };
        f(&mut tx)
    }
}

/// Exclusive view of the registry handed to [`Registry::transact`].
pub struct RegistryTxn<'a> {
    tables: &'a mut Tables,
}

impl RegistryTxn<'_> {
    /// Borrow a subject record.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn subject(&self, id: &str) -> Result<&SubjectRecord, KernelError> {
        self.tables
            .subjects
            .get(id)
            .ok_or_else(|| KernelError::subject_not_found(id))
    }

    /// Borrow an object record.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn object(&self, id: &str) -> Result<&ObjectRecord, KernelError> {
        self.tables
            .objects
            .get(id)
            .ok_or_else(|| KernelError::object_not_found(id))
    }

    /// Replace a subject's permanent label.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn set_label(&mut self, id: &str, label: Label) -> Result<&SubjectRecord, KernelError> {
        let record = self
            .tables
            .subjects
            .get_mut(id)
            .ok_or_else(|| KernelError::subject_not_found(id))?;
        record.original = label;
        Ok(record)
    }

    /// Install, replace, or clear (`None`) a subject's override.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if the id is unknown.
    pub fn set_temporary(
        &mut self,
        id: &str,
        temporary: Option<Label>,
    ) -> Result<&SubjectRecord, KernelError> {
        let record = self
            .tables
            .subjects
            .get_mut(id)
            .ok_or_else(|| KernelError::subject_not_found(id))?;
        record.temporary = temporary;
        Ok(record)
    }
}
