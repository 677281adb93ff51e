//! SQLite-backed [`LabelStore`].
//!
//! Three tables: `subjects` and `objects` (id → label) and `overrides`
//! (id → original and temporary level). The schema is applied inline via
//! `include_str!` on open.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{LabelStore, Snapshot, StoreError};
use crate::kernel::{Label, Level, ObjectRecord, SubjectRecord};

const SCHEMA: &str = include_str!("../../migrations/001_blp_schema.sql");

type SubjectRow = (String, i64, String, Option<i64>, Option<i64>);
type ObjectRow = (String, i64, String);

const SELECT_SUBJECTS: &str = "SELECT s.id, s.level, s.categories, o.original_level, o.temp_level
     FROM subjects s LEFT JOIN overrides o ON o.id = s.id";

const SELECT_OBJECTS: &str = "SELECT id, level, categories FROM objects";

/// Label store in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database, gone when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema fails.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // A single pinned connection, since each new one would be a new database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!("label store schema applied");
        Ok(Self { pool })
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ── Row codecs ──

fn decode_level(id: &str, raw: i64) -> Result<Level, StoreError> {
    u8::try_from(raw)
        .map(Level::new)
        .map_err(|_| StoreError::Corrupt {
            id: id.to_owned(),
            reason: format!("level {raw} out of range"),
        })
}

fn decode_label(id: &str, level: i64, categories: &str) -> Result<Label, StoreError> {
    let categories: BTreeSet<String> =
        serde_json::from_str(categories).map_err(|e| StoreError::Corrupt {
            id: id.to_owned(),
            reason: format!("bad categories: {e}"),
        })?;
    Ok(Label {
        level: decode_level(id, level)?,
        categories,
    })
}

fn encode_categories(id: &str, label: &Label) -> Result<String, StoreError> {
    serde_json::to_string(&label.categories).map_err(|e| StoreError::Corrupt {
        id: id.to_owned(),
        reason: format!("cannot encode categories: {e}"),
    })
}

fn decode_subject(row: SubjectRow) -> Result<(String, SubjectRecord), StoreError> {
    let (id, level, categories, original_level, temp_level) = row;
    let original = decode_label(&id, level, &categories)?;
    let temporary = match (original_level, temp_level) {
        (Some(orig), Some(temp)) if orig == level => {
            Some(original.at_level(decode_level(&id, temp)?))
        }
        (Some(_), Some(_)) => {
            warn!(subject = %id, "stored override does not match original level, ignoring");
            None
        }
        _ => None,
    };
    Ok((
        id,
        SubjectRecord {
            original,
            temporary,
        },
    ))
}

fn decode_object(row: ObjectRow) -> Result<(String, ObjectRecord), StoreError> {
    let (id, level, categories) = row;
    let label = decode_label(&id, level, &categories)?;
    Ok((id, ObjectRecord { label }))
}

#[async_trait]
impl LabelStore for SqliteStore {
    async fn load(&self) -> Result<Snapshot, StoreError> {
        let subject_rows: Vec<SubjectRow> =
            sqlx::query_as(&format!("{SELECT_SUBJECTS} ORDER BY s.id"))
                .fetch_all(&self.pool)
                .await?;
        let object_rows: Vec<ObjectRow> = sqlx::query_as(&format!("{SELECT_OBJECTS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        Ok(Snapshot {
            subjects: subject_rows
                .into_iter()
                .map(decode_subject)
                .collect::<Result<_, _>>()?,
            objects: object_rows
                .into_iter()
                .map(decode_object)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn get_subject(&self, id: &str) -> Result<Option<SubjectRecord>, StoreError> {
        let row: Option<SubjectRow> = sqlx::query_as(&format!("{SELECT_SUBJECTS} WHERE s.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_subject)
            .transpose()
            .map(|found| found.map(|(_, record)| record))
    }

    async fn put_subject(&self, id: &str, record: &SubjectRecord) -> Result<(), StoreError> {
        let categories = encode_categories(id, &record.original)?;
        let level = i64::from(record.original.level.rank());
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"INSERT INTO subjects (id, level, categories, updated_at)
              VALUES (?1, ?2, ?3, ?4)
              ON CONFLICT(id) DO UPDATE SET
                level = excluded.level,
                categories = excluded.categories,
                updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(level)
        .bind(categories.as_str())
        .bind(now.as_str())
        .execute(&mut *tx)
        .await?;

        match &record.temporary {
            Some(temporary) => {
                sqlx::query(
                    r"INSERT INTO overrides (id, original_level, temp_level)
                      VALUES (?1, ?2, ?3)
                      ON CONFLICT(id) DO UPDATE SET
                        original_level = excluded.original_level,
                        temp_level = excluded.temp_level",
                )
                .bind(id)
                .bind(level)
                .bind(i64::from(temporary.level.rank()))
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM overrides WHERE id = ?1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>, StoreError> {
        let row: Option<ObjectRow> = sqlx::query_as(&format!("{SELECT_OBJECTS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_object)
            .transpose()
            .map(|found| found.map(|(_, record)| record))
    }

    async fn put_object(&self, id: &str, record: &ObjectRecord) -> Result<(), StoreError> {
        let categories = encode_categories(id, &record.label)?;
        sqlx::query(
            r"INSERT INTO objects (id, level, categories, updated_at)
              VALUES (?1, ?2, ?3, ?4)
              ON CONFLICT(id) DO UPDATE SET
                level = excluded.level,
                categories = excluded.categories,
                updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(i64::from(record.label.level.rank()))
        .bind(categories.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
