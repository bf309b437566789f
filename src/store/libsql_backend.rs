//! libSQL backend — async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. One connection is reused for
//! all operations; `libsql::Connection` is safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    PetitionType, PetitionTypeInput, ProcessingRecord, RecordStatus, RecordStore,
};

/// libSQL record store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self { db: Arc::new(db), conn };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self { db: Arc::new(db), conn };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_petition_type(&self, id: i64) -> Result<Option<PetitionType>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, description, field_mapping, url_pattern, enabled,
                        created_at, updated_at
                 FROM petition_types WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_petition_type: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_petition_type row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_petition_type(&row)?)),
            None => Ok(None),
        }
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

/// Convert `Option<&str>` to a libsql Value (`NULL` when absent).
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Parse an RFC 3339 or SQLite datetime string into `DateTime<Utc>`.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Column order: 0:fingerprint, 1:message_id, 2:subject, 3:target,
/// 4:category, 5:status, 6:attempt_count, 7:last_error, 8:created_at,
/// 9:updated_at.
fn row_to_record(row: &libsql::Row) -> Result<ProcessingRecord, DatabaseError> {
    let get_str = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Serialization(format!("record column {i}: {e}")))
    };

    let status_str = get_str(5)?;
    let status = RecordStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown status '{status_str}'")))?;

    let attempt_count: i64 = row
        .get(6)
        .map_err(|e| DatabaseError::Serialization(format!("attempt_count: {e}")))?;

    let last_error: Option<String> = row.get(7).ok();

    Ok(ProcessingRecord {
        fingerprint: get_str(0)?,
        message_id: get_str(1)?,
        subject: get_str(2)?,
        target: get_str(3)?,
        category: get_str(4)?,
        status,
        attempt_count: attempt_count.max(0) as u32,
        last_error,
        created_at: parse_datetime(&get_str(8)?),
        updated_at: parse_datetime(&get_str(9)?),
    })
}

fn row_to_petition_type(row: &libsql::Row) -> Result<PetitionType, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("petition_type id: {e}")))?;
    let name: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("petition_type name: {e}")))?;
    let description: Option<String> = row.get(2).ok();
    let field_mapping_str: Option<String> = row.get(3).ok();
    let field_mapping = field_mapping_str.and_then(|s| serde_json::from_str(&s).ok());
    let url_pattern: Option<String> = row.get(4).ok();
    let enabled: i64 = row.get(5).unwrap_or(1);
    let created_at: String = row
        .get(6)
        .map_err(|e| DatabaseError::Serialization(format!("petition_type created_at: {e}")))?;
    let updated_at: String = row
        .get(7)
        .map_err(|e| DatabaseError::Serialization(format!("petition_type updated_at: {e}")))?;

    Ok(PetitionType {
        id,
        name,
        description,
        field_mapping,
        url_pattern,
        enabled: enabled != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const RECORD_COLUMNS: &str = "fingerprint, message_id, subject, target, category, status, \
                              attempt_count, last_error, created_at, updated_at";

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Processing records ──────────────────────────────────────────

    async fn get_record(&self, fingerprint: &str) -> Result<Option<ProcessingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM processing_records WHERE fingerprint = ?1"),
                params![fingerprint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_record(&self, record: &ProcessingRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processing_records
                     (fingerprint, message_id, subject, target, category, status,
                      attempt_count, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                     message_id = excluded.message_id,
                     subject = excluded.subject,
                     target = excluded.target,
                     category = excluded.category,
                     status = excluded.status,
                     attempt_count = excluded.attempt_count,
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![
                    record.fingerprint.as_str(),
                    record.message_id.as_str(),
                    record.subject.as_str(),
                    record.target.as_str(),
                    record.category.as_str(),
                    record.status.as_str(),
                    record.attempt_count as i64,
                    opt_text(record.last_error.as_deref()),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_record: {e}")))?;
        Ok(())
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<ProcessingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processing_records
                     ORDER BY updated_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records row: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn records_to_retry(
        &self,
        retry_ceiling: u32,
        limit: usize,
    ) -> Result<Vec<ProcessingRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM processing_records
                     WHERE status = 'pending'
                        OR (status = 'failed' AND attempt_count < ?1)
                     ORDER BY updated_at ASC LIMIT ?2"
                ),
                params![retry_ceiling as i64, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("records_to_retry: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("records_to_retry row: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn mark_for_retry(&self, fingerprint: &str) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE processing_records
                 SET status = 'pending', updated_at = ?1
                 WHERE fingerprint = ?2 AND status IN ('failed', 'skipped', 'processing')",
                params![Utc::now().to_rfc3339(), fingerprint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_for_retry: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "retryable processing_record".into(),
                id: fingerprint.into(),
            });
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(RecordStatus, u64)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM processing_records GROUP BY status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts row: {e}")))?
        {
            let status_str: String = row
                .get(0)
                .map_err(|e| DatabaseError::Serialization(format!("status: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Serialization(format!("count: {e}")))?;
            if let Some(status) = RecordStatus::parse(&status_str) {
                counts.push((status, count.max(0) as u64));
            }
        }
        Ok(counts)
    }

    // ── Petition types ──────────────────────────────────────────────

    async fn list_petition_types(&self) -> Result<Vec<PetitionType>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, description, field_mapping, url_pattern, enabled,
                        created_at, updated_at
                 FROM petition_types ORDER BY name",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_petition_types: {e}")))?;

        let mut types = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_petition_types row: {e}")))?
        {
            types.push(row_to_petition_type(&row)?);
        }
        Ok(types)
    }

    async fn add_petition_type(&self, input: &PetitionTypeInput) -> Result<PetitionType, DatabaseError> {
        let name = input
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| DatabaseError::Query("petition type name is required".into()))?;

        let field_mapping = input
            .field_mapping
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("field_mapping: {e}")))?;

        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO petition_types
                     (name, description, field_mapping, url_pattern, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    name,
                    opt_text(input.description.as_deref()),
                    opt_text(field_mapping.as_deref()),
                    opt_text(input.url_pattern.as_deref()),
                    input.enabled.unwrap_or(true) as i64,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_petition_type: {e}")))?;

        let id = self.conn().last_insert_rowid();
        self.get_petition_type(id).await?.ok_or(DatabaseError::NotFound {
            entity: "petition_type".into(),
            id: id.to_string(),
        })
    }

    async fn update_petition_type(
        &self,
        id: i64,
        input: &PetitionTypeInput,
    ) -> Result<PetitionType, DatabaseError> {
        let existing = self.get_petition_type(id).await?.ok_or(DatabaseError::NotFound {
            entity: "petition_type".into(),
            id: id.to_string(),
        })?;

        let name = input.name.clone().unwrap_or(existing.name);
        let description = input.description.clone().or(existing.description);
        let field_mapping_value = input.field_mapping.clone().or(existing.field_mapping);
        let field_mapping = field_mapping_value
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| DatabaseError::Serialization(format!("field_mapping: {e}")))?;
        let url_pattern = input.url_pattern.clone().or(existing.url_pattern);
        let enabled = input.enabled.unwrap_or(existing.enabled);

        self.conn()
            .execute(
                "UPDATE petition_types
                 SET name = ?1, description = ?2, field_mapping = ?3, url_pattern = ?4,
                     enabled = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    name.as_str(),
                    opt_text(description.as_deref()),
                    opt_text(field_mapping.as_deref()),
                    opt_text(url_pattern.as_deref()),
                    enabled as i64,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_petition_type: {e}")))?;

        self.get_petition_type(id).await?.ok_or(DatabaseError::NotFound {
            entity: "petition_type".into(),
            id: id.to_string(),
        })
    }

    async fn delete_petition_type(&self, id: i64) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute("DELETE FROM petition_types WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_petition_type: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "petition_type".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fingerprint: &str, status: RecordStatus, attempts: u32) -> ProcessingRecord {
        ProcessingRecord {
            fingerprint: fingerprint.into(),
            message_id: "msg-1".into(),
            subject: "Sign now".into(),
            target: "https://p.example/sign".into(),
            category: "simple_signon".into(),
            status,
            attempt_count: attempts,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get_record() {
        let store = LibSqlStore::new_memory().await.unwrap();

        assert!(store.get_record("fp-1").await.unwrap().is_none());

        store.upsert_record(&record("fp-1", RecordStatus::Pending, 0)).await.unwrap();
        let loaded = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
        assert_eq!(loaded.attempt_count, 0);
        assert_eq!(loaded.subject, "Sign now");
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_record(&record("fp-1", RecordStatus::Processing, 1)).await.unwrap();

        let mut updated = record("fp-1", RecordStatus::Failed, 1);
        updated.last_error = Some("timeout".into());
        store.upsert_record(&updated).await.unwrap();

        let loaded = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("timeout"));

        // Still exactly one record for the fingerprint
        assert_eq!(store.list_records(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_to_retry_selects_pending_and_retryable_failed() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_record(&record("fp-pending", RecordStatus::Pending, 0)).await.unwrap();
        store.upsert_record(&record("fp-failed-low", RecordStatus::Failed, 1)).await.unwrap();
        store.upsert_record(&record("fp-failed-max", RecordStatus::Failed, 3)).await.unwrap();
        store.upsert_record(&record("fp-done", RecordStatus::Succeeded, 1)).await.unwrap();
        store.upsert_record(&record("fp-skipped", RecordStatus::Skipped, 0)).await.unwrap();

        let retryable = store.records_to_retry(3, 10).await.unwrap();
        let fps: Vec<&str> = retryable.iter().map(|r| r.fingerprint.as_str()).collect();
        assert!(fps.contains(&"fp-pending"));
        assert!(fps.contains(&"fp-failed-low"));
        assert!(!fps.contains(&"fp-failed-max"));
        assert!(!fps.contains(&"fp-done"));
        assert!(!fps.contains(&"fp-skipped"));
    }

    #[tokio::test]
    async fn mark_for_retry_resets_failed_to_pending() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_record(&record("fp-1", RecordStatus::Failed, 3)).await.unwrap();

        store.mark_for_retry("fp-1").await.unwrap();
        let loaded = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Pending);
        // Attempt count is preserved for the audit trail
        assert_eq!(loaded.attempt_count, 3);
    }

    #[tokio::test]
    async fn mark_for_retry_rejects_succeeded() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_record(&record("fp-1", RecordStatus::Succeeded, 1)).await.unwrap();
        assert!(store.mark_for_retry("fp-1").await.is_err());
    }

    #[tokio::test]
    async fn status_counts_group_by_status() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_record(&record("fp-1", RecordStatus::Succeeded, 1)).await.unwrap();
        store.upsert_record(&record("fp-2", RecordStatus::Succeeded, 1)).await.unwrap();
        store.upsert_record(&record("fp-3", RecordStatus::Skipped, 0)).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        let succeeded = counts.iter().find(|(s, _)| *s == RecordStatus::Succeeded).unwrap().1;
        let skipped = counts.iter().find(|(s, _)| *s == RecordStatus::Skipped).unwrap().1;
        assert_eq!(succeeded, 2);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn petition_type_crud() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let created = store
            .add_petition_type(&PetitionTypeInput {
                name: Some("MoveOn".into()),
                description: Some("MoveOn sign-on pages".into()),
                field_mapping: Some(serde_json::json!({"first_name": "fname"})),
                url_pattern: Some("moveon.org".into()),
                enabled: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(created.name, "MoveOn");
        assert!(created.enabled);

        let updated = store
            .update_petition_type(
                created.id,
                &PetitionTypeInput { enabled: Some(false), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.name, "MoveOn");
        assert_eq!(updated.field_mapping.unwrap()["first_name"], "fname");

        assert_eq!(store.list_petition_types().await.unwrap().len(), 1);

        store.delete_petition_type(created.id).await.unwrap();
        assert!(store.list_petition_types().await.unwrap().is_empty());
        assert!(store.delete_petition_type(created.id).await.is_err());
    }

    #[tokio::test]
    async fn add_petition_type_requires_name() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let result = store.add_petition_type(&PetitionTypeInput::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn local_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("petitioner.db");

        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.upsert_record(&record("fp-1", RecordStatus::Succeeded, 1)).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let loaded = store.get_record("fp-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Succeeded);
    }

    #[test]
    fn datetime_parsing_fallbacks() {
        let rfc = parse_datetime("2026-08-06T10:00:00+00:00");
        assert_eq!(rfc.to_rfc3339(), "2026-08-06T10:00:00+00:00");

        let sqlite = parse_datetime("2026-08-06 10:00:00");
        assert_eq!(sqlite, rfc);
    }
}
