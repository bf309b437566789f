//! `RecordStore` trait — the persistence boundary for the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Lifecycle of a processing record.
///
/// Transitions are monotonic: `Pending → Processing → {Succeeded, Skipped,
/// Failed}`. A `Failed` record may re-enter `Processing` while below the
/// retry ceiling, or become `Skipped` at the ceiling. `Succeeded` and
/// `Skipped` are terminal for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Processing,
    Succeeded,
    Skipped,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses never change under pipeline control.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// Audit record for one petition fingerprint.
///
/// Created on first sighting, mutated in place on each attempt, never
/// deleted. At most one record exists per fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Stable dedup key (unique).
    pub fingerprint: String,
    /// Message that first produced this fingerprint (back-reference).
    pub message_id: String,
    /// Subject of that message, for the audit UI.
    pub subject: String,
    /// Canonical action target (URL or `mailto:` address); empty if none.
    pub target: String,
    /// Classifier category string.
    pub category: String,
    pub status: RecordStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-site petition configuration, editable through the web API.
///
/// `field_mapping` maps profile keys (`first_name`, `email`, ...) to the
/// site's form field names; the signer consults it before falling back to
/// generic selectors. `url_pattern` is a substring matched against the
/// action target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub field_mapping: Option<serde_json::Value>,
    pub url_pattern: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or updating a petition type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PetitionTypeInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub field_mapping: Option<serde_json::Value>,
    pub url_pattern: Option<String>,
    pub enabled: Option<bool>,
}

/// Backend-agnostic record store.
///
/// Must provide read-your-writes consistency within one pipeline pass.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Processing records ──────────────────────────────────────────

    /// Look up a record by fingerprint.
    async fn get_record(&self, fingerprint: &str) -> Result<Option<ProcessingRecord>, DatabaseError>;

    /// Insert or replace the record for its fingerprint.
    async fn upsert_record(&self, record: &ProcessingRecord) -> Result<(), DatabaseError>;

    /// Most recently updated records first.
    async fn list_records(&self, limit: usize) -> Result<Vec<ProcessingRecord>, DatabaseError>;

    /// Records eligible for a re-drive: `Pending`, plus `Failed` below the
    /// retry ceiling. Oldest first.
    async fn records_to_retry(
        &self,
        retry_ceiling: u32,
        limit: usize,
    ) -> Result<Vec<ProcessingRecord>, DatabaseError>;

    /// Administrative override: put a `Failed`/`Skipped` record (or one left
    /// `Processing` by a crashed pass) back to `Pending` so the next pass
    /// re-drives it.
    async fn mark_for_retry(&self, fingerprint: &str) -> Result<(), DatabaseError>;

    /// Counts by status, for the status endpoint.
    async fn status_counts(&self) -> Result<Vec<(RecordStatus, u64)>, DatabaseError>;

    // ── Petition types ──────────────────────────────────────────────

    async fn list_petition_types(&self) -> Result<Vec<PetitionType>, DatabaseError>;

    async fn add_petition_type(&self, input: &PetitionTypeInput) -> Result<PetitionType, DatabaseError>;

    async fn update_petition_type(
        &self,
        id: i64,
        input: &PetitionTypeInput,
    ) -> Result<PetitionType, DatabaseError>;

    async fn delete_petition_type(&self, id: i64) -> Result<(), DatabaseError>;
}
