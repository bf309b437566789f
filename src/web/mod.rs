//! Admin web surface: health, dashboard, petition-type CRUD, processed
//! records, status.
//!
//! Read/administrative only — never part of the pipeline contract. The one
//! write path (`/api/processed/{fingerprint}/retry`) is the operator
//! override that re-queues a failed or skipped record.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::DatabaseError;
use crate::store::{PetitionTypeInput, RecordStore};

/// Max rows returned by the processed listing.
const LIST_LIMIT_CAP: usize = 500;

/// Static facts shown by `/api/status`.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub email_configured: bool,
    pub profile_configured: bool,
    pub automation_enabled: bool,
    pub retry_ceiling: u32,
    pub check_interval_secs: u64,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub status: StatusInfo,
}

/// Build the Axum router.
pub fn routes(store: Arc<dyn RecordStore>, status: StatusInfo) -> Router {
    let state = AppState { store, status };

    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/petition-types", get(list_petition_types).post(add_petition_type))
        .route(
            "/api/petition-types/{id}",
            put(update_petition_type).delete(delete_petition_type),
        )
        .route("/api/processed", get(list_processed))
        .route("/api/processed/{fingerprint}/retry", post(retry_record))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "persistent-petitioner"
    }))
}

async fn dashboard() -> impl IntoResponse {
    Html(include_str!("../../templates/index.html"))
}

async fn api_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.store.status_counts().await?;
    let counts: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count.into()))
        .collect();

    Ok(Json(serde_json::json!({
        "email_configured": state.status.email_configured,
        "profile_configured": state.status.profile_configured,
        "automation_enabled": state.status.automation_enabled,
        "retry_ceiling": state.status.retry_ceiling,
        "check_interval_secs": state.status.check_interval_secs,
        "record_counts": counts,
    })))
}

async fn list_petition_types(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let types = state.store.list_petition_types().await?;
    Ok(Json(types))
}

async fn add_petition_type(
    State(state): State<AppState>,
    Json(input): Json<PetitionTypeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.store.add_petition_type(&input).await?;
    info!(id = created.id, name = %created.name, "Petition type added");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_petition_type(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<PetitionTypeInput>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.store.update_petition_type(id, &input).await?;
    Ok(Json(updated))
}

async fn delete_petition_type(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_petition_type(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct ProcessedQuery {
    limit: Option<usize>,
}

async fn list_processed(
    State(state): State<AppState>,
    Query(query): Query<ProcessedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(100).min(LIST_LIMIT_CAP);
    let records = state.store.list_records(limit).await?;
    Ok(Json(records))
}

async fn retry_record(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.mark_for_retry(&fingerprint).await?;
    info!(fingerprint = %fingerprint, "Record re-queued for retry");
    Ok(Json(serde_json::json!({ "fingerprint": fingerprint, "requeued": true })))
}

// ── Error mapping ───────────────────────────────────────────────────

/// Wraps store errors into HTTP responses.
struct ApiError(DatabaseError);

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            DatabaseError::NotFound { .. } => StatusCode::NOT_FOUND,
            DatabaseError::Query(msg) if msg.contains("required") => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::store::{LibSqlStore, ProcessingRecord, RecordStatus};

    async fn state() -> AppState {
        let store: Arc<dyn RecordStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        AppState {
            store,
            status: StatusInfo {
                email_configured: true,
                profile_configured: true,
                automation_enabled: false,
                retry_ceiling: 3,
                check_interval_secs: 300,
            },
        }
    }

    fn record(fingerprint: &str, status: RecordStatus) -> ProcessingRecord {
        ProcessingRecord {
            fingerprint: fingerprint.into(),
            message_id: "msg-1".into(),
            subject: "Sign now".into(),
            target: "https://p.example/sign".into(),
            category: "simple_signon".into(),
            status,
            attempt_count: 1,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn petition_type_crud_through_handlers() {
        let state = state().await;

        let input = PetitionTypeInput {
            name: Some("MoveOn".into()),
            url_pattern: Some("moveon.org".into()),
            ..Default::default()
        };
        let response = add_petition_type(State(state.clone()), Json(input)).await;
        assert!(response.is_ok());

        let types = state.store.list_petition_types().await.unwrap();
        assert_eq!(types.len(), 1);
        let id = types[0].id;

        let update = PetitionTypeInput { enabled: Some(false), ..Default::default() };
        update_petition_type(State(state.clone()), Path(id), Json(update))
            .await
            .ok()
            .unwrap();
        assert!(!state.store.list_petition_types().await.unwrap()[0].enabled);

        delete_petition_type(State(state.clone()), Path(id)).await.ok().unwrap();
        assert!(state.store.list_petition_types().await.unwrap().is_empty());

        // Deleting again is a NotFound
        assert!(delete_petition_type(State(state), Path(id)).await.is_err());
    }

    #[tokio::test]
    async fn add_petition_type_without_name_is_rejected() {
        let state = state().await;
        let result = add_petition_type(State(state), Json(PetitionTypeInput::default())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn retry_endpoint_requeues_failed_record() {
        let state = state().await;
        state.store.upsert_record(&record("fp-1", RecordStatus::Failed)).await.unwrap();

        retry_record(State(state.clone()), Path("fp-1".into())).await.ok().unwrap();
        assert_eq!(
            state.store.get_record("fp-1").await.unwrap().unwrap().status,
            RecordStatus::Pending
        );
    }

    #[tokio::test]
    async fn retry_endpoint_rejects_unknown_fingerprint() {
        let state = state().await;
        assert!(retry_record(State(state), Path("fp-ghost".into())).await.is_err());
    }

    #[tokio::test]
    async fn list_processed_respects_limit_cap() {
        let state = state().await;
        for i in 0..5 {
            state
                .store
                .upsert_record(&record(&format!("fp-{i}"), RecordStatus::Succeeded))
                .await
                .unwrap();
        }

        let result = list_processed(
            State(state.clone()),
            Query(ProcessedQuery { limit: Some(2) }),
        )
        .await;
        assert!(result.is_ok());

        // The cap applies even for absurd limits
        let result = list_processed(State(state), Query(ProcessedQuery { limit: Some(10_000) })).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_endpoint_reports_counts() {
        let state = state().await;
        state.store.upsert_record(&record("fp-1", RecordStatus::Succeeded)).await.unwrap();
        let result = api_status(State(state)).await;
        assert!(result.is_ok());
    }
}
