use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::db::{query, writer};
use crate::error::PipelineError;
use crate::pipeline::{ingest, scheduler};
use crate::AppState;

#[derive(Deserialize)]
pub struct PageQ {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageQ {
    pub fn offset_limit(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(100).clamp(1, 1000);
        let page = self.page.unwrap_or(1).max(1);
        ((page - 1) * limit, limit)
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// Run a read/write against a pooled connection on the blocking pool.
pub(crate) async fn with_conn<T, F>(state: &Arc<AppState>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await
    .map_err(|e| anyhow::anyhow!("db task failed: {e}"))?
}

pub(crate) fn store_error(e: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    warn!(error = %e, "store error");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ok": true, "uptime_secs": state.stats.uptime_secs() })))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.stats.metrics_text()
}

pub async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> impl IntoResponse {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("files") {
                    continue;
                }
                let file_name = field.file_name().unwrap_or("").to_string();
                match field.bytes().await {
                    Ok(bytes) => files.push((file_name, bytes.to_vec())),
                    Err(e) => {
                        return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("malformed upload: {e}") })));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("malformed upload: {e}") })));
            }
        }
    }

    match ingest::store_batch(&state, files).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "uploaded": outcome.uploaded.len(),
                "errors": outcome.errors,
                "photos": outcome.uploaded,
            })),
        ),
        Err(e @ PipelineError::CapacityExceeded { .. }) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => store_error(e),
    }
}

pub async fn process_start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match scheduler::start_processing(state.clone()).await {
        Ok(count) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "count": count })),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn process_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    scheduler::request_stop(&state);
    (StatusCode::OK, Json(json!({ "success": true, "message": "stop requested" })))
}

pub async fn retry_photo(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    match with_conn(&state, move |conn| writer::retry_photo(conn, id)).await {
        Ok(writer::RetryOutcome::Retried) => {
            (StatusCode::OK, Json(json!({ "success": true, "id": id })))
        }
        Ok(writer::RetryOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": format!("photo {id} not found") })))
        }
        Ok(writer::RetryOutcome::InvalidState(s)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("photo {id} is {s}; only failed photos can be retried") })),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn list_photos(State(state): State<Arc<AppState>>, Query(q): Query<PageQ>) -> impl IntoResponse {
    let (offset, limit) = q.offset_limit();
    match with_conn(&state, move |conn| query::list_photos(conn, offset, limit)).await {
        Ok(paged) => {
            let pages = (paged.total + limit - 1) / limit;
            (
                StatusCode::OK,
                Json(json!({
                    "data": paged.items,
                    "total": paged.total,
                    "page": q.page(),
                    "pages": pages,
                })),
            )
        }
        Err(e) => store_error(e),
    }
}

pub async fn get_photo(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    match with_conn(&state, move |conn| query::get_photo(conn, id)).await {
        Ok(Some(photo)) => (StatusCode::OK, Json(serde_json::to_value(photo).unwrap_or_default())),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("photo {id} not found") }))),
        Err(e) => store_error(e),
    }
}

pub async fn queue_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match with_conn(&state, query::queue_status).await {
        Ok(status) => {
            let mut body = serde_json::to_value(&status).unwrap_or_default();
            if let Some(err) = state.stats.last_drain_error() {
                body["last_drain_error"] = json!(err);
            }
            (StatusCode::OK, Json(body))
        }
        Err(e) => store_error(e),
    }
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match with_conn(&state, query::statistics).await {
        Ok(stats) => (StatusCode::OK, Json(serde_json::to_value(stats).unwrap_or_default())),
        Err(e) => store_error(e),
    }
}

/// Full JSON dump of photos, persons and face assignments.
pub async fn export(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = with_conn(&state, |conn| {
        let photos = query::list_photos(conn, 0, i64::MAX)?;
        let persons = query::list_persons(conn, 0, i64::MAX)?;
        let faces = query::list_faces(conn)?;
        Ok((photos.items, persons.items, faces))
    })
    .await;
    match result {
        Ok((photos, persons, faces)) => (
            StatusCode::OK,
            Json(json!({
                "photos": photos,
                "persons": persons,
                "faces": faces,
                "export_date": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => store_error(e),
    }
}
