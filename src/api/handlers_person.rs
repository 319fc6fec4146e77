use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::api::handlers::{store_error, with_conn, PageQ};
use crate::db::{query, writer};
use crate::AppState;

pub async fn list_persons(State(state): State<Arc<AppState>>, Query(q): Query<PageQ>) -> impl IntoResponse {
    let (offset, limit) = q.offset_limit();
    match with_conn(&state, move |conn| query::list_persons(conn, offset, limit)).await {
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

pub async fn get_person(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    match with_conn(&state, move |conn| query::get_person(conn, id)).await {
        Ok(Some(person)) => (StatusCode::OK, Json(serde_json::to_value(person).unwrap_or_default())),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("person {id} not found") }))),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub name: String,
}

pub async fn rename_person(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<RenameBody>,
) -> impl IntoResponse {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "name must not be empty" })));
    }
    match with_conn(&state, move |conn| writer::rename_person(conn, id, &name)).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "success": true, "id": id }))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("person {id} not found") }))),
        Err(e) => store_error(e),
    }
}

/// Serve the person's founding-face crop from the derived store.
pub async fn person_thumb(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    let key = match with_conn(&state, move |conn| query::get_person(conn, id)).await {
        Ok(Some(person)) => person.thumbnail_key,
        Ok(None) => return (StatusCode::NOT_FOUND, Json(json!({ "error": format!("person {id} not found") }))).into_response(),
        Err(e) => return store_error(e).into_response(),
    };
    let Some(key) = key else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": format!("person {id} has no thumbnail") }))).into_response();
    };
    match tokio::fs::read(state.paths.derived.join(&key)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(_) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": format!("person {id} has no thumbnail") }))).into_response()
        }
    }
}
