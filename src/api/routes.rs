use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::{handlers, handlers_person};
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(256 * 1024 * 1024)),
        )
        .route("/process/start", post(handlers::process_start))
        .route("/process/stop", post(handlers::process_stop))
        .route("/photos", get(handlers::list_photos))
        .route("/photos/:id", get(handlers::get_photo))
        .route("/photos/:id/retry", post(handlers::retry_photo))
        .route("/queue/status", get(handlers::queue_status))
        .route("/statistics", get(handlers::statistics))
        .route("/export", get(handlers::export))
        .route("/persons", get(handlers_person::list_persons))
        .route("/persons/:id", get(handlers_person::get_person).post(handlers_person::rename_person))
        .route("/persons/:id/thumb", get(handlers_person::person_thumb))
        .layer(cors)
        .with_state(state)
}
