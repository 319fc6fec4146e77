use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::db::writer;
use crate::error::PipelineError;
use crate::models::photo::{Photo, PhotoState};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UploadFileError {
    pub file: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct UploadOutcome {
    pub uploaded: Vec<Photo>,
    pub errors: Vec<UploadFileError>,
}

/// Accept a batch of uploaded files, write their bytes under the uploads
/// dir and create one pending photo per file. The batch-size cap is checked
/// before any record is created; inside an accepted batch, per-file
/// failures are independent.
pub async fn store_batch(
    state: &Arc<AppState>,
    files: Vec<(String, Vec<u8>)>,
) -> Result<UploadOutcome, PipelineError> {
    let limit = state.cfg.max_upload_batch;
    if files.len() > limit {
        return Err(PipelineError::CapacityExceeded { limit, got: files.len() });
    }

    let mut outcome = UploadOutcome { uploaded: Vec::new(), errors: Vec::new() };
    let uploaded_at = Utc::now().timestamp();

    for (file_name, bytes) in files {
        if file_name.is_empty() {
            continue;
        }
        let seq = state.upload_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(uploaded_at * 1_000_000_000);
        let storage_key = format!("uploads/{:x}_{:04}_{}", nanos, seq, sanitize_file_name(&file_name));

        let path = state.paths.data.join(&storage_key);
        let size_bytes = bytes.len() as i64;
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(file = %file_name, error = %e, "failed to store upload");
            outcome.errors.push(UploadFileError { file: file_name, error: e.to_string() });
            continue;
        }

        let pool = state.pool.clone();
        let key = storage_key.clone();
        let name = file_name.clone();
        let inserted = tokio::task::spawn_blocking(move || -> anyhow::Result<i64> {
            let conn = pool.get()?;
            writer::create_photo(&conn, &name, &key, size_bytes, uploaded_at)
        })
        .await
        .map_err(|e| PipelineError::Store(anyhow::anyhow!("upload task failed: {e}")))?;

        match inserted {
            Ok(id) => {
                state.stats.inc_uploaded(1);
                outcome.uploaded.push(Photo {
                    id,
                    file_name,
                    storage_key,
                    size_bytes,
                    uploaded_at,
                    state: PhotoState::Pending,
                    face_count: None,
                    last_error: None,
                    updated_at: uploaded_at,
                });
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "failed to record upload");
                let _ = tokio::fs::remove_file(&path).await;
                outcome.errors.push(UploadFileError { file: file_name, error: e.to_string() });
            }
        }
    }

    Ok(outcome)
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}
