use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::embedding_to_blob;

fn now() -> i64 {
    Utc::now().timestamp()
}

/// A photo claimed for processing by exactly one worker.
#[derive(Debug, Clone)]
pub struct ClaimedPhoto {
    pub id: i64,
    pub file_name: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Retried,
    NotFound,
    /// The photo exists but is not in `failed`.
    InvalidState(String),
}

pub fn create_photo(
    conn: &Connection,
    file_name: &str,
    storage_key: &str,
    size_bytes: i64,
    uploaded_at: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO photos (file_name, storage_key, size_bytes, uploaded_at, state, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![file_name, storage_key, size_bytes, uploaded_at, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomically claim the oldest pending photo (FIFO by upload time, ties by
/// id). The single UPDATE is the mutual-exclusion point: two workers can
/// never claim the same photo.
pub fn claim_next_pending(conn: &Connection) -> Result<Option<ClaimedPhoto>> {
    let claimed = conn
        .query_row(
            "UPDATE photos SET state = 'processing', updated_at = ?1
             WHERE id = (
               SELECT id FROM photos WHERE state = 'pending'
               ORDER BY uploaded_at ASC, id ASC LIMIT 1
             ) AND state = 'pending'
             RETURNING id, file_name, storage_key",
            params![now()],
            |r| {
                Ok(ClaimedPhoto {
                    id: r.get(0)?,
                    file_name: r.get(1)?,
                    storage_key: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(claimed)
}

/// `processing -> completed`. Returns false when the photo was not in
/// `processing` (no transition happens in that case).
pub fn mark_completed(conn: &Connection, photo_id: i64, face_count: i64) -> Result<bool> {
    let n = conn.execute(
        "UPDATE photos SET state = 'completed', face_count = ?2, last_error = NULL, updated_at = ?3
         WHERE id = ?1 AND state = 'processing'",
        params![photo_id, face_count, now()],
    )?;
    Ok(n > 0)
}

/// `processing -> failed`, recording the error for diagnostics.
pub fn mark_failed(conn: &Connection, photo_id: i64, error: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE photos SET state = 'failed', face_count = NULL, last_error = ?2, updated_at = ?3
         WHERE id = ?1 AND state = 'processing'",
        params![photo_id, error, now()],
    )?;
    Ok(n > 0)
}

/// Re-trigger of "process now": every failed photo becomes pending again.
/// Pending photos are already eligible, and photos in `processing` or
/// `completed` are never touched. Idempotent; returns rows moved.
pub fn enqueue_eligible(conn: &Connection) -> Result<usize> {
    let n = conn.execute(
        "UPDATE photos SET state = 'pending', last_error = NULL, updated_at = ?1
         WHERE state = 'failed'",
        params![now()],
    )?;
    Ok(n)
}

/// Explicit `failed -> pending` transition for a single photo.
pub fn retry_photo(conn: &Connection, photo_id: i64) -> Result<RetryOutcome> {
    let n = conn.execute(
        "UPDATE photos SET state = 'pending', last_error = NULL, updated_at = ?2
         WHERE id = ?1 AND state = 'failed'",
        params![photo_id, now()],
    )?;
    if n > 0 {
        return Ok(RetryOutcome::Retried);
    }
    let state: Option<String> = conn
        .query_row("SELECT state FROM photos WHERE id = ?1", params![photo_id], |r| r.get(0))
        .optional()?;
    match state {
        Some(s) => Ok(RetryOutcome::InvalidState(s)),
        None => Ok(RetryOutcome::NotFound),
    }
}

/// Startup reconciliation: claims left in `processing` by a drain that never
/// finished (crash, store failure) become pending again.
pub fn reset_stale_processing(conn: &Connection) -> Result<usize> {
    let n = conn.execute(
        "UPDATE photos SET state = 'pending', updated_at = ?1 WHERE state = 'processing'",
        params![now()],
    )?;
    Ok(n)
}

pub fn insert_face(
    conn: &Connection,
    photo_id: i64,
    person_id: i64,
    embedding: &[f32],
    bbox_json: &str,
    distance: f64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO faces (photo_id, person_id, embedding_blob, bbox_json, distance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![photo_id, person_id, embedding_to_blob(embedding), bbox_json, distance, now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_person(
    conn: &Connection,
    name: &str,
    centroid: &[f32],
    thumbnail_key: Option<&str>,
) -> Result<i64> {
    let ts = now();
    conn.execute(
        "INSERT INTO persons (name, centroid_blob, face_count, thumbnail_key, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?4, ?4)",
        params![name, embedding_to_blob(centroid), thumbnail_key, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Centroid and face_count always move together so the centroid reflects
/// all current members.
pub fn update_person_centroid(
    conn: &Connection,
    person_id: i64,
    centroid: &[f32],
    face_count: i64,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE persons SET centroid_blob = ?2, face_count = ?3, updated_at = ?4 WHERE id = ?1",
        params![person_id, embedding_to_blob(centroid), face_count, now()],
    )?;
    Ok(n > 0)
}

pub fn rename_person(conn: &Connection, person_id: i64, name: &str) -> Result<bool> {
    let n = conn.execute(
        "UPDATE persons SET name = ?2, updated_at = ?3 WHERE id = ?1",
        params![person_id, name, now()],
    )?;
    Ok(n > 0)
}
