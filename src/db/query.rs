use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::embedding_from_blob;
use crate::models::photo::{FaceRecord, Photo, PhotoState};
use crate::models::person::Person;
use crate::models::{Paged, QueueStatus, Statistics};

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let state: String = row.get("state")?;
    Ok(Photo {
        id: row.get("id")?,
        file_name: row.get("file_name")?,
        storage_key: row.get("storage_key")?,
        size_bytes: row.get("size_bytes")?,
        uploaded_at: row.get("uploaded_at")?,
        state: PhotoState::parse(&state).unwrap_or(PhotoState::Failed),
        face_count: row.get("face_count")?,
        last_error: row.get("last_error")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get("id")?,
        name: row.get("name")?,
        face_count: row.get("face_count")?,
        thumbnail_key: row.get("thumbnail_key")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn count_photos(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |r| r.get(0))?;
    Ok(n)
}

pub fn count_pending(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM photos WHERE state = 'pending'", [], |r| r.get(0))?;
    Ok(n)
}

pub fn count_persons(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM persons", [], |r| r.get(0))?;
    Ok(n)
}

/// Per-state counts from one scan, so every photo is counted exactly once
/// and the per-state sum always equals the total.
pub fn queue_status(conn: &Connection) -> Result<QueueStatus> {
    let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM photos GROUP BY state")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    let mut status = QueueStatus::default();
    for row in rows {
        let (state, n) = row?;
        match state.as_str() {
            "pending" => status.pending = n,
            "processing" => status.processing = n,
            "completed" => status.completed = n,
            "failed" => status.failed = n,
            _ => {}
        }
        status.total += n;
    }
    Ok(status)
}

/// Read-side aggregates, computed on one connection so the numbers come
/// from a single snapshot of the stores.
pub fn statistics(conn: &Connection) -> Result<Statistics> {
    let queue = queue_status(conn)?;
    let total_persons = count_persons(conn)?;
    let total_faces: i64 = conn.query_row("SELECT COUNT(*) FROM faces", [], |r| r.get(0))?;
    Ok(Statistics {
        total_photos: queue.total,
        processed_photos: queue.completed,
        total_persons,
        total_faces,
        queue,
    })
}

pub fn get_photo(conn: &Connection, photo_id: i64) -> Result<Option<Photo>> {
    let photo = conn
        .query_row("SELECT * FROM photos WHERE id = ?1", params![photo_id], row_to_photo)
        .optional()?;
    Ok(photo)
}

pub fn list_photos(conn: &Connection, offset: i64, limit: i64) -> Result<Paged<Photo>> {
    let total = count_photos(conn)?;
    let mut stmt =
        conn.prepare("SELECT * FROM photos ORDER BY uploaded_at DESC, id DESC LIMIT ?1 OFFSET ?2")?;
    let items = stmt
        .query_map(params![limit, offset], row_to_photo)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Paged { total, items })
}

pub fn get_person(conn: &Connection, person_id: i64) -> Result<Option<Person>> {
    let person = conn
        .query_row("SELECT * FROM persons WHERE id = ?1", params![person_id], row_to_person)
        .optional()?;
    Ok(person)
}

pub fn list_persons(conn: &Connection, offset: i64, limit: i64) -> Result<Paged<Person>> {
    let total = count_persons(conn)?;
    let mut stmt =
        conn.prepare("SELECT * FROM persons ORDER BY face_count DESC, id ASC LIMIT ?1 OFFSET ?2")?;
    let items = stmt
        .query_map(params![limit, offset], row_to_person)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Paged { total, items })
}

/// Centroid view of the registry for the matcher, in ascending id order so
/// the lowest id wins exact distance ties.
pub struct PersonCentroid {
    pub id: i64,
    pub centroid: Vec<f32>,
    pub face_count: i64,
}

pub fn load_person_centroids(conn: &Connection) -> Result<Vec<PersonCentroid>> {
    let mut stmt = conn.prepare("SELECT id, centroid_blob, face_count FROM persons ORDER BY id ASC")?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?, r.get::<_, i64>(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, blob, face_count) = row?;
        out.push(PersonCentroid { id, centroid: embedding_from_blob(&blob), face_count });
    }
    Ok(out)
}

pub fn list_faces(conn: &Connection) -> Result<Vec<FaceRecord>> {
    let mut stmt = conn
        .prepare("SELECT id, photo_id, person_id, bbox_json, distance, created_at FROM faces ORDER BY id ASC")?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, Option<i64>>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, f64>(4)?,
            r.get::<_, i64>(5)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, photo_id, person_id, bbox_json, distance, created_at) = row?;
        let bbox = serde_json::from_str(&bbox_json).unwrap_or(serde_json::Value::Null);
        out.push(FaceRecord { id, photo_id, person_id, bbox, distance, created_at });
    }
    Ok(out)
}

pub fn count_faces_for_photo(conn: &Connection, photo_id: i64) -> Result<i64> {
    let n: i64 =
        conn.query_row("SELECT COUNT(*) FROM faces WHERE photo_id = ?1", params![photo_id], |r| r.get(0))?;
    Ok(n)
}
