pub mod schema;
pub mod writer;
pub mod query;

use anyhow::Result;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Connection pool for SQLite in WAL mode. The schema is applied once up
/// front; every pooled connection gets the pragmas on checkout init.
pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<Pool> {
    {
        let conn = Connection::open(db_path.as_ref())?;
        schema::apply_pragmas(&conn)?;
        schema::apply_schema(&conn)?;
    }
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|c| {
        c.pragma_update(None, "journal_mode", "WAL")?;
        c.pragma_update(None, "synchronous", "NORMAL")?;
        c.pragma_update(None, "busy_timeout", 10_000i64)?;
        c.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    });
    let pool = r2d2::Pool::builder().max_size(size).build(manager)?;
    Ok(pool)
}

/// Embeddings are stored as little-endian f32 blobs.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn embedding_from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_round_trip() {
        let e = vec![0.0f32, 1.5, -2.25, f32::MAX];
        assert_eq!(embedding_from_blob(&embedding_to_blob(&e)), e);
    }

    #[test]
    fn embedding_blob_ignores_trailing_bytes() {
        let mut blob = embedding_to_blob(&[1.0f32]);
        blob.push(0xff);
        assert_eq!(embedding_from_blob(&blob), vec![1.0f32]);
    }
}
