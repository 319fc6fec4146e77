use anyhow::Result;
use rusqlite::Connection;

use crate::db::{query, writer};

/// Result of assigning one face embedding to the person registry.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub person_id: i64,
    /// True when no existing person was within the threshold and a new one
    /// was created.
    pub created: bool,
    /// Cosine distance to the matched centroid; 0.0 for a founding face.
    pub distance: f32,
}

/// Nearest-centroid matcher. One-shot incremental: each face is compared
/// against the registry as it exists at that moment, so processing order
/// affects the final clustering. Callers serialize registry mutation by
/// running assignments inside a single write transaction.
pub struct Matcher {
    threshold: f32,
}

impl Matcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Assign `embedding` to the nearest person centroid below the
    /// threshold, updating that centroid as the running mean of its
    /// members, or create a new person seeded with this embedding.
    /// `thumbnail_key` is only stored when a new person is created.
    pub fn assign(
        &self,
        conn: &Connection,
        embedding: &[f32],
        thumbnail_key: Option<&str>,
    ) -> Result<MatchOutcome> {
        let persons = query::load_person_centroids(conn)?;

        // Scan in ascending id order with a strict '<' so the lowest id
        // wins exact ties.
        let mut best: Option<(&query::PersonCentroid, f32)> = None;
        for p in &persons {
            let d = cosine_distance(embedding, &p.centroid);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((p, d));
            }
        }

        if let Some((p, d)) = best {
            if d < self.threshold {
                let centroid = running_mean(&p.centroid, p.face_count, embedding);
                writer::update_person_centroid(conn, p.id, &centroid, p.face_count + 1)?;
                return Ok(MatchOutcome { person_id: p.id, created: false, distance: d });
            }
        }

        let name = format!("Person {}", query::count_persons(conn)? + 1);
        let person_id = writer::insert_person(conn, &name, embedding, thumbnail_key)?;
        Ok(MatchOutcome { person_id, created: true, distance: 0.0 })
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

/// New centroid after adding one member: `(c * n + e) / (n + 1)`.
fn running_mean(centroid: &[f32], count: i64, embedding: &[f32]) -> Vec<f32> {
    let n = count as f32;
    centroid
        .iter()
        .zip(embedding.iter())
        .map(|(c, e)| (c * n + e) / (n + 1.0))
        .collect()
}
