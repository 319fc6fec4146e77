use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use image::DynamicImage;
use tracing::{error, info, warn};

use crate::db::{query, writer};
use crate::error::PipelineError;
use crate::pipeline::extractor::{DetectedFace, ExtractError, FaceBbox};
use crate::AppState;

#[derive(Debug, Default, Clone, Copy)]
pub struct DrainSummary {
    pub completed: u64,
    pub failed: u64,
}

fn join_err(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Store(anyhow!("worker task failed: {e}"))
}

/// Re-enqueue every failed photo, report how many photos are now pending,
/// and kick a background drain if one is not already running. This is the
/// "process now" trigger behind POST /process/start.
pub async fn start_processing(state: Arc<AppState>) -> Result<i64, PipelineError> {
    let pool = state.pool.clone();
    let pending = tokio::task::spawn_blocking(move || -> anyhow::Result<i64> {
        let conn = pool.get()?;
        let requeued = writer::enqueue_eligible(&conn)?;
        if requeued > 0 {
            info!(requeued, "re-enqueued failed photos");
        }
        query::count_pending(&conn)
    })
    .await
    .map_err(join_err)??;

    if pending > 0 && !state.drain_running.load(Ordering::SeqCst) {
        let st = state.clone();
        tokio::spawn(async move {
            let workers = st.cfg.workers;
            match drain(st.clone(), workers).await {
                Ok(summary) => {
                    st.stats.set_drain_error(None);
                    info!(completed = summary.completed, failed = summary.failed, "drain finished");
                }
                Err(e) => {
                    error!(error = %e, "drain aborted");
                    st.stats.set_drain_error(Some(e.to_string()));
                }
            }
        });
    }

    Ok(pending)
}

/// Drain all pending photos with a bounded worker pool. Per-photo failures
/// are recorded and isolated; store failures abort the drain and propagate,
/// leaving claimed photos for startup reconciliation.
pub async fn drain(state: Arc<AppState>, concurrency: usize) -> Result<DrainSummary, PipelineError> {
    if state.drain_running.swap(true, Ordering::SeqCst) {
        // Claims are atomic, so an overlapping drain would be harmless;
        // refusing it just avoids doubling the worker pool.
        return Ok(DrainSummary::default());
    }
    state.stop_flag.store(false, Ordering::SeqCst);

    let mut handles = Vec::with_capacity(concurrency.max(1));
    for _ in 0..concurrency.max(1) {
        handles.push(tokio::spawn(worker_loop(state.clone())));
    }

    let mut summary = DrainSummary::default();
    let mut first_err: Option<PipelineError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(s)) => {
                summary.completed += s.completed;
                summary.failed += s.failed;
            }
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(join_err(e));
                }
            }
        }
    }

    state.drain_running.store(false, Ordering::SeqCst);
    match first_err {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

/// Request a cooperative stop: workers finish the photo they own and exit
/// before the next claim. Nothing is left dangling in `processing`.
pub fn request_stop(state: &AppState) {
    state.stop_flag.store(true, Ordering::SeqCst);
}

async fn worker_loop(state: Arc<AppState>) -> Result<DrainSummary, PipelineError> {
    let mut summary = DrainSummary::default();
    loop {
        if state.stop_flag.load(Ordering::SeqCst) {
            break;
        }
        let pool = state.pool.clone();
        let claimed = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<writer::ClaimedPhoto>> {
            let conn = pool.get()?;
            writer::claim_next_pending(&conn)
        })
        .await
        .map_err(join_err)??;

        let Some(photo) = claimed else { break };
        if process_photo(&state, &photo).await? {
            summary.completed += 1;
            state.stats.inc_completed(1);
        } else {
            summary.failed += 1;
            state.stats.inc_failed(1);
        }
    }
    Ok(summary)
}

/// Record a per-photo failure without disturbing the rest of the drain.
async fn fail_photo(state: &Arc<AppState>, photo_id: i64, message: &str) -> Result<bool, PipelineError> {
    warn!(photo_id, error = %message, "photo processing failed");
    let pool = state.pool.clone();
    let msg = message.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let conn = pool.get()?;
        writer::mark_failed(&conn, photo_id, &msg)?;
        Ok(())
    })
    .await
    .map_err(join_err)??;
    Ok(false)
}

/// One photo end to end: load bytes, extract faces under a timeout, match
/// each face, and commit faces + person updates + completion as a single
/// transaction. Returns true when the photo completed.
async fn process_photo(
    state: &Arc<AppState>,
    photo: &writer::ClaimedPhoto,
) -> Result<bool, PipelineError> {
    let path = state.paths.data.join(&photo.storage_key);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) => {
            return fail_photo(state, photo.id, &format!("cannot read {}: {e}", photo.storage_key)).await;
        }
    };

    let extractor = state.extractor.clone();
    let timeout_secs = state.cfg.extract_timeout_secs;
    let extract_bytes = bytes.clone();
    // The timeout abandons the blocking call rather than cancelling it; the
    // discarded result is safe because the photo is marked failed first.
    let extraction = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        tokio::task::spawn_blocking(move || extractor.extract(&extract_bytes)),
    )
    .await;

    let faces: Vec<DetectedFace> = match extraction {
        Err(_) => {
            return fail_photo(state, photo.id, &ExtractError::Timeout(timeout_secs).to_string()).await;
        }
        Ok(Err(join)) => {
            return fail_photo(state, photo.id, &format!("extraction task failed: {join}")).await;
        }
        Ok(Ok(Err(e))) => return fail_photo(state, photo.id, &e.to_string()).await,
        Ok(Ok(Ok(f))) => f,
    };

    let pool = state.pool.clone();
    let matcher = state.matcher.clone();
    let derived = state.paths.derived.clone();
    let thumb_size = state.cfg.thumb_size;
    let photo_id = photo.id;

    let (face_count, persons_created) =
        tokio::task::spawn_blocking(move || -> anyhow::Result<(u64, u64)> {
            // Thumbnails are best effort; a photo that the extractor handled
            // but `image` cannot decode still completes, without thumbs.
            let decoded = image::load_from_memory(&bytes).ok();

            let mut conn = pool.get()?;
            // The immediate write transaction is the single writer: person
            // centroid updates are serialized across workers here.
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let mut persons_created = 0u64;
            for (idx, face) in faces.iter().enumerate() {
                let thumb_key = decoded
                    .as_ref()
                    .map(|_| format!("persons/{photo_id}_{idx}.jpg"));
                let assigned = matcher.assign(&tx, &face.embedding, thumb_key.as_deref())?;
                if assigned.created {
                    persons_created += 1;
                    if let (Some(img), Some(key)) = (decoded.as_ref(), thumb_key.as_deref()) {
                        if let Err(e) = write_person_thumbnail(img, &face.bbox, thumb_size, &derived.join(key)) {
                            warn!(photo_id, error = %e, "person thumbnail failed");
                        }
                    }
                }
                let bbox_json = serde_json::to_string(&face.bbox)?;
                writer::insert_face(&tx, photo_id, assigned.person_id, &face.embedding, &bbox_json, assigned.distance as f64)?;
            }
            if !writer::mark_completed(&tx, photo_id, faces.len() as i64)? {
                warn!(photo_id, "photo left processing before completion");
            }
            tx.commit()?;
            Ok((faces.len() as u64, persons_created))
        })
        .await
        .map_err(join_err)??;

    state.stats.inc_faces(face_count);
    state.stats.inc_persons(persons_created);
    Ok(true)
}

/// Crop the founding face out of its photo and save a small JPEG next to
/// the other derived artifacts.
fn write_person_thumbnail(
    img: &DynamicImage,
    bbox: &FaceBbox,
    thumb_size: u32,
    dest: &Path,
) -> anyhow::Result<()> {
    let x1 = bbox.x1.max(0.0) as u32;
    let y1 = bbox.y1.max(0.0) as u32;
    let x2 = (bbox.x2.min(img.width() as f32) as u32).max(x1 + 1).min(img.width());
    let y2 = (bbox.y2.min(img.height() as f32) as u32).max(y1 + 1).min(img.height());
    if x2 <= x1 || y2 <= y1 {
        anyhow::bail!("degenerate bounding box");
    }
    let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
    let thumb = crop.thumbnail(thumb_size, thumb_size);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    thumb.to_rgb8().save(dest)?;
    Ok(())
}
