mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{photo_with_faces, setup_state, setup_state_with_extractor, upload_batch, GatedExtractor};
use omoide_backend::db::{query, writer};
use omoide_backend::models::photo::PhotoState;
use omoide_backend::pipeline::scheduler;

const FACE_A: &[f32] = &[1.0, 0.0, 0.0, 0.0];

#[tokio::test]
async fn drain_completes_every_pending_photo() {
    let (_tmp, state) = setup_state();
    let files = (0..5)
        .map(|i| (format!("p{i}.jpg"), photo_with_faces(&[FACE_A])))
        .collect::<Vec<_>>();
    let files = files.iter().map(|(n, b)| (n.as_str(), b.clone())).collect();
    let outcome = upload_batch(&state, files).await;
    assert_eq!(outcome.uploaded.len(), 5);
    assert!(outcome.errors.is_empty());

    // More workers than photos: claims are exclusive, so every photo is
    // processed exactly once.
    let summary = scheduler::drain(state.clone(), 8).await.unwrap();
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed, 0);

    let c = state.pool.get().unwrap();
    let status = query::queue_status(&c).unwrap();
    assert_eq!(status.completed, 5);
    assert_eq!(status.pending, 0);
    assert_eq!(status.processing, 0);
    assert_eq!(status.total, 5);
    assert_eq!(
        status.pending + status.processing + status.completed + status.failed,
        status.total
    );

    for photo in query::list_photos(&c, 0, 100).unwrap().items {
        assert!(photo.processed());
        assert_eq!(photo.face_count, Some(1));
        assert!(photo.last_error.is_none());
    }
}

#[tokio::test]
async fn one_bad_photo_does_not_fail_the_batch() {
    let (_tmp, state) = setup_state();
    let outcome = upload_batch(
        &state,
        vec![
            ("good1.jpg", photo_with_faces(&[FACE_A])),
            ("bad.jpg", b"CORRUPT bytes".to_vec()),
            ("good2.jpg", photo_with_faces(&[FACE_A])),
        ],
    )
    .await;
    assert_eq!(outcome.uploaded.len(), 3);

    let summary = scheduler::drain(state.clone(), 2).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let c = state.pool.get().unwrap();
    let failed: Vec<_> = query::list_photos(&c, 0, 100)
        .unwrap()
        .items
        .into_iter()
        .filter(|p| p.state == PhotoState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].file_name, "bad.jpg");
    assert!(failed[0].last_error.as_deref().unwrap().contains("not a decodable image"));
    assert_eq!(failed[0].face_count, None);
}

#[tokio::test]
async fn retry_is_only_valid_from_failed() {
    let (_tmp, state) = setup_state();
    let outcome = upload_batch(
        &state,
        vec![
            ("bad.jpg", b"CORRUPT".to_vec()),
            ("good.jpg", photo_with_faces(&[FACE_A])),
        ],
    )
    .await;
    let bad_id = outcome.uploaded[0].id;
    let good_id = outcome.uploaded[1].id;
    scheduler::drain(state.clone(), 1).await.unwrap();

    let c = state.pool.get().unwrap();
    assert_eq!(writer::retry_photo(&c, bad_id).unwrap(), writer::RetryOutcome::Retried);
    assert_eq!(
        query::get_photo(&c, bad_id).unwrap().unwrap().state,
        PhotoState::Pending
    );
    // Retrying clears the recorded error.
    assert!(query::get_photo(&c, bad_id).unwrap().unwrap().last_error.is_none());

    match writer::retry_photo(&c, good_id).unwrap() {
        writer::RetryOutcome::InvalidState(s) => assert_eq!(s, "completed"),
        other => panic!("expected InvalidState, got {other:?}"),
    }
    assert_eq!(writer::retry_photo(&c, 999_999).unwrap(), writer::RetryOutcome::NotFound);
}

#[tokio::test]
async fn start_processing_requeues_failed_photos() {
    let (_tmp, state) = setup_state();
    upload_batch(&state, vec![("bad.jpg", b"CORRUPT".to_vec())]).await;
    scheduler::drain(state.clone(), 1).await.unwrap();

    {
        let c = state.pool.get().unwrap();
        assert_eq!(query::queue_status(&c).unwrap().failed, 1);
    }

    // start_processing moves failed back to pending and reports the count.
    let pending = scheduler::start_processing(state.clone()).await.unwrap();
    assert_eq!(pending, 1);

    common::wait_for(
        || {
            let c = state.pool.get().unwrap();
            let s = query::queue_status(&c).unwrap();
            s.pending == 0 && s.processing == 0
        },
        100,
    )
    .await;
    let c = state.pool.get().unwrap();
    // The extractor still rejects the bytes, so it lands in failed again.
    assert_eq!(query::queue_status(&c).unwrap().failed, 1);
}

#[tokio::test]
async fn mid_drain_status_respects_the_worker_bound() {
    let gate = Arc::new(AtomicBool::new(false));
    let (_tmp, state) =
        setup_state_with_extractor(Arc::new(GatedExtractor { gate: gate.clone() }), |cfg| {
            cfg.workers = 2;
        });
    let files = (0..5)
        .map(|i| (format!("p{i}.jpg"), photo_with_faces(&[FACE_A])))
        .collect::<Vec<_>>();
    upload_batch(&state, files.iter().map(|(n, b)| (n.as_str(), b.clone())).collect()).await;

    let pending = scheduler::start_processing(state.clone()).await.unwrap();
    assert_eq!(pending, 5);

    // Both workers claim a photo and then sit on the gate.
    common::wait_for(
        || {
            let c = state.pool.get().unwrap();
            query::queue_status(&c).unwrap().processing == 2
        },
        100,
    )
    .await;

    let snapshot = {
        let c = state.pool.get().unwrap();
        query::queue_status(&c).unwrap()
    };
    assert!(snapshot.processing <= 2);
    assert!(snapshot.pending >= 3);
    assert_eq!(snapshot.completed, 0);
    assert_eq!(
        snapshot.pending + snapshot.processing + snapshot.completed + snapshot.failed,
        5
    );

    gate.store(true, Ordering::SeqCst);
    common::wait_for(
        || {
            let c = state.pool.get().unwrap();
            query::queue_status(&c).unwrap().completed == 5
        },
        200,
    )
    .await;
}

#[tokio::test]
async fn stale_processing_claims_are_requeued() {
    let (_tmp, state) = setup_state();
    upload_batch(&state, vec![("p.jpg", photo_with_faces(&[FACE_A]))]).await;

    let c = state.pool.get().unwrap();
    let claimed = writer::claim_next_pending(&c).unwrap().unwrap();
    assert!(writer::claim_next_pending(&c).unwrap().is_none());
    assert_eq!(
        query::get_photo(&c, claimed.id).unwrap().unwrap().state,
        PhotoState::Processing
    );

    // Simulates the restart path: an orphaned claim goes back to pending.
    assert_eq!(writer::reset_stale_processing(&c).unwrap(), 1);
    assert_eq!(
        query::get_photo(&c, claimed.id).unwrap().unwrap().state,
        PhotoState::Pending
    );
}

#[tokio::test]
async fn claims_come_out_in_upload_order() {
    let (_tmp, state) = setup_state();
    let c = state.pool.get().unwrap();
    let first = writer::create_photo(&c, "a.jpg", "uploads/a", 1, 100).unwrap();
    let second = writer::create_photo(&c, "b.jpg", "uploads/b", 1, 200).unwrap();
    let third = writer::create_photo(&c, "c.jpg", "uploads/c", 1, 100).unwrap();

    // FIFO by upload time, ties broken by id.
    assert_eq!(writer::claim_next_pending(&c).unwrap().unwrap().id, first);
    assert_eq!(writer::claim_next_pending(&c).unwrap().unwrap().id, third);
    assert_eq!(writer::claim_next_pending(&c).unwrap().unwrap().id, second);
    assert!(writer::claim_next_pending(&c).unwrap().is_none());
}
