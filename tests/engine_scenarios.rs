mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use std::sync::atomic::Ordering;

use common::{engine_with, png, setup_test_store, ColorExtractor, QueuedExtractor, SlowExtractor};
use facegate_backend::errors::FaceIdError;
use facegate_backend::models::identity::{UpsertOutcome, ACCESS_DENIED, ACCESS_GRANTED, USER_NOT_FOUND};
use facegate_backend::pipeline::extractor::{decode_image, EmbeddingExtractor};
use facegate_backend::pipeline::similarity::mean_embedding;

fn confidence_value(confidence: &str) -> f64 {
    confidence.trim_end_matches('%').parse().unwrap()
}

#[tokio::test]
async fn register_then_verify_same_person_is_granted() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    let outcome = engine.register("alice", png(200, 40, 40), png(210, 50, 40)).await.unwrap();
    assert_eq!(outcome.message, "alice registered successfully.");
    assert_eq!(outcome.outcome, UpsertOutcome::Created);
    assert_eq!(outcome.dim, 4);

    let verdict = engine.verify("alice", png(205, 45, 40)).await.unwrap();
    assert!(verdict.verified);
    assert_eq!(verdict.message.as_deref(), Some(ACCESS_GRANTED));
    assert!(confidence_value(verdict.confidence.as_deref().unwrap()) >= 60.0);
    assert!(verdict.error.is_none());
}

#[tokio::test]
async fn different_person_is_denied() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);
    engine.register("alice", png(200, 40, 40), png(210, 50, 40)).await.unwrap();

    let verdict = engine.verify("alice", png(20, 40, 220)).await.unwrap();
    assert!(!verdict.verified);
    assert_eq!(verdict.message.as_deref(), Some(ACCESS_DENIED));
    assert!(confidence_value(verdict.confidence.as_deref().unwrap()) < 60.0);
    assert_eq!(engine.stats().snapshot().verifications_denied, 1);
}

#[tokio::test]
async fn registration_without_a_face_stores_nothing() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    let err = engine.register("bob", png(120, 90, 80), png(0, 0, 0)).await.unwrap_err();
    assert!(matches!(err, FaceIdError::NoFaceDetected));
    assert_eq!(err.public_message(), "No face found in the image");
    assert!(engine.store().get("bob").await.unwrap().is_none());

    let snap = engine.stats().snapshot();
    assert_eq!(snap.registration_failures, 1);
    assert_eq!(snap.extraction_failures, 1);
}

#[tokio::test]
async fn undecodable_upload_is_rejected_without_writing() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    let err = engine
        .register("bob", png(120, 90, 80), Bytes::from_static(b"definitely not a png"))
        .await
        .unwrap_err();
    assert!(matches!(err, FaceIdError::ImageDecode(_)));
    assert_eq!(engine.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_verification_leaves_record_untouched() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);
    engine.register("alice", png(200, 40, 40), png(210, 50, 40)).await.unwrap();
    let before = engine.store().get("alice").await.unwrap().unwrap();

    let verdict = engine.verify("alice", png(0, 0, 0)).await.unwrap();
    assert!(!verdict.verified);
    assert_eq!(verdict.error.as_deref(), Some("No face found in the image"));
    assert!(verdict.confidence.is_none());

    let after = engine.store().get("alice").await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn re_registration_replaces_the_reference() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    engine.register("alice", png(200, 40, 40), png(200, 40, 40)).await.unwrap();
    let second = engine.register("alice", png(20, 40, 220), png(20, 40, 220)).await.unwrap();
    assert_eq!(second.outcome, UpsertOutcome::Updated);
    assert_eq!(engine.store().count().await.unwrap(), 1);

    // The old face no longer matches, the new one does.
    assert!(!engine.verify("alice", png(200, 40, 40)).await.unwrap().verified);
    assert!(engine.verify("alice", png(20, 40, 220)).await.unwrap().verified);
}

#[tokio::test]
async fn unknown_user_is_not_found_without_extracting() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    // Garbage image: an unknown user must short-circuit before decoding.
    let verdict = engine.verify("ghost", Bytes::from_static(b"junk")).await.unwrap();
    assert!(!verdict.verified);
    assert_eq!(verdict.message.as_deref(), Some(USER_NOT_FOUND));
    assert!(verdict.confidence.is_none());
    assert_eq!(engine.stats().snapshot().verifications_unknown_user, 1);
    assert_eq!(engine.stats().snapshot().extraction_failures, 0);
}

#[tokio::test]
async fn usernames_are_trimmed_on_both_paths() {
    let (_tmp, store) = setup_test_store();
    let engine = engine_with(ColorExtractor::new(), store);

    engine.register("  carol ", png(90, 150, 60), png(95, 150, 60)).await.unwrap();
    assert!(engine.store().get("carol").await.unwrap().is_some());
    assert!(engine.verify("carol", png(92, 150, 60)).await.unwrap().verified);

    assert!(matches!(
        engine.register("   ", png(1, 2, 3), png(1, 2, 3)).await,
        Err(FaceIdError::InvalidUsername(_))
    ));
}

#[tokio::test]
async fn slow_extraction_fails_closed() {
    let (_tmp, store) = setup_test_store();
    let slow = SlowExtractor {
        inner: ColorExtractor::new(),
        delay: Duration::from_millis(500),
    };
    let engine = engine_with(slow, store.clone()).with_extract_timeout(Duration::from_millis(50));

    let err = engine.register("dave", png(10, 200, 10), png(10, 200, 10)).await.unwrap_err();
    assert!(matches!(err, FaceIdError::ExtractionTimeout { millis: 50 }));
    assert!(store.get("dave").await.unwrap().is_none());

    // Seed a reference through a fast engine, then time out on verify.
    engine_with(ColorExtractor::new(), store.clone())
        .register("dave", png(10, 200, 10), png(10, 200, 10))
        .await
        .unwrap();
    let verdict = engine.verify("dave", png(10, 200, 10)).await.unwrap();
    assert!(!verdict.verified);
    assert!(verdict.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn timed_out_extractions_do_not_keep_running() {
    let (_tmp, store) = setup_test_store();
    let queued = QueuedExtractor::new(Duration::from_millis(300));
    let finished = queued.finished.clone();
    let engine = Arc::new(engine_with(queued, store).with_extract_timeout(Duration::from_millis(100)));

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.register(&format!("user{}", i), png(50 + i, 90, 90), png(50 + i, 90, 90)).await
        }));
    }
    for h in handles {
        assert!(matches!(h.await.unwrap(), Err(FaceIdError::ExtractionTimeout { .. })));
    }

    // Give any abandoned job time to finish if it was going to.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    // Only the call that got the lock before its deadline does real work;
    // queued calls see the expired deadline and stop.
    assert!(finished.load(Ordering::SeqCst) <= 1, "finished={}", finished.load(Ordering::SeqCst));
    assert_eq!(engine.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn dimension_change_is_reported_not_scored() {
    let (_tmp, store) = setup_test_store();
    let old_model = engine_with(ColorExtractor::with_dim(4), store.clone());
    let new_model = engine_with(ColorExtractor::with_dim(6), store);

    old_model.register("erin", png(30, 60, 90), png(30, 60, 90)).await.unwrap();
    let verdict = new_model.verify("erin", png(30, 60, 90)).await.unwrap();
    assert!(!verdict.verified);
    assert!(verdict.confidence.is_none());
    let error = verdict.error.unwrap();
    assert!(error.contains("expected 4"), "{}", error);
    assert!(error.contains("found 6"), "{}", error);

    let snap = new_model.stats().snapshot();
    assert_eq!(snap.scoring_failures, 1);
    assert_eq!(snap.verifications_granted + snap.verifications_denied, 0);
}

#[tokio::test]
async fn threshold_is_configurable() {
    let (_tmp, store) = setup_test_store();
    let lenient = engine_with(ColorExtractor::new(), store.clone());
    let strict = engine_with(ColorExtractor::new(), store).with_threshold(0.999_999);
    lenient.register("frank", png(200, 40, 40), png(210, 50, 40)).await.unwrap();

    // Close but not identical: passes 0.6, fails a near-1 threshold.
    assert!(lenient.verify("frank", png(215, 45, 40)).await.unwrap().verified);
    assert!(!strict.verify("frank", png(215, 45, 40)).await.unwrap().verified);
    assert_eq!(strict.threshold(), 0.999_999);
}

#[tokio::test]
async fn concurrent_registrations_leave_one_complete_encoding() {
    let (_tmp, store) = setup_test_store();
    let engine = Arc::new(engine_with(ColorExtractor::new(), store));
    let colours: Vec<(u8, u8, u8)> = (0..8u8).map(|i| (10 + i * 20, 200 - i * 15, 40 + i * 5)).collect();

    let mut handles = Vec::new();
    for &(r, g, b) in &colours {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.register("gina", png(r, g, b), png(r, g, b)).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let fake = ColorExtractor::new();
    let candidates: Vec<Vec<f32>> = colours
        .iter()
        .map(|&(r, g, b)| {
            let e = fake.extract(&decode_image(&png(r, g, b)).unwrap()).unwrap();
            mean_embedding(&e, &e).unwrap()
        })
        .collect();

    let stored = engine.store().get("gina").await.unwrap().unwrap();
    assert!(candidates.contains(&stored.encoding));
    assert_eq!(engine.store().count().await.unwrap(), 1);

    let snap = engine.stats().snapshot();
    assert_eq!(snap.registrations_created, 1);
    assert_eq!(snap.registrations_updated, 7);
}
