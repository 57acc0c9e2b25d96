//! Orchestrator behavior against a scripted backend
//!
//! Run with: cargo test --test orchestrator_test

mod helpers;

use helpers::*;
use serde_json::json;
use std::time::Duration;

use guest_match::models::api::PushEvent;
use guest_match::models::job::{MatchFailure, MatchState};
use guest_match::models::photo::DEFAULT_CONFIDENCE;
use guest_match::services::orchestrator::MatchOrchestrator;

#[tokio::test]
async fn test_inline_result_completes_without_channels() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"matched_photos": ["https://cdn.test/e/1.jpg"]}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), fast_config());

    let state = orchestrator.find_matches(selfie(), event()).await;
    assert_eq!(state, MatchState::Complete);

    let job = orchestrator.job().unwrap();
    assert_eq!(job.matches().len(), 1);
    let photo = &job.matches()[0];
    assert_eq!(photo.photo_id, "match-0");
    assert_eq!(photo.full_url, "https://cdn.test/e/1.jpg");
    assert_eq!(photo.thumbnail_url, photo.full_url);
    assert_eq!(photo.confidence, DEFAULT_CONFIDENCE);
    assert!(!photo.confidence_reported);
    assert_eq!(job.progress_percent(), 100);

    assert_eq!(backend.poll_count(), 0);
    assert_eq!(backend.push_opens(), 0);
}

#[tokio::test]
async fn test_not_found_is_an_empty_result() {
    let backend = ScriptedBackend::new().submit_not_found().build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), fast_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert!(orchestrator.job().unwrap().matches().is_empty());
    assert_eq!(orchestrator.snapshot().headline(), "No Matches Found");
    assert_eq!(backend.poll_count(), 0);
}

#[tokio::test]
async fn test_polling_reaches_result_on_last_attempts() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .poll_pending(20)
        .poll_json(json!({"status": "done", "matches": []}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), poll_only_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert!(orchestrator.job().unwrap().matches().is_empty());
    assert_eq!(backend.poll_count(), 21);
}

#[tokio::test]
async fn test_polling_budget_exhausted_is_timeout() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), poll_only_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Error);
    assert_eq!(
        orchestrator.job().unwrap().failure(),
        Some(&MatchFailure::Timeout { attempts: 22 })
    );
    assert_eq!(backend.poll_count(), 22);
}

#[tokio::test]
async fn test_failed_job_status() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"jobId": "j1"}))
        .poll_pending(2)
        .poll_json(json!({"status": "failed", "error": "no face detected"}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend, poll_only_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Error);
    assert_eq!(
        orchestrator.job().unwrap().failure(),
        Some(&MatchFailure::JobFailed {
            reason: Some("no face detected".to_string())
        })
    );
}

#[tokio::test]
async fn test_poll_transport_error_stops_polling() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .poll_error("connection reset")
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), poll_only_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Error);
    assert!(matches!(
        orchestrator.job().unwrap().failure(),
        Some(MatchFailure::Transport { .. })
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.poll_count(), 1);
}

#[tokio::test]
async fn test_push_result_wins_and_stops_polling() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .push(PushScript::Hold(vec![
            progress("j1", 40.0),
            result("j1", json!([{"id": "p1", "url": "https://cdn.test/p1.jpg", "score": 87}])),
        ]))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), fast_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert!(!orchestrator.is_observing());

    let job = orchestrator.job().unwrap();
    assert_eq!(job.matches().len(), 1);
    assert_eq!(job.matches()[0].photo_id, "p1");
    assert!((job.matches()[0].confidence - 0.87).abs() < 1e-9);
    assert!(job.matches()[0].confidence_reported);

    let polls = backend.poll_count();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.poll_count(), polls);
}

#[tokio::test]
async fn test_push_reconnects_after_dropped_connection() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .push(PushScript::Deliver(vec![progress("j1", 20.0)]))
        .push(PushScript::Refuse)
        .push(PushScript::Hold(vec![result("j1", json!(["https://cdn.test/a.jpg"]))]))
        .build();
    let mut config = fast_config();
    config.poll.interval = Duration::from_secs(3600);
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), config);

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert_eq!(orchestrator.job().unwrap().matches().len(), 1);
    assert_eq!(backend.push_opens(), 3);
    assert_eq!(backend.poll_count(), 0);
}

#[tokio::test]
async fn test_push_exhaustion_falls_back_to_polling() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .poll_pending(3)
        .poll_json(json!({"status": "completed", "photos": ["https://cdn.test/b.jpg"]}))
        .build();
    let mut config = fast_config();
    config.poll.interval = Duration::from_millis(50);
    config.reconnect.max_attempts = 2;
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), config);

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert_eq!(orchestrator.job().unwrap().matches().len(), 1);
    assert_eq!(backend.push_opens(), 3);
    assert_eq!(backend.poll_count(), 4);
}

#[tokio::test]
async fn test_events_for_other_jobs_are_ignored() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .push(PushScript::Hold(vec![
            progress("j-other", 90.0),
            result("j-other", json!(["https://cdn.test/not-mine.jpg"])),
            result("j1", json!([])),
        ]))
        .build();
    let mut config = fast_config();
    config.poll.interval = Duration::from_secs(3600);
    let mut orchestrator = MatchOrchestrator::new(backend, config);

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert!(orchestrator.job().unwrap().matches().is_empty());
}

#[tokio::test]
async fn test_upload_failure_then_retry() {
    let backend = ScriptedBackend::new()
        .submit_error("dns lookup failed")
        .submit_json(json!({"job_id": "j2", "matches": [{"photoId": "x", "imageUrl": "https://cdn.test/x.jpg"}]}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend, fast_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Error);
    let failure = orchestrator.job().unwrap().failure().unwrap().clone();
    assert!(matches!(failure, MatchFailure::Upload { .. }));
    assert_eq!(orchestrator.snapshot().headline(), failure.user_message());

    orchestrator.reset();
    assert_eq!(orchestrator.state(), MatchState::Idle);

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert_eq!(orchestrator.job().unwrap().id().unwrap().as_str(), "j2");
    assert_eq!(orchestrator.job().unwrap().matches()[0].photo_id, "x");
}

#[tokio::test]
async fn test_reset_while_processing_stops_polling() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), poll_only_config());

    assert_eq!(orchestrator.submit(selfie(), event()).await, MatchState::Processing);
    tokio::time::sleep(Duration::from_millis(35)).await;

    orchestrator.reset();
    orchestrator.reset();
    let polls = backend.poll_count();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(backend.poll_count(), polls);
    assert_eq!(orchestrator.state(), MatchState::Idle);
    assert!(orchestrator.job().is_none());
}

#[tokio::test]
async fn test_malformed_poll_result_is_an_error() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .poll_json(json!({"status": "done", "matches": [{"id": "p1"}]}))
        .build();
    let mut orchestrator = MatchOrchestrator::new(backend, poll_only_config());

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Error);
    assert!(matches!(
        orchestrator.job().unwrap().failure(),
        Some(MatchFailure::Malformed { .. })
    ));
}

#[tokio::test]
async fn test_subscribers_see_final_snapshot() {
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": "j1"}))
        .push(PushScript::Hold(vec![
            progress("j1", 35.0),
            result("j1", json!(["https://cdn.test/a.jpg", "https://cdn.test/b.jpg"])),
        ]))
        .build();
    let mut config = fast_config();
    config.poll.interval = Duration::from_secs(3600);
    let mut orchestrator = MatchOrchestrator::new(backend, config);
    let mut updates = orchestrator.subscribe();

    orchestrator.find_matches(selfie(), event()).await;

    assert!(updates.has_changed().unwrap());
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.state, MatchState::Complete);
    assert_eq!(snapshot.progress_percent, 100);
    assert_eq!(snapshot.headline(), "Found 2 Matches!");
}

#[tokio::test]
async fn test_numeric_job_id_matches_push_frames() {
    let frame = PushEvent::from_frame("result", r#"{"job_id":17,"matches":["https://cdn.test/a.jpg"]}"#)
        .unwrap()
        .unwrap();
    let backend = ScriptedBackend::new()
        .submit_json(json!({"job_id": 17}))
        .push(PushScript::Hold(vec![frame]))
        .build();
    let mut config = fast_config();
    config.poll.interval = Duration::from_secs(3600);
    let mut orchestrator = MatchOrchestrator::new(backend.clone(), config);

    assert_eq!(orchestrator.find_matches(selfie(), event()).await, MatchState::Complete);
    assert_eq!(orchestrator.job().unwrap().id().unwrap().as_str(), "17");
    assert_eq!(orchestrator.job().unwrap().matches().len(), 1);
    assert_eq!(backend.poll_count(), 0);
}
