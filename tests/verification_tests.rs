mod common;

use common::Harness;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use roadcall::application::verification::{AttemptPolicy, VerificationService};
use roadcall::domain::request::RequestStatus;
use roadcall::error::{CodeKind, DispatchError};

#[tokio::test]
async fn test_arrival_requires_in_progress() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    h.walk_to(request.id, RequestStatus::InRoute).await;

    // Not yet IN_PROGRESS: even a would-be-correct code is refused on state.
    let err = h
        .verification
        .validate_arrival(request.id, "123456")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState(_)));
}

#[tokio::test]
async fn test_wrong_arrival_code_is_rejected() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    let in_progress = h.walk_to(request.id, RequestStatus::InProgress).await;
    let issued = in_progress.arrival_code.unwrap();

    let wrong = if issued == "000000" { "000001" } else { "000000" };
    let err = h
        .verification
        .validate_arrival(request.id, wrong)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidCode(CodeKind::Arrival)));
    assert_eq!("invalid arrival code", err.to_string());

    // A failed attempt does not move the request.
    assert_eq!(
        h.request(request.id).await.status,
        RequestStatus::InProgress
    );
}

#[tokio::test]
async fn test_matching_arrival_code_starts_service() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    let in_progress = h.walk_to(request.id, RequestStatus::InProgress).await;
    assert!(in_progress.start_time.is_none());

    let servicing = h
        .verification
        .validate_arrival(request.id, &in_progress.arrival_code.unwrap())
        .await
        .unwrap();
    assert_eq!(servicing.status, RequestStatus::Servicing);
    assert!(servicing.start_time.is_some());
}

#[tokio::test]
async fn test_completion_code_flow() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    let in_completion = h.walk_to(request.id, RequestStatus::InCompletion).await;
    let code = in_completion.completion_code.unwrap();

    let wrong = if code == "999999" { "999998" } else { "999999" };
    let err = h
        .verification
        .validate_completion(request.id, wrong)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidCode(CodeKind::Completion)
    ));
    assert_eq!("invalid completion code", err.to_string());

    let completed = h
        .verification
        .validate_completion(request.id, &code)
        .await
        .unwrap();
    assert_eq!(completed.status, RequestStatus::Completed);
}

#[tokio::test]
async fn test_arrival_code_does_not_open_completion() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    let in_progress = h.walk_to(request.id, RequestStatus::InProgress).await;
    let arrival = in_progress.arrival_code.unwrap();
    h.verification
        .validate_arrival(request.id, &arrival)
        .await
        .unwrap();
    h.lifecycle
        .transition(request.id, RequestStatus::InCompletion)
        .await
        .unwrap();

    // The two codes are independent secrets; replaying the arrival code at
    // completion must fail (cross-request fraud prevention).
    let err = h
        .verification
        .validate_completion(request.id, &arrival)
        .await
        .unwrap_err();
    match err {
        DispatchError::InvalidCode(CodeKind::Completion) => {}
        // Astronomically unlikely equal codes would make this pass instead.
        other => panic!("expected InvalidCode, got {other}"),
    }
}

#[tokio::test]
async fn test_validation_on_missing_request_not_found() {
    let h = Harness::new();
    let err = h
        .verification
        .validate_arrival(Uuid::new_v4(), "123456")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
}

/// Three attempts per request, then the door closes.
struct ThreeStrikes {
    attempts: AtomicUsize,
}

impl AttemptPolicy for ThreeStrikes {
    fn register_attempt(&self, _request_id: Uuid) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst) < 3
    }
}

#[tokio::test]
async fn test_attempt_policy_slots_in_without_caller_changes() {
    let h = Harness::new();
    let (request, _offer) = h.accepted_request().await;
    let in_progress = h.walk_to(request.id, RequestStatus::InProgress).await;
    let code = in_progress.arrival_code.unwrap();

    let throttled = VerificationService::with_policy(
        h.store.clone(),
        h.lifecycle.clone(),
        Arc::new(ThreeStrikes {
            attempts: AtomicUsize::new(0),
        }),
    );

    let wrong = if code == "000000" { "000001" } else { "000000" };
    for _ in 0..3 {
        let err = throttled
            .validate_arrival(request.id, wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCode(_)));
    }
    // Budget spent: even the right code is refused, with a state error
    // rather than a code error.
    let err = throttled
        .validate_arrival(request.id, &code)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState(_)));
}
