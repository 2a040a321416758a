//! Conversational session lifecycle and concurrency tests.

mod common;

use common::{unavailable, FakeProvider, TestEnv};
use second_opinion::conversation;
use second_opinion::params::{
    ContinueConversationParams, FinalizeConversationParams, StartConversationParams,
};
use second_opinion::types::{SessionStatus, TurnRole};
use std::sync::Arc;
use std::time::Duration;

fn start_params(env: &TestEnv) -> second_opinion::params::StartConversationRequest {
    let file = env.sample_file();
    let params: StartConversationParams = serde_json::from_value(serde_json::json!({
        "attempted_approaches": ["read the cache module"],
        "partial_findings": [],
        "stuck_description": ["cannot see why entries go stale"],
        "code_scope_files": [file],
        "analysis_type": "hypothesis_test",
        "initial_question": "why do cache entries go stale?",
    }))
    .unwrap();
    params.normalize().unwrap()
}

fn continue_params(session_id: &str, message: &str) -> second_opinion::params::ContinueConversationRequest {
    let params: ContinueConversationParams = serde_json::from_value(serde_json::json!({
        "session_id": session_id,
        "message": message,
    }))
    .unwrap();
    params.normalize().unwrap()
}

fn finalize_params(session_id: &str) -> second_opinion::params::FinalizeConversationRequest {
    let params: FinalizeConversationParams = serde_json::from_value(serde_json::json!({
        "session_id": session_id,
        "summary_format": "concise",
    }))
    .unwrap();
    params.normalize().unwrap()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_session_lifecycle_start_status_continue_finalize() {
    let env = TestEnv::new();

    // Start: two turns (seeded caller turn + priming reply).
    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();
    assert!(!started.reply.is_empty());
    assert_eq!(started.turn_count, 2);

    let view = conversation::conversation_status(&env.services, &started.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(view.turn_count, 2);

    // Continue: four turns.
    let continued = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "what about the cache layer?"),
    )
    .await
    .unwrap();
    assert_eq!(continued.turn_count, 4);

    // Finalize returns a report and destroys the session.
    let finalized = conversation::finalize_conversation(
        &env.services,
        finalize_params(&started.session_id),
    )
    .await
    .unwrap();
    assert!(!finalized.report.findings.is_empty());

    let err = conversation::conversation_status(&env.services, &started.session_id).unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_continue_after_finalize_is_not_found() {
    let env = TestEnv::new();
    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();
    conversation::finalize_conversation(&env.services, finalize_params(&started.session_id))
        .await
        .unwrap();

    let err = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "more"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_session_not_found() {
    let env = TestEnv::new();
    let err = conversation::continue_conversation(
        &env.services,
        continue_params("no-such-session", "hello"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_failed_priming_call_leaves_no_session() {
    let env = TestEnv::with_primary(FakeProvider::new("primary").with_script(vec![
        Err(unavailable()),
        Err(unavailable()),
        Err(unavailable()),
    ]));
    let err = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALL_PROVIDERS_UNAVAILABLE");
    assert_eq!(env.services.store.count(), 0);
}

#[tokio::test]
async fn test_failed_continue_keeps_session_alive() {
    // Priming succeeds, the continue fails, a retry succeeds.
    let env = TestEnv::with_primary(
        FakeProvider::new("primary")
            .with_script(vec![Ok("priming reply".into()), Err(unavailable())]),
    );

    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();

    let err = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "first try"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "ALL_PROVIDERS_UNAVAILABLE");

    // Session survived; status is readable and the session stays resumable.
    let view = conversation::conversation_status(&env.services, &started.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Active);

    // One failure leaves the breaker closed; the retry goes through.
    let continued = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "second try"),
    )
    .await
    .unwrap();
    assert!(!continued.reply.is_empty());
}

// ============================================================================
// Concurrency (FIFO queue policy)
// ============================================================================

#[tokio::test]
async fn test_concurrent_continues_are_fifo_ordered() {
    let env = TestEnv::with_primary(
        FakeProvider::new("primary").with_delay(Duration::from_millis(30)),
    );
    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();

    let svc_a = Arc::clone(&env.services);
    let id_a = started.session_id.clone();
    let a = tokio::spawn(async move {
        conversation::continue_conversation(&svc_a, continue_params(&id_a, "message A")).await
    });
    // Give A time to acquire the lock before B queues behind it.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let svc_b = Arc::clone(&env.services);
    let id_b = started.session_id.clone();
    let b = tokio::spawn(async move {
        conversation::continue_conversation(&svc_b, continue_params(&id_b, "message B")).await
    });

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Both succeeded; the transcript holds caller A strictly before caller B.
    let session = env.services.store.snapshot(&started.session_id).unwrap();
    let caller_messages: Vec<&str> = session
        .turns
        .iter()
        .filter(|t| t.role == TurnRole::Caller)
        .map(|t| t.content.as_str())
        .collect();
    let pos_a = caller_messages
        .iter()
        .position(|m| *m == "message A")
        .unwrap();
    let pos_b = caller_messages
        .iter()
        .position(|m| *m == "message B")
        .unwrap();
    assert!(pos_a < pos_b, "A must be transcribed before B");
    assert_eq!(session.turns.len(), 6);
}

#[tokio::test]
async fn test_continue_queued_behind_finalize_observes_not_found() {
    let env = TestEnv::with_primary(
        FakeProvider::new("primary").with_delay(Duration::from_millis(30)),
    );
    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();

    let svc_f = Arc::clone(&env.services);
    let id_f = started.session_id.clone();
    let finalize = tokio::spawn(async move {
        conversation::finalize_conversation(&svc_f, finalize_params(&id_f)).await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let svc_c = Arc::clone(&env.services);
    let id_c = started.session_id.clone();
    let queued = tokio::spawn(async move {
        conversation::continue_conversation(&svc_c, continue_params(&id_c, "too late")).await
    });

    finalize.await.unwrap().unwrap();
    let err = queued.await.unwrap().unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

// ============================================================================
// Transcript caps and reaper
// ============================================================================

#[tokio::test]
async fn test_transcript_cap_refuses_further_continues() {
    let mut defaults = common::test_defaults();
    defaults.max_transcript_turns = 4;
    let env = TestEnv::with_defaults(FakeProvider::new("primary"), defaults);

    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();
    conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "turn three"),
    )
    .await
    .unwrap();

    let err = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "one too many"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "SESSION_FULL");
}

#[tokio::test]
async fn test_provider_call_budget_exhaustion_keeps_session_usable() {
    // Two calls total: priming takes one, the first continue takes the
    // last. The next continue must fail on the call budget without
    // wedging the session in processing.
    let mut defaults = common::test_defaults();
    defaults.session_provider_calls = 2;
    let env = TestEnv::with_defaults(FakeProvider::new("primary"), defaults);

    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();

    let continued = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "spend the last call"),
    )
    .await
    .unwrap();
    assert_eq!(continued.budget_remaining.provider_calls, 0);

    let calls_before = env.primary.calls();
    let err = conversation::continue_conversation(
        &env.services,
        continue_params(&started.session_id, "one over budget"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "BUDGET_EXHAUSTED");
    assert_eq!(
        env.primary.calls(),
        calls_before,
        "no provider call once the budget is spent"
    );

    // Session survives and is not stuck in processing.
    let view = conversation::conversation_status(&env.services, &started.session_id).unwrap();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(view.turn_count, 4);
}

#[tokio::test]
async fn test_reaper_destroys_idle_sessions() {
    let mut defaults = common::test_defaults();
    defaults.session_idle_ttl = Duration::from_millis(50);
    let env = TestEnv::with_defaults(FakeProvider::new("primary"), defaults);

    let started = conversation::start_conversation(&env.services, start_params(&env))
        .await
        .unwrap();
    let _reaper = env.services.spawn_reaper();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let err = conversation::conversation_status(&env.services, &started.session_id).unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}
