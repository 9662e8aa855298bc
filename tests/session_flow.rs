//! End-to-end session flows against an in-memory transport and a
//! wiremock-backed collaborator API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use intervox::protocol::ClientEvent;
use intervox::session::{InterviewSession, SessionDeps, SessionError, SessionPhase};
use intervox::transport::{TransportError, TransportSignal};

use common::{CANDIDATE_ID, MockHandle, collaborator_api, mock_transport, test_settings};

async fn live_session(server: &MockServer) -> (Arc<InterviewSession>, MockHandle) {
    let settings = test_settings(&server.uri());
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);
    session.start().await.unwrap();
    (session, handle)
}

async fn emit_turn(handle: &MockHandle, speaker: &str, text: &str) {
    handle
        .emit_json(json!({ "type": "transcript.final", "speaker": speaker, "text": text }))
        .await;
}

fn requests_to(server_requests: &[wiremock::Request], suffix: &str) -> Vec<serde_json::Value> {
    server_requests
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(serde_json::Value::Null))
        .collect()
}

/// Faults and remote closes tear the session down off the delivery path,
/// so terminal phases land asynchronously.
async fn wait_for_phase(session: &InterviewSession, phase: SessionPhase) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while session.phase() != phase {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {phase:?}, session is {:?}",
            session.phase()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_submissions(server: &MockServer, count: usize) -> Vec<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let requests = server.received_requests().await.unwrap();
        let submissions = requests_to(&requests, "/transcript");
        if submissions.len() >= count {
            return submissions;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} transcript submission(s), saw {}",
            submissions.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_full_interview_flow() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;
    assert_eq!(session.phase(), SessionPhase::Connected);
    assert_eq!(handle.connect_count(), 1);

    // The opening greeting goes out once, after the configured delay.
    assert!(handle.sent_events().is_empty());
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.sent_events(), vec![ClientEvent::Begin]);

    emit_turn(&handle, "interviewer", "Walk me through your last project.").await;
    emit_turn(&handle, "candidate", "I led the migration to event sourcing.").await;

    // Debounce window passes, coaching advice lands on the board.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let suggestions = session.suggestions();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].category, "depth");
    assert_eq!(suggestions[0].suggestion_text, "Ask for concrete numbers.");

    session.end().await;
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(handle.disconnect_count(), 1);

    let requests = server.received_requests().await.unwrap();
    let submissions = requests_to(&requests, "/transcript");
    assert_eq!(submissions.len(), 1);
    let transcript = submissions[0]["transcript"].as_str().unwrap();
    assert!(transcript.contains("Interviewer: Walk me through your last project."));
    assert!(transcript.contains("Candidate: I led the migration to event sourcing."));
    assert_eq!(submissions[0]["candidateId"], CANDIDATE_ID);
}

#[tokio::test]
async fn test_start_runs_at_most_once() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    let second = session.start().await;
    assert!(matches!(second, Err(SessionError::AlreadyStarted)));
    assert_eq!(handle.connect_count(), 1);

    session.end().await;
}

#[tokio::test]
async fn test_unknown_candidate_fails_before_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/candidates/{CANDIDATE_ID}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let settings = test_settings(&server.uri());
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);

    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::Collaborator(_))));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert_eq!(handle.connect_count(), 0);
}

#[tokio::test]
async fn test_connect_failure_marks_session_failed() {
    let server = collaborator_api().await;
    let settings = test_settings(&server.uri());
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    handle.fail_next_connect(TransportError::HandshakeFailed("answer rejected".into()));
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);

    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::Connect(_))));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert!(session.snapshot().error.is_some());
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = collaborator_api().await;
    let mut settings = test_settings(&server.uri());
    settings.connect_timeout = Duration::from_millis(50);
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    handle.hang_connect();
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);

    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::ConnectTimeout(_))));
    assert_eq!(session.phase(), SessionPhase::Failed);
}

#[tokio::test]
async fn test_end_during_connect_cancels_start() {
    let server = collaborator_api().await;
    let settings = test_settings(&server.uri());
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    handle.delay_connect(Duration::from_millis(200));
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);

    let starter = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    session.end().await;
    assert_eq!(session.phase(), SessionPhase::Disconnected);

    // The connect lands after the end: the session must stay in its
    // terminal phase and the freshly built transport must be released.
    starter.await.unwrap().unwrap();
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(handle.disconnect_count(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handle.sent_events().is_empty());
}

#[tokio::test]
async fn test_fault_preserves_transcript_and_finalizes() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    emit_turn(&handle, "interviewer", "What tradeoffs did you weigh?").await;
    emit_turn(&handle, "candidate", "Latency versus durability.").await;
    handle
        .emit(TransportSignal::Fault("connection lost".into()))
        .await;

    wait_for_phase(&session, SessionPhase::Failed).await;
    assert_eq!(session.snapshot().error.as_deref(), Some("connection lost"));
    assert!(session.transcript_text().contains("Latency versus durability."));

    let submissions = wait_for_submissions(&server, 1).await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;
    emit_turn(&handle, "interviewer", "Hello.").await;

    session.end().await;
    session.end().await;
    handle.emit(TransportSignal::Fault("late fault".into())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert_eq!(handle.disconnect_count(), 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/transcript").len(), 1);
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;
    emit_turn(&handle, "interviewer", "Thanks for your time.").await;

    handle.emit(TransportSignal::Closed).await;
    wait_for_phase(&session, SessionPhase::Disconnected).await;
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_remote_close_from_delivery_task_still_finalizes() {
    let server = collaborator_api().await;
    let settings = test_settings(&server.uri());
    let deps = SessionDeps::from_settings(&settings);
    let (factory, handle) = mock_transport();
    handle.enable_pump();
    let session = InterviewSession::with_factory(CANDIDATE_ID, settings, deps, factory);
    session.start().await.unwrap();

    handle.pump_json(json!({
        "type": "transcript.final",
        "speaker": "interviewer",
        "text": "We are out of time, thank you.",
    }));
    handle.pump(TransportSignal::Closed);

    // Teardown aborts the delivery task that carried the close; the
    // transcript submission must still go out.
    wait_for_phase(&session, SessionPhase::Disconnected).await;
    let submissions = wait_for_submissions(&server, 1).await;
    let transcript = submissions[0]["transcript"].as_str().unwrap();
    assert!(transcript.contains("We are out of time, thank you."));
    assert_eq!(handle.disconnect_count(), 1);
}

#[tokio::test]
async fn test_empty_transcript_is_not_submitted() {
    let server = collaborator_api().await;
    let (session, _handle) = live_session(&server).await;

    session.end().await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests_to(&requests, "/transcript").is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_non_fatal() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    handle
        .emit(TransportSignal::Message("{not json at all".into()))
        .await;
    handle
        .emit_json(json!({ "type": "transcript.final", "speaker": "nobody", "text": "x" }))
        .await;
    assert_eq!(session.phase(), SessionPhase::Connected);

    emit_turn(&handle, "interviewer", "Still with me?").await;
    assert!(session.transcript_text().contains("Still with me?"));

    session.end().await;
}

#[tokio::test]
async fn test_unrecognized_event_kind_is_ignored() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    handle
        .emit_json(json!({ "type": "rate.limits", "remaining": 10 }))
        .await;
    assert_eq!(session.phase(), SessionPhase::Connected);
    assert!(session.transcript_text().is_empty());

    session.end().await;
}

#[tokio::test]
async fn test_exchange_reviewed_once() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    emit_turn(&handle, "interviewer", "Describe a failure.").await;
    emit_turn(&handle, "candidate", "We lost a replica.").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.suggestions().len(), 1);

    // A follow-up question alone does not complete a new exchange; the old
    // pair stays reviewed and no second request goes out.
    emit_turn(&handle, "interviewer", "What did you change afterwards?").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.suggestions().len(), 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/coaching/evaluate").len(), 1);

    session.end().await;
}

#[tokio::test]
async fn test_rapid_turns_collapse_to_one_review() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    // Four turns inside one debounce window: one request, for the newest
    // completed pair, with the full transcript as it stands at send time.
    emit_turn(&handle, "interviewer", "Q1?").await;
    emit_turn(&handle, "candidate", "A1.").await;
    emit_turn(&handle, "interviewer", "Q2?").await;
    emit_turn(&handle, "candidate", "A2.").await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let requests = server.received_requests().await.unwrap();
    let reviews = requests_to(&requests, "/coaching/evaluate");
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0]["lastExchange"], "Interviewer: Q2?\nCandidate: A2.");
    let full = reviews[0]["fullTranscript"].as_str().unwrap();
    assert!(full.contains("Q1?") && full.contains("A2."));

    session.end().await;
}

#[tokio::test]
async fn test_suggestion_board_caps_at_newest_five() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    for i in 0..7 {
        handle
            .emit_json(json!({
                "type": "suggestion",
                "category": "pace",
                "text": format!("tip {i}"),
                "reasoning": "",
            }))
            .await;
    }

    let suggestions = session.suggestions();
    assert_eq!(suggestions.len(), 5);
    assert_eq!(suggestions[0].suggestion_text, "tip 6");
    assert_eq!(suggestions[4].suggestion_text, "tip 2");

    session.end().await;
}

#[tokio::test]
async fn test_speaking_flags_and_microphone() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    handle.emit_json(json!({ "type": "speech.started" })).await;
    handle.emit_json(json!({ "type": "user_speech.started" })).await;
    let snapshot = session.snapshot();
    assert!(snapshot.ai_speaking);
    assert!(snapshot.user_speaking);

    handle.emit_json(json!({ "type": "speech.stopped" })).await;
    assert!(!session.snapshot().ai_speaking);

    session.toggle_microphone(false).await;
    assert!(!session.snapshot().mic_enabled);
    assert_eq!(handle.mic_calls(), vec![false]);

    session.end().await;
}

#[tokio::test]
async fn test_greeting_skipped_when_session_ends_early() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    session.end().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handle.sent_events().is_empty());
}

#[tokio::test]
async fn test_events_after_end_are_dropped() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;
    emit_turn(&handle, "interviewer", "First question.").await;

    session.end().await;
    emit_turn(&handle, "candidate", "Too late.").await;

    assert!(!session.transcript_text().contains("Too late."));
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_field_updates_merge() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    handle
        .emit_json(json!({ "type": "field.update", "fields": { "strengths": "systems design" } }))
        .await;
    handle
        .emit_json(json!({ "type": "field.update", "fields": { "concerns": "short tenure" } }))
        .await;

    let fields = session.fields();
    assert_eq!(fields["strengths"], "systems design");
    assert_eq!(fields["concerns"], "short tenure");

    session.end().await;
}

#[tokio::test]
async fn test_send_text_forwards_while_connected() {
    let server = collaborator_api().await;
    let (session, handle) = live_session(&server).await;

    session.send_text("Please repeat the question.").await;
    assert_eq!(
        handle.sent_events(),
        vec![ClientEvent::Text {
            text: "Please repeat the question.".to_string()
        }]
    );

    session.end().await;
    session.send_text("dropped").await;
    assert_eq!(handle.sent_events().len(), 1);
}
