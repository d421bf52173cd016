//! End-to-end tests of a session built from configuration against mocked
//! token and meeting services.
//!
//! Real time: reqwest timeouts must not auto-advance.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use common::meeting_api::RecordingOptions;
use media_session::{Config, MediaSession, SessionError, SessionEvent, TerminalReason};
use media_session_test_utils::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> Config {
    let mut vars = HashMap::new();
    vars.insert("MS_TOKEN_SERVICE_URL".to_string(), server.uri());
    vars.insert("MS_API_TOKEN".to_string(), "api-secret".to_string());
    vars.insert("MS_TOKEN_INITIAL_BACKOFF_MS".to_string(), "10".to_string());
    vars.insert("MS_TOKEN_MAX_BACKOFF_MS".to_string(), "20".to_string());
    Config::from_vars(&vars).unwrap()
}

fn grant_body(identity: &str) -> serde_json::Value {
    serde_json::json!({
        "accessToken": format!("token-for-{identity}"),
        "transportUrl": "wss://sfu.example.com",
        "participantIdentity": identity,
        "meetingInfo": { "title": "Standup" }
    })
}

async fn mount_join(server: &MockServer, identity: &str) {
    Mock::given(method("POST"))
        .and(path("/join-meeting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body(identity)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_connect_uses_granted_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/join-meeting"))
        .and(body_partial_json(serde_json::json!({
            "meetingId": TEST_MEETING_ID,
            "userId": "42",
            "isHost": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("user-42")))
        .expect(1)
        .mount(&server)
        .await;
    let transport = FakeTransport::new();
    let session =
        MediaSession::from_config(&config_for(&server), transport.clone(), FakeDevices::new())
            .unwrap();

    let handle = session.connect(participant_options("42")).await.unwrap();

    assert_eq!(handle.local.identity(), "user-42");
    assert_eq!(transport.tokens(), vec!["token-for-user-42".to_string()]);
}

#[tokio::test]
async fn test_token_service_rejection_fails_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/join-meeting"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_json(serde_json::json!({ "error": "Meeting is locked" })),
        )
        .mount(&server)
        .await;
    let transport = FakeTransport::new();
    let session =
        MediaSession::from_config(&config_for(&server), transport.clone(), FakeDevices::new())
            .unwrap();

    let result = session.connect(participant_options("42")).await;

    assert!(matches!(result, Err(SessionError::Auth(message)) if message.contains("locked")));
    assert_eq!(transport.connect_count(), 0);
    assert!(session.session().is_none());
}

#[tokio::test]
async fn test_host_controls_recording_through_meeting_api() {
    let server = MockServer::start().await;
    mount_join(&server, "user-1").await;
    Mock::given(method("POST"))
        .and(path(format!("/meetings/{TEST_MEETING_ID}/recording/start")))
        .and(header("authorization", "Bearer api-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rec-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/meetings/{TEST_MEETING_ID}/recording/stop")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "rec-1" })))
        .expect(1)
        .mount(&server)
        .await;
    let session =
        MediaSession::from_config(&config_for(&server), FakeTransport::new(), FakeDevices::new())
            .unwrap();
    session.connect(host_options("1")).await.unwrap();

    let job = session
        .start_recording(&RecordingOptions::default())
        .await
        .unwrap();
    assert_eq!(job.0["id"], "rec-1");
    session.stop_recording().await.unwrap();
}

#[tokio::test]
async fn test_participant_cannot_record() {
    let server = MockServer::start().await;
    mount_join(&server, "user-42").await;
    Mock::given(method("POST"))
        .and(path(format!("/meetings/{TEST_MEETING_ID}/recording/start")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let session =
        MediaSession::from_config(&config_for(&server), FakeTransport::new(), FakeDevices::new())
            .unwrap();
    session.connect(participant_options("42")).await.unwrap();

    let result = session.start_recording(&RecordingOptions::default()).await;

    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_end_meeting_calls_api_then_terminates() {
    let server = MockServer::start().await;
    mount_join(&server, "user-1").await;
    Mock::given(method("POST"))
        .and(path(format!("/meetings/{TEST_MEETING_ID}/end")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    let transport = FakeTransport::new();
    let session =
        MediaSession::from_config(&config_for(&server), transport.clone(), FakeDevices::new())
            .unwrap();
    session.connect(host_options("1")).await.unwrap();
    let mut events = session.events();

    session.end_meeting().await.unwrap();

    assert_eq!(transport.sent_of_type("meeting_ended").len(), 1);
    let terminated = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Terminated(_))).await;
    assert_eq!(
        terminated,
        Some(SessionEvent::Terminated(TerminalReason::MeetingEnded))
    );
    assert!(session.is_terminal());
}

#[tokio::test]
async fn test_end_meeting_rejected_by_api_keeps_session() {
    let server = MockServer::start().await;
    mount_join(&server, "user-1").await;
    Mock::given(method("POST"))
        .and(path(format!("/meetings/{TEST_MEETING_ID}/end")))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(serde_json::json!({ "error": "Meeting already ended" })),
        )
        .mount(&server)
        .await;
    let transport = FakeTransport::new();
    let session =
        MediaSession::from_config(&config_for(&server), transport.clone(), FakeDevices::new())
            .unwrap();
    session.connect(host_options("1")).await.unwrap();

    let result = session.end_meeting().await;

    assert!(matches!(result, Err(SessionError::Service(_))));
    assert!(transport.sent_of_type("meeting_ended").is_empty());
    assert!(session.session().is_some());
}
