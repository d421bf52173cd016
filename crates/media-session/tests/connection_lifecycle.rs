//! Integration tests for the connect/disconnect state machine.
//!
//! Covers single-flight connects, stabilization, idempotent teardown,
//! deferred cleanup, the single reconnect attempt and terminal ends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use media_session::signaling::SignalMessage;
use media_session::transport::{DisconnectReason, TransportError, TransportEvent};
use media_session::{
    ConnectionStatus, DisconnectOutcome, JoinOptions, SessionError, SessionEvent, TerminalReason,
    TrackSource,
};
use media_session_test_utils::*;

// ============================================================================
// Connect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_establishes_session_with_pre_muted_tracks() {
    let harness = SessionHarness::new();

    let handle = harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();

    assert_eq!(handle.meeting_id, TEST_MEETING_ID);
    assert_eq!(handle.local.identity(), "user-42");
    assert_eq!(handle.transport_url, TEST_TRANSPORT_URL);
    assert!(handle.is_active());
    assert_eq!(*harness.session.connection_status().borrow(), ConnectionStatus::Connected);
    assert_eq!(harness.transport.tokens(), vec!["token-for-user-42".to_string()]);

    let published = harness.transport.published();
    assert_eq!(published.len(), 2);
    for record in &published {
        assert!(record.muted_at_publish, "{:?} published unmuted", record.source);
        assert!(!record.capture_enabled_at_publish, "{:?} captured at publish", record.source);
    }
    assert_eq!(published.first().unwrap().source, TrackSource::Microphone);
    assert_eq!(published.get(1).unwrap().source, TrackSource::Camera);

    let media = harness.session.local_media();
    assert!(media.audio_muted && media.video_muted);
    assert!(media.audio_published && media.video_published);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let harness = SessionHarness::new();
    harness.transport.set_connect_delay(Duration::from_millis(200));
    let options = participant_options("42");

    let (first, second) = tokio::join!(
        harness.session.connect(options.clone()),
        harness.session.connect(options)
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(harness.tokens.calls(), 1);
    assert_eq!(harness.transport.published().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_when_connected_returns_existing_session() {
    let harness = SessionHarness::new();
    let handle = harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();

    let again = harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    assert_eq!(handle, again);
    assert_eq!(harness.transport.connect_count(), 1);

    let other = harness
        .session
        .connect(JoinOptions::new("other-meeting", "42", "Display 42"))
        .await;
    assert!(matches!(other, Err(SessionError::AlreadyConnected(ref id)) if id == TEST_MEETING_ID));
}

#[tokio::test(start_paused = true)]
async fn test_different_meeting_while_connecting_is_busy() {
    let harness = SessionHarness::new();
    harness.tokens.set_delay(Duration::from_millis(500));

    let (first, second) = tokio::join!(
        harness.session.connect(participant_options("42")),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            harness
                .session
                .connect(JoinOptions::new("other-meeting", "42", "Display 42"))
                .await
        }
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SessionError::Busy(_))));
    assert_eq!(harness.tokens.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stabilization_timeout_disconnects_transport() {
    let harness = SessionHarness::new();
    harness.transport.set_stabilizes(false);

    let result = harness.session.connect(participant_options("42")).await;

    assert!(matches!(
        result,
        Err(SessionError::ConnectionTimeout(timeout)) if timeout == Duration::from_secs(2)
    ));
    assert_eq!(harness.transport.disconnect_count(), 1);
    assert!(harness.transport.published().is_empty());
    assert!(harness.session.session().is_none());
    assert_eq!(*harness.session.connection_status().borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_token_rejection_fails_connect() {
    let harness = SessionHarness::new();
    harness.tokens.push_rejection(403, "Not invited");

    let result = harness.session.connect(participant_options("42")).await;

    assert!(matches!(result, Err(SessionError::Auth(ref msg)) if msg.contains("Not invited")));
    assert_eq!(harness.transport.connect_count(), 0);
    assert_eq!(*harness.session.connection_status().borrow(), ConnectionStatus::Disconnected);

    // The next attempt starts fresh.
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    assert_eq!(harness.tokens.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_degrades_instead_of_failing() {
    let harness = SessionHarness::new();
    harness
        .devices
        .fail_camera(Some(media_session::CaptureError::NoDevice));
    let mut events = harness.session.events();

    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();

    let notice = wait_for_event(&mut events, |e| matches!(e, SessionEvent::DeviceNotice(_))).await;
    assert!(notice.is_some());
    let media = harness.session.local_media();
    assert!(media.audio_published);
    assert!(!media.video_published);
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_leave_tears_down_and_is_idempotent() {
    let harness = SessionHarness::new();
    let handle = harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();

    let outcome = harness.session.leave().await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Disconnected);
    assert!(!handle.is_active());
    assert_eq!(harness.transport.disconnect_count(), 1);
    assert!(harness.devices.last_microphone().unwrap().is_stopped());
    assert!(harness.devices.last_camera().unwrap().is_stopped());
    assert!(harness.session.session().is_none());
    assert!(wait_for_event(&mut events, |e| *e == SessionEvent::Disconnected)
        .await
        .is_some());

    let again = harness.session.leave().await.unwrap();
    assert_eq!(again, DisconnectOutcome::AlreadyDisconnected);
    assert_eq!(harness.transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_when_idle_is_safe_to_repeat() {
    let harness = SessionHarness::new();

    for _ in 0..3 {
        let outcome = harness.session.cleanup().await.unwrap();
        assert_eq!(outcome, DisconnectOutcome::AlreadyDisconnected);
    }
    assert_eq!(harness.transport.disconnect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_while_connected_is_deferred_until_session_ends() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();

    let outcome = harness.session.cleanup().await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Deferred);
    assert!(harness.session.session().is_some());
    assert_eq!(harness.transport.disconnect_count(), 0);

    // A deferred cleanup turns the next transport loss into a plain teardown.
    let mut events = harness.session.events();
    assert!(harness
        .transport
        .emit(TransportEvent::Disconnected(DisconnectReason::NetworkLost)));
    assert!(wait_for_event(&mut events, |e| *e == SessionEvent::Disconnected)
        .await
        .is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    assert!(harness.session.session().is_none());
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_network_loss_reconnects_once_and_keeps_mute_intent() {
    let harness = SessionHarness::new();
    let first = harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    harness.session.enable_audio(true).await.unwrap();
    let mut events = harness.session.events();

    harness
        .transport
        .emit(TransportEvent::Disconnected(DisconnectReason::NetworkLost));

    let reconnecting = wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        reconnecting,
        Some(SessionEvent::Reconnecting {
            reason: "network_lost"
        })
    );
    assert!(wait_for_event(&mut events, |e| *e == SessionEvent::Reconnected)
        .await
        .is_some());

    assert_eq!(harness.transport.connect_count(), 2);
    let second = harness.session.session().unwrap();
    assert_ne!(first.connection_id, second.connection_id);
    assert!(!first.is_active());
    assert_eq!(*harness.session.connection_status().borrow(), ConnectionStatus::Connected);

    let mics = harness.transport.published_of(TrackSource::Microphone);
    assert_eq!(mics.len(), 2);
    let republished = mics.last().unwrap();
    assert!(!republished.muted_at_publish);
    assert!(republished.capture_enabled_at_publish);
    let cameras = harness.transport.published_of(TrackSource::Camera);
    assert!(cameras.last().unwrap().muted_at_publish);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_asks_user_to_rejoin() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();
    harness
        .transport
        .fail_connect(Some(TransportError::Connect("sfu unreachable".to_string())));

    harness
        .transport
        .emit(TransportEvent::Disconnected(DisconnectReason::NetworkLost));

    let failed = wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::ReconnectFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        Some(SessionEvent::ReconnectFailed { ref message }) if message.contains("rejoin")
    ));

    // Exactly one retry, then the session stays down.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.tokens.calls(), 2);
    assert!(harness.session.session().is_none());
    assert_eq!(*harness.session.connection_status().borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_leave_during_reconnect_cancels_it() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();

    harness
        .transport
        .emit(TransportEvent::Disconnected(DisconnectReason::NetworkLost));
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. }))
        .await
        .unwrap();

    let outcome = harness.session.leave().await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Disconnected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(harness.tokens.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sdk_reconnecting_state_is_surfaced() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut status = harness.session.connection_status();

    harness.transport.emit(TransportEvent::ConnectionStateChanged(
        media_session::transport::TransportState::Reconnecting,
    ));
    status
        .wait_for(|s| *s == ConnectionStatus::Reconnecting)
        .await
        .unwrap();

    harness.transport.emit(TransportEvent::ConnectionStateChanged(
        media_session::transport::TransportState::Connected,
    ));
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();
    assert_eq!(harness.transport.connect_count(), 1);
}

// ============================================================================
// Terminal ends
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_meeting_ended_message_terminates_without_reconnect() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();

    harness.transport.deliver(
        "user-7",
        &SignalMessage::MeetingEnded {
            ended_by: Some("user-7".to_string()),
            timestamp: 0,
        },
    );

    let terminated = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Terminated(_))).await;
    assert_eq!(terminated, Some(SessionEvent::Terminated(TerminalReason::MeetingEnded)));
    assert!(harness.session.is_terminal());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(harness.transport.disconnect_count(), 1);
    assert!(harness.session.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_removal_matches_any_alias_of_local_participant() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();

    // Someone else being removed does not affect us.
    harness.transport.deliver(
        "user-1",
        &SignalMessage::ParticipantRemoved {
            target_identity: "user-99".to_string(),
            removed_by: "user-1".to_string(),
            timestamp: 0,
        },
    );
    settle().await;
    assert!(harness.session.session().is_some());

    // The bare user id names us too.
    harness.transport.deliver(
        "user-1",
        &SignalMessage::ParticipantRemoved {
            target_identity: "42".to_string(),
            removed_by: "user-1".to_string(),
            timestamp: 0,
        },
    );

    let terminated = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Terminated(_))).await;
    assert_eq!(terminated, Some(SessionEvent::Terminated(TerminalReason::RemovedByHost)));
    assert!(harness.session.session().is_none());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_identity_disconnect_is_terminal() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();
    let mut events = harness.session.events();

    harness
        .transport
        .emit(TransportEvent::Disconnected(DisconnectReason::DuplicateIdentity));

    let terminated = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Terminated(_))).await;
    assert_eq!(
        terminated,
        Some(SessionEvent::Terminated(TerminalReason::DuplicateIdentity))
    );
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_meeting_requires_host() {
    let harness = SessionHarness::new();
    harness
        .session
        .connect(participant_options("42"))
        .await
        .unwrap();

    let result = harness.session.end_meeting().await;
    assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
    assert!(harness.session.session().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_host_end_meeting_broadcasts_and_terminates() {
    let harness = SessionHarness::new();
    harness.session.connect(host_options("1")).await.unwrap();
    let mut events = harness.session.events();

    harness.session.end_meeting().await.unwrap();

    let ended = harness.transport.sent_of_type("meeting_ended");
    assert_eq!(ended.len(), 1);
    let (message, destinations) = ended.first().unwrap();
    assert!(destinations.is_empty());
    assert!(matches!(
        message,
        SignalMessage::MeetingEnded { ended_by: Some(by), .. } if by == "user-1"
    ));
    assert!(wait_for_event(&mut events, |e| {
        *e == SessionEvent::Terminated(TerminalReason::MeetingEnded)
    })
    .await
    .is_some());
    assert!(harness.session.is_terminal());
    assert_eq!(harness.transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_terminal_end_clears_terminal_flag() {
    let harness = SessionHarness::new();
    harness.session.connect(host_options("1")).await.unwrap();
    harness.session.end_meeting().await.unwrap();
    assert!(harness.session.is_terminal());

    harness.session.connect(host_options("1")).await.unwrap();
    assert!(!harness.session.is_terminal());
    assert_eq!(harness.transport.connect_count(), 2);
}
