//! Dispatch of SDK events and inbound data messages for one session.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionManager, DisconnectKind};
use crate::events::{ChatMessage, SessionEvent};
use crate::observability::metrics;
use crate::screen_share::permission::Decision;
use crate::session::ActiveSession;
use crate::signaling::SignalMessage;
use crate::transport::{DisconnectReason, TransportEvent, TransportEvents};

/// Run until the session is cancelled or the room connection closes.
pub(crate) async fn run(
    active: Arc<ActiveSession>,
    connection: Weak<ConnectionManager>,
    mut events: TransportEvents,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            // The SDK dropped the stream without a disconnect event.
            if !cancel_token.is_cancelled() {
                if let Some(connection) = connection.upgrade() {
                    connection
                        .handle_transport_lost(DisconnectReason::NetworkLost)
                        .await;
                }
            }
            break;
        };

        if let TransportEvent::Disconnected(reason) = event {
            info!(target: "ms.event_pump", reason = reason.as_str(), "Room disconnected");
            if let Some(connection) = connection.upgrade() {
                connection.handle_transport_lost(reason).await;
            }
            break;
        }

        dispatch(&active, &connection, event).await;
    }
    debug!(target: "ms.event_pump", "Event pump stopped");
}

async fn dispatch(
    active: &ActiveSession,
    connection: &Weak<ConnectionManager>,
    event: TransportEvent,
) {
    let ctx = &active.ctx;
    match event {
        TransportEvent::ParticipantConnected(info) => {
            ctx.remote.on_participant_connected(&info);
        }
        TransportEvent::ParticipantDisconnected { identity } => {
            ctx.remote.on_participant_disconnected(&identity);
            active.share.on_participant_left(&identity);
        }
        TransportEvent::TrackPublished {
            identity,
            publication,
        } => {
            ctx.remote.on_track_published(&identity, &publication);
            active.share.on_track_published(&identity, &publication).await;
        }
        TransportEvent::TrackUnpublished { identity, sid } => {
            ctx.remote.on_track_unpublished(&identity, &sid);
            active.share.on_track_unpublished(&identity, &sid);
        }
        TransportEvent::TrackSubscribed {
            identity,
            publication,
        } => {
            if publication.source.is_screen_share() {
                active.share.on_track_subscribed(&identity, &publication).await;
            }
            ctx.remote.on_track_subscribed(&identity, &publication);
        }
        TransportEvent::TrackUnsubscribed { identity, sid } => {
            ctx.remote.on_track_unsubscribed(&identity, &sid);
            active.share.on_track_unsubscribed(&identity, &sid);
        }
        TransportEvent::TrackMuted { identity, sid } => {
            ctx.remote.on_track_muted(&identity, &sid, true);
            active.share.on_track_muted(&identity, &sid, true);
        }
        TransportEvent::TrackUnmuted { identity, sid } => {
            ctx.remote.on_track_muted(&identity, &sid, false);
            active.share.on_track_muted(&identity, &sid, false);
        }
        TransportEvent::ConnectionStateChanged(state) => {
            if let Some(connection) = connection.upgrade() {
                connection.on_transport_state(state);
            }
        }
        TransportEvent::DataReceived {
            sender_identity,
            payload,
        } => {
            metrics::record_data_message("inbound");
            match SignalMessage::decode(&payload) {
                Ok(message) => {
                    handle_message(active, connection, sender_identity.as_deref(), message)
                        .await;
                }
                Err(e) => {
                    debug!(target: "ms.event_pump", error = %e, "Malformed data message dropped");
                }
            }
        }
        TransportEvent::Disconnected(_) => {}
    }
}

async fn handle_message(
    active: &ActiveSession,
    connection: &Weak<ConnectionManager>,
    sender: Option<&str>,
    message: SignalMessage,
) {
    let ctx = &active.ctx;
    trace!(
        target: "ms.event_pump",
        message_type = message.message_type(),
        sender = ?sender,
        "Data message received"
    );

    match message {
        SignalMessage::ChatMessage {
            message_id,
            sender_identity,
            sender_name,
            text,
            timestamp,
        } => {
            let sender_name = ctx.display_name_of(&sender_identity, Some(&sender_name));
            ctx.emit(SessionEvent::ChatReceived(ChatMessage {
                message_id,
                sender_identity,
                sender_name,
                text,
                timestamp_ms: timestamp,
                local: false,
            }));
        }
        SignalMessage::Reaction {
            sender_identity,
            sender_name,
            emoji,
            ..
        } => {
            let sender_name = ctx.display_name_of(&sender_identity, Some(&sender_name));
            ctx.emit(SessionEvent::ReactionReceived {
                sender_identity,
                sender_name,
                emoji,
            });
        }
        SignalMessage::ScreenShareRequest {
            request_id,
            requester_identity,
            requester_name,
            timestamp,
        } => {
            active.permission.handle_request(
                &request_id,
                &requester_identity,
                &requester_name,
                timestamp,
            );
        }
        SignalMessage::ScreenShareApproved {
            request_id,
            requester_identity,
            approved_by,
            ..
        } => {
            active.permission.handle_decision(
                &request_id,
                &requester_identity,
                Decision::Approved { by: approved_by },
            );
        }
        SignalMessage::ScreenShareDenied {
            request_id,
            requester_identity,
            denied_by,
            ..
        } => {
            active.permission.handle_decision(
                &request_id,
                &requester_identity,
                Decision::Denied { by: denied_by },
            );
        }
        SignalMessage::ForceStopScreenShare {
            target_identity,
            requested_by,
            ..
        } => {
            active
                .share
                .handle_force_stop(&target_identity, &requested_by)
                .await;
        }
        SignalMessage::ScreenShareStopped {
            sharer_identity, ..
        } => {
            active.share.handle_share_stopped(&sharer_identity);
        }
        SignalMessage::ParticipantVideoStateChanged {
            participant_identity,
            video_enabled,
            ..
        } => {
            ctx.remote.set_video_hint(&participant_identity, video_enabled);
            ctx.emit(SessionEvent::PeerVideoStateChanged {
                identity: participant_identity,
                video_enabled,
            });
        }
        SignalMessage::AudioDeviceChanged {
            participant_identity,
            participant_name,
            ..
        } => {
            let name = ctx.display_name_of(&participant_identity, Some(&participant_name));
            ctx.emit(SessionEvent::PeerSwitchedDevice {
                identity: participant_identity,
                name,
            });
        }
        SignalMessage::MeetingEnded { ended_by, .. } => {
            info!(target: "ms.event_pump", ended_by = ?ended_by, "Meeting ended by host");
            terminate(connection, DisconnectKind::MeetingEnded).await;
        }
        SignalMessage::ParticipantRemoved {
            target_identity,
            removed_by,
            ..
        } => {
            if ctx.handle.local.matches_alias(&target_identity) {
                info!(target: "ms.event_pump", removed_by = %removed_by, "Removed from meeting");
                terminate(connection, DisconnectKind::Removed).await;
            }
        }
        SignalMessage::Heartbeat {
            participant_identity,
            timestamp,
        } => {
            ctx.remote.touch(&participant_identity, timestamp);
        }
        SignalMessage::Unknown => {
            trace!(target: "ms.event_pump", "Unknown message type ignored");
        }
    }
}

async fn terminate(connection: &Weak<ConnectionManager>, kind: DisconnectKind) {
    let Some(connection) = connection.upgrade() else {
        return;
    };
    match connection.disconnect(kind).await {
        Ok(outcome) => debug!(target: "ms.event_pump", outcome = ?outcome, "Terminal disconnect complete"),
        Err(e) => warn!(target: "ms.event_pump", error = %e, "Terminal disconnect failed"),
    }
}
