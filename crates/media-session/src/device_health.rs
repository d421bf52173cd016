//! Microphone health monitoring and audio device replacement.
//!
//! A periodic check looks for an ended, missing, source-muted or
//! unpublished microphone and for a change of the underlying device. OS
//! device-change notifications are debounced into a single replacement.
//! Concurrent replacement triggers coalesce into the one in flight.
//!
//! Replacement order matters: the old publication is unpublished and the
//! SFU acknowledgement awaited before the new track is published, so the
//! room never sees two microphone publications for one participant.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::events::{DeviceNotice, SessionEvent};
use crate::in_flight::InFlight;
use crate::observability::metrics;
use crate::signaling::{now_millis, SignalMessage};
use crate::types::{MediaKind, ReadyState};

/// What the health check found wrong with the microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHealthIssue {
    /// The track reports `ended`.
    TrackEnded,
    /// The track is now backed by a different input device.
    DeviceChanged {
        previous: Option<String>,
        current: Option<String>,
    },
    /// The hardware reports muted while the user wants to be heard.
    SourceMuted,
    /// A track is expected but none is attached.
    TrackMissing,
    /// The track is attached but has no publication.
    NotPublished,
}

impl DeviceHealthIssue {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceHealthIssue::TrackEnded => "track_ended",
            DeviceHealthIssue::DeviceChanged { .. } => "device_changed",
            DeviceHealthIssue::SourceMuted => "source_muted",
            DeviceHealthIssue::TrackMissing => "track_missing",
            DeviceHealthIssue::NotPublished => "not_published",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced { device_id: Option<String> },
    /// Another replacement was running; this trigger was folded into it.
    AlreadyInProgress,
    /// The old track was kept (or no publication could be made).
    Failed(String),
}

pub struct DeviceHealthMonitor {
    ctx: Arc<SessionContext>,
    replacing: AtomicBool,
    last_device_id: Mutex<Option<String>>,
}

impl DeviceHealthMonitor {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        let last_device_id = ctx
            .guard
            .track(MediaKind::Audio)
            .and_then(|t| t.device_id());
        Self {
            ctx,
            replacing: AtomicBool::new(false),
            last_device_id: Mutex::new(last_device_id),
        }
    }

    fn last_device(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_device_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Inspect the current microphone. `None` means healthy (or nothing to
    /// monitor).
    pub fn check_health(&self) -> Option<DeviceHealthIssue> {
        let guard = &self.ctx.guard;
        let Some(track) = guard.track(MediaKind::Audio) else {
            return guard
                .expects_track(MediaKind::Audio)
                .then_some(DeviceHealthIssue::TrackMissing);
        };

        if track.ready_state() == ReadyState::Ended {
            return Some(DeviceHealthIssue::TrackEnded);
        }

        let current = track.device_id();
        {
            let mut last = self.last_device();
            match last.clone() {
                None => *last = current,
                Some(previous) if current.as_ref() != Some(&previous) => {
                    return Some(DeviceHealthIssue::DeviceChanged {
                        previous: Some(previous),
                        current,
                    });
                }
                Some(_) => {}
            }
        }

        if track.is_source_muted() && !guard.intended_mute(MediaKind::Audio) {
            return Some(DeviceHealthIssue::SourceMuted);
        }

        if guard.sid(MediaKind::Audio).is_none() {
            return Some(DeviceHealthIssue::NotPublished);
        }

        None
    }

    /// Run one check and replace the microphone when it is unhealthy.
    pub async fn run_check(&self) -> Option<ReplaceOutcome> {
        let issue = self.check_health()?;
        info!(target: "ms.device_health", issue = issue.as_str(), "Microphone unhealthy, replacing");
        Some(self.replace_audio_track().await)
    }

    /// Swap the microphone for a fresh track on the current default input.
    ///
    /// Mute intent is applied to the new track before it is published.
    #[instrument(skip_all, name = "ms.device_health.replace")]
    pub async fn replace_audio_track(&self) -> ReplaceOutcome {
        let Some(_replacing) = InFlight::try_acquire(&self.replacing) else {
            debug!(target: "ms.device_health", "Replacement already running, trigger coalesced");
            metrics::record_device_replacement("coalesced");
            return ReplaceOutcome::AlreadyInProgress;
        };

        let ctx = &self.ctx;
        let device_id = match ctx.devices.default_audio_input().await {
            Ok(id) => id,
            Err(e) => return self.degraded(&e.to_string(), e.user_message()),
        };
        let new_track = match ctx.devices.create_microphone(device_id.as_deref()).await {
            Ok(track) => track,
            Err(e) => return self.degraded(&e.to_string(), e.user_message()),
        };

        let muted = ctx.guard.intended_mute(MediaKind::Audio);
        new_track.set_muted(muted);
        new_track.set_capture_enabled(!muted);

        if let Some(old_sid) = ctx.guard.sid(MediaKind::Audio) {
            if let Err(e) = ctx.transport.unpublish_track(&old_sid).await {
                new_track.stop();
                let e = SessionError::from(e);
                return self.degraded(&e.to_string(), &e.user_message());
            }
        }
        if let Some((old_track, _)) = ctx.guard.detach_track(MediaKind::Audio) {
            old_track.stop();
        }

        let published = ctx.transport.publish_track(Arc::clone(&new_track)).await;
        let sid = published.as_ref().ok().cloned();
        ctx.guard.attach_track(MediaKind::Audio, Arc::clone(&new_track), sid);
        *self.last_device() = new_track.device_id().or(device_id);

        // Kept attached so the next health check retries the publish.
        if let Err(e) = published {
            let e = SessionError::from(e);
            return self.degraded(&e.to_string(), &e.user_message());
        }

        let announce = SignalMessage::AudioDeviceChanged {
            participant_identity: ctx.local_identity().to_string(),
            participant_name: ctx.local_name(),
            timestamp: now_millis(),
        };
        ctx.outbox.try_send(&announce, Vec::new());

        let device_id = self.last_device().clone();
        info!(target: "ms.device_health", device_id = ?device_id, "Microphone replaced");
        ctx.emit(SessionEvent::DeviceNotice(DeviceNotice::AudioDeviceReplaced {
            device_id: device_id.clone(),
        }));
        ctx.emit(SessionEvent::LocalMediaChanged(ctx.guard.snapshot()));
        metrics::record_device_replacement("success");
        ReplaceOutcome::Replaced { device_id }
    }

    fn degraded(&self, detail: &str, user_message: &str) -> ReplaceOutcome {
        warn!(target: "ms.device_health", error = %detail, "Microphone replacement failed");
        self.ctx
            .emit(SessionEvent::DeviceNotice(DeviceNotice::AudioDeviceDegraded {
                message: user_message.to_string(),
            }));
        metrics::record_device_replacement("failed");
        ReplaceOutcome::Failed(detail.to_string())
    }

    /// Spawn the health ticker and the debounced device-change listener.
    pub fn spawn(
        self: &Arc<Self>,
        health_interval: Duration,
        debounce: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let mut changes = self.ctx.devices.device_changes();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + health_interval, health_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut changes_open = true;
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!(target: "ms.device_health", "Device health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        monitor.run_check().await;
                    }
                    change = changes.recv(), if changes_open => {
                        match change {
                            Ok(()) | Err(RecvError::Lagged(_)) => {
                                deadline = Some(Instant::now() + debounce);
                            }
                            Err(RecvError::Closed) => changes_open = false,
                        }
                    }
                    () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        debug!(target: "ms.device_health", "Device change settled");
                        monitor.replace_audio_track().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::testing::test_context;
    use crate::transport::testing::{StubTrack, StubTransport};
    use crate::transport::{LocalMediaTrack, SharedTrack};
    use crate::types::{ParticipantRole, TrackSource};

    fn monitor_with_mic() -> (DeviceHealthMonitor, Arc<StubTrack>, Arc<StubTransport>) {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport.clone());
        let mic = StubTrack::new("old-mic", TrackSource::Microphone);
        let shared: SharedTrack = mic.clone();
        ctx.guard.set_intended_mute(MediaKind::Audio, false);
        ctx.guard
            .attach_track(MediaKind::Audio, shared, Some("TR_old-mic".to_string()));
        (DeviceHealthMonitor::new(ctx), mic, transport)
    }

    #[tokio::test]
    async fn test_healthy_microphone_has_no_issue() {
        let (monitor, _mic, _transport) = monitor_with_mic();
        assert_eq!(monitor.check_health(), None);
    }

    #[tokio::test]
    async fn test_health_issues_detected() {
        let (monitor, mic, _transport) = monitor_with_mic();

        mic.state.lock().unwrap().source_muted = true;
        assert_eq!(monitor.check_health(), Some(DeviceHealthIssue::SourceMuted));
        mic.state.lock().unwrap().source_muted = false;

        mic.state.lock().unwrap().device_id = Some("usb-headset".to_string());
        assert_eq!(
            monitor.check_health(),
            Some(DeviceHealthIssue::DeviceChanged {
                previous: Some("default".to_string()),
                current: Some("usb-headset".to_string()),
            })
        );

        mic.stop();
        assert_eq!(monitor.check_health(), Some(DeviceHealthIssue::TrackEnded));
    }

    #[tokio::test]
    async fn test_source_muted_is_fine_when_user_muted() {
        let (monitor, mic, _transport) = monitor_with_mic();
        monitor.ctx.guard.set_intended_mute(MediaKind::Audio, true);
        mic.state.lock().unwrap().source_muted = true;
        assert_eq!(monitor.check_health(), None);
    }

    #[tokio::test]
    async fn test_replace_unpublishes_before_publishing() {
        let (monitor, old_mic, transport) = monitor_with_mic();

        let outcome = monitor.replace_audio_track().await;
        assert_eq!(
            outcome,
            ReplaceOutcome::Replaced {
                device_id: Some("default".to_string())
            }
        );

        assert_eq!(*transport.unpublished.lock().unwrap(), vec!["TR_old-mic"]);
        assert_eq!(*transport.published.lock().unwrap(), vec!["TR_mic"]);
        assert!(old_mic.snapshot().stopped);
        assert_eq!(monitor.ctx.guard.sid(MediaKind::Audio).as_deref(), Some("TR_mic"));

        let new_mic = monitor.ctx.guard.track(MediaKind::Audio).unwrap();
        assert!(!new_mic.is_muted());
        assert!(new_mic.is_capture_enabled());
    }

    #[tokio::test]
    async fn test_concurrent_replacements_coalesce() {
        let (monitor, _mic, transport) = monitor_with_mic();
        let _held = InFlight::try_acquire(&monitor.replacing).unwrap();

        assert_eq!(
            monitor.replace_audio_track().await,
            ReplaceOutcome::AlreadyInProgress
        );
        assert!(transport.published.lock().unwrap().is_empty());
    }
}
