//! Periodic upkeep of a live session: roster repair, heartbeats and
//! detection of a screen capture ended by the platform.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::ActiveSession;
use crate::signaling::{now_millis, SignalMessage};

const CAPTURE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

pub(crate) async fn run(active: Arc<ActiveSession>, cancel_token: CancellationToken) {
    let ctx = Arc::clone(&active.ctx);
    let mut roster = ticker(ctx.timings.roster_sync_interval);
    let mut heartbeat = ticker(ctx.timings.heartbeat_interval);
    let mut capture = ticker(CAPTURE_CHECK_INTERVAL);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "ms.maintenance", "Maintenance loop stopped");
                break;
            }
            _ = roster.tick() => {
                let diff = ctx.remote.full_sync(&ctx.transport.remote_participants());
                for identity in &diff.removed {
                    active.share.on_participant_left(identity);
                }
            }
            _ = heartbeat.tick() => {
                let message = SignalMessage::Heartbeat {
                    participant_identity: ctx.local_identity().to_string(),
                    timestamp: now_millis(),
                };
                ctx.outbox.try_send(&message, Vec::new());
            }
            _ = capture.tick() => {
                active.share.check_capture_ended().await;
            }
        }
    }
}
