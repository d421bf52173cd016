//! Data-channel signaling: wire envelopes and the ordered outbox.

pub mod messages;
pub mod outbox;

pub use messages::{now_millis, SignalMessage};
pub use outbox::{QueueLevel, QueueMonitor, QueueStatus, SignalingOutbox};
