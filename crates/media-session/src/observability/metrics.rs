//! Metrics definitions for the media session core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ms_` prefix
//! - `_total` suffix for counters
//!
//! The embedding application installs the recorder; without one these
//! calls are no-ops.

use metrics::{counter, gauge};

/// Record a room connect attempt.
///
/// Metric: `ms_connect_attempts_total`
/// Labels: `outcome` (success, auth_error, timeout, transport_error)
pub fn record_connect_attempt(outcome: &'static str) {
    counter!("ms_connect_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a join token acquisition.
///
/// Metric: `ms_token_attempts_total`
/// Labels: `outcome` (success, error)
pub fn record_token_attempt(outcome: &'static str) {
    counter!("ms_token_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a mute drift correction.
///
/// Metric: `ms_mute_corrections_total`
/// Labels: `kind` (audio, video), `layer` (sdk, capture)
///
/// Cardinality: 4
pub fn record_mute_correction(kind: &'static str, layer: &'static str) {
    counter!("ms_mute_corrections_total", "kind" => kind, "layer" => layer).increment(1);
}

/// Record an audio device replacement.
///
/// Metric: `ms_device_replacements_total`
/// Labels: `outcome` (success, coalesced, failed)
pub fn record_device_replacement(outcome: &'static str) {
    counter!("ms_device_replacements_total", "outcome" => outcome).increment(1);
}

/// Record a screen-share permission outcome.
///
/// Metric: `ms_screen_share_requests_total`
/// Labels: `outcome` (bypassed, approved, denied, timed_out, rejected_pending)
pub fn record_screen_share_request(outcome: &'static str) {
    counter!("ms_screen_share_requests_total", "outcome" => outcome).increment(1);
}

/// Record a data-channel envelope.
///
/// Metric: `ms_data_messages_total`
/// Labels: `direction` (outbound, inbound, dropped)
pub fn record_data_message(direction: &'static str) {
    counter!("ms_data_messages_total", "direction" => direction).increment(1);
}

/// Set the signaling outbox depth.
///
/// Metric: `ms_signaling_queue_depth`
pub fn set_signaling_queue_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic queue depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("ms_signaling_queue_depth").set(depth as f64);
}

/// Set the number of remote participants in the roster.
///
/// Metric: `ms_remote_participants`
pub fn set_remote_participants(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("ms_remote_participants").set(count as f64);
}
