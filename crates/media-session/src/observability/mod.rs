//! Observability for the media session core.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing; access tokens never reach a span or event. Metric labels
//! are bounded enums.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ms_connect_attempts_total` | Counter | `outcome` | Room connect attempts |
//! | `ms_token_attempts_total` | Counter | `outcome` | Join token acquisitions |
//! | `ms_mute_corrections_total` | Counter | `kind`, `layer` | Mute drift corrected by the guard |
//! | `ms_device_replacements_total` | Counter | `outcome` | Audio device replacements |
//! | `ms_screen_share_requests_total` | Counter | `outcome` | Screen-share permission outcomes |
//! | `ms_data_messages_total` | Counter | `direction` | Data-channel envelopes |
//! | `ms_signaling_queue_depth` | Gauge | none | Outbox depth |
//! | `ms_remote_participants` | Gauge | none | Remote participants in the roster |

pub mod metrics;
