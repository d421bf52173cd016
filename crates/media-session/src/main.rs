//! Session Probe
//!
//! Checks that the token service configured for the media session core is
//! reachable and issues join grants.
//!
//! Usage: `session-probe <meeting-id> <user-id> [display-name]`
//!
//! # Flow
//!
//! 1. Load configuration from environment (`MS_*` variables)
//! 2. Initialize tracing from `MS_LOG_LEVEL` / `MS_JSON_LOGS`
//! 3. Request a join grant with the configured retry policy
//! 4. Print the granted transport URL and participant identity (token redacted)

#![warn(clippy::pedantic)]

use common::join_token::JoinTokenClient;
use common::types::JoinMeetingRequest;
use media_session::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;
    config.observability.init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(meeting_id), Some(user_id)) = (args.next(), args.next()) else {
        eprintln!("usage: session-probe <meeting-id> <user-id> [display-name]");
        std::process::exit(2);
    };
    let display_name = args.next().unwrap_or_else(|| format!("Probe {user_id}"));

    info!(
        token_service_url = %config.token_service_url,
        max_attempts = config.token_max_attempts,
        "Starting session probe"
    );

    let client = JoinTokenClient::new(config.join_token_config())?;
    let request = JoinMeetingRequest {
        meeting_id,
        user_id,
        display_name,
        is_host: false,
    };

    let grant = client.acquire(&request).await.map_err(|e| {
        error!(error = %e, "Join grant request failed");
        e
    })?;

    println!("transport_url: {}", grant.transport_url);
    println!("participant_identity: {}", grant.participant_identity);
    println!("access_token: [REDACTED]");
    info!("Session probe complete");
    Ok(())
}
