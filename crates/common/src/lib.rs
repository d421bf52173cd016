//! Shared types and REST collaborators for the Huddle media session core.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for join token acquisition with bounded retry
pub mod join_token;

/// Module for the meeting control REST client
pub mod meeting_api;
