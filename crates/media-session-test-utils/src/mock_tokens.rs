//! Token provider mock with scripted results.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::join_token::TokenError;
use common::types::{JoinGrant, JoinMeetingRequest};
use media_session::TokenProvider;

use crate::fixtures::grant_for;

/// Grants a token for the requesting user unless a scripted result is
/// queued.
pub struct MockTokenProvider {
    scripted: Mutex<VecDeque<Result<JoinGrant, TokenError>>>,
    requests: Mutex<Vec<JoinMeetingRequest>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl MockTokenProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    /// Queue a result for the next call.
    pub fn push_result(&self, result: Result<JoinGrant, TokenError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn push_rejection(&self, status: u16, message: &str) {
        self.push_result(Err(TokenError::Rejected {
            status,
            message: message.to_string(),
        }));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<JoinMeetingRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn acquire(&self, request: &JoinMeetingRequest) -> Result<JoinGrant, TokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(grant_for(&format!("user-{}", request.user_id))))
    }
}
