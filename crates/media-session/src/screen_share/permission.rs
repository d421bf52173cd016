//! Screen-share permission protocol over the data channel.
//!
//! Participant side: `request_permission` broadcasts a request and waits
//! for a decision addressed to it, up to the configured timeout. Hosts and
//! co-hosts bypass the protocol.
//!
//! Host side: incoming requests are queued (one per requester), surfaced
//! as `SessionEvent::ScreenShareRequested` and resolved by `approve` /
//! `deny`, which send the decision only to the requester.
//!
//! Per requester: `idle -> pending -> {approved, denied, timed out} -> idle`.
//! A decision for a request that is no longer pending is a no-op.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::events::SessionEvent;
use crate::observability::metrics;
use crate::signaling::{now_millis, SignalMessage};

/// How a permission request was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionGrant {
    /// Hosts and co-hosts never ask.
    Privileged,
    Approved { approved_by: String },
}

/// A request waiting for a host decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: String,
    pub requester_identity: String,
    pub requester_name: String,
    pub timestamp_ms: i64,
    pub received_at: Instant,
}

/// Decision carried by an approval or denial envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Approved { by: String },
    Denied { by: String },
}

struct Outgoing {
    request_id: String,
    respond_to: oneshot::Sender<Decision>,
}

#[derive(Default)]
struct PermissionInner {
    outgoing: Option<Outgoing>,
    incoming: Vec<PendingRequest>,
}

pub struct ScreenSharePermission {
    ctx: Arc<SessionContext>,
    inner: Mutex<PermissionInner>,
}

impl ScreenSharePermission {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            inner: Mutex::new(PermissionInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PermissionInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Ask the hosts for permission to share.
    ///
    /// # Errors
    ///
    /// - `RequestAlreadyPending` if a request of ours is still pending
    /// - `PermissionDenied` if a host denied it
    /// - `PermissionTimedOut` if no decision arrived in time
    /// - `NotConnected` if the session ended while waiting
    #[instrument(skip_all, name = "ms.permission.request")]
    pub async fn request_permission(&self) -> Result<PermissionGrant, SessionError> {
        if self.ctx.is_privileged() {
            metrics::record_screen_share_request("bypassed");
            return Ok(PermissionGrant::Privileged);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            // A waiter that gave up leaves a closed sender behind.
            if inner
                .outgoing
                .as_ref()
                .is_some_and(|o| !o.respond_to.is_closed())
            {
                metrics::record_screen_share_request("rejected_pending");
                return Err(SessionError::RequestAlreadyPending);
            }
            inner.outgoing = Some(Outgoing {
                request_id: request_id.clone(),
                respond_to: tx,
            });
        }

        let message = SignalMessage::ScreenShareRequest {
            request_id: request_id.clone(),
            requester_identity: self.ctx.local_identity().to_string(),
            requester_name: self.ctx.local_name(),
            timestamp: now_millis(),
        };
        if let Err(e) = self.ctx.outbox.send(&message, Vec::new()).await {
            self.clear_outgoing(&request_id);
            return Err(e);
        }
        info!(target: "ms.permission", request_id = %request_id, "Screen share permission requested");

        let timeout = self.ctx.timings.permission_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Decision::Approved { by })) => {
                metrics::record_screen_share_request("approved");
                info!(target: "ms.permission", request_id = %request_id, "Screen share approved");
                Ok(PermissionGrant::Approved { approved_by: by })
            }
            Ok(Ok(Decision::Denied { by })) => {
                metrics::record_screen_share_request("denied");
                info!(target: "ms.permission", request_id = %request_id, "Screen share denied");
                Err(SessionError::PermissionDenied(format!(
                    "Screen share request denied by {by}"
                )))
            }
            Ok(Err(_)) => {
                self.clear_outgoing(&request_id);
                Err(SessionError::NotConnected)
            }
            Err(_) => {
                self.clear_outgoing(&request_id);
                metrics::record_screen_share_request("timed_out");
                warn!(target: "ms.permission", request_id = %request_id, "Screen share request timed out");
                Err(SessionError::PermissionTimedOut)
            }
        }
    }

    fn clear_outgoing(&self, request_id: &str) {
        let mut inner = self.lock();
        if inner
            .outgoing
            .as_ref()
            .is_some_and(|o| o.request_id == request_id)
        {
            inner.outgoing = None;
        }
    }

    /// Whether a request of ours is waiting for a decision.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        self.lock()
            .outgoing
            .as_ref()
            .is_some_and(|o| !o.respond_to.is_closed())
    }

    /// Apply an approval or denial. Returns false when it was not for us or
    /// the request is no longer pending.
    pub(crate) fn handle_decision(
        &self,
        request_id: &str,
        requester_identity: &str,
        decision: Decision,
    ) -> bool {
        if !self.ctx.handle.local.matches_alias(requester_identity) {
            return false;
        }

        let outgoing = {
            let mut inner = self.lock();
            if inner
                .outgoing
                .as_ref()
                .is_some_and(|o| o.request_id == request_id)
            {
                inner.outgoing.take()
            } else {
                None
            }
        };

        let Some(outgoing) = outgoing else {
            debug!(
                target: "ms.permission",
                request_id = %request_id,
                "Decision for a request that is no longer pending ignored"
            );
            return false;
        };
        outgoing.respond_to.send(decision).is_ok()
    }

    /// Host side: queue a participant's request.
    pub(crate) fn handle_request(
        &self,
        request_id: &str,
        requester_identity: &str,
        requester_name: &str,
        timestamp_ms: i64,
    ) -> bool {
        if !self.ctx.is_privileged() {
            return false;
        }
        let requester = self.ctx.key_for(requester_identity);
        if self.ctx.is_local(&requester) {
            return false;
        }

        let request = PendingRequest {
            request_id: request_id.to_string(),
            requester_identity: requester_identity.to_string(),
            requester_name: self
                .ctx
                .display_name_of(requester_identity, Some(requester_name)),
            timestamp_ms,
            received_at: Instant::now(),
        };

        {
            let mut inner = self.lock();
            self.prune_expired(&mut inner);
            // Only the latest request of a requester is meaningful.
            inner
                .incoming
                .retain(|r| !requester.matches_alias(&r.requester_identity));
            inner.incoming.push(request.clone());
        }

        info!(
            target: "ms.permission",
            request_id = %request.request_id,
            requester = %request.requester_identity,
            "Screen share request received"
        );
        self.ctx.emit(SessionEvent::ScreenShareRequested(request));
        true
    }

    fn prune_expired(&self, inner: &mut PermissionInner) {
        let timeout = self.ctx.timings.permission_timeout;
        inner.incoming.retain(|r| r.received_at.elapsed() < timeout);
    }

    /// Pending incoming requests, oldest first.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        let mut inner = self.lock();
        self.prune_expired(&mut inner);
        inner.incoming.clone()
    }

    /// Approve a pending request. Returns false if it is no longer pending.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if the local participant is not a host or co-host.
    pub async fn approve(&self, request_id: &str) -> Result<bool, SessionError> {
        self.resolve(request_id, true).await
    }

    /// Deny a pending request. Returns false if it is no longer pending.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if the local participant is not a host or co-host.
    pub async fn deny(&self, request_id: &str) -> Result<bool, SessionError> {
        self.resolve(request_id, false).await
    }

    #[instrument(skip_all, name = "ms.permission.resolve", fields(request_id = %request_id, approved))]
    async fn resolve(&self, request_id: &str, approved: bool) -> Result<bool, SessionError> {
        if !self.ctx.is_privileged() {
            return Err(SessionError::PermissionDenied(
                "Only hosts and co-hosts can answer screen share requests".to_string(),
            ));
        }

        let taken = {
            let mut inner = self.lock();
            self.prune_expired(&mut inner);
            let position = inner.incoming.iter().position(|r| r.request_id == request_id);
            position.map(|index| (index, inner.incoming.remove(index)))
        };
        let Some((position, request)) = taken else {
            debug!(target: "ms.permission", "Request no longer pending");
            return Ok(false);
        };

        let by = self.ctx.local_name();
        let message = if approved {
            SignalMessage::ScreenShareApproved {
                request_id: request.request_id.clone(),
                requester_identity: request.requester_identity.clone(),
                approved_by: by,
                timestamp: now_millis(),
            }
        } else {
            SignalMessage::ScreenShareDenied {
                request_id: request.request_id.clone(),
                requester_identity: request.requester_identity.clone(),
                denied_by: by,
                timestamp: now_millis(),
            }
        };
        if let Err(e) = self
            .ctx
            .outbox
            .send(&message, vec![request.requester_identity.clone()])
            .await
        {
            warn!(target: "ms.permission", error = %e, "Decision not delivered, request stays pending");
            let mut inner = self.lock();
            // A newer request from the same requester supersedes this one.
            if !inner
                .incoming
                .iter()
                .any(|r| r.requester_identity == request.requester_identity)
            {
                let position = position.min(inner.incoming.len());
                inner.incoming.insert(position, request);
            }
            return Err(e);
        }

        self.ctx.emit(SessionEvent::ScreenShareRequestResolved {
            request_id: request.request_id,
            approved,
        });
        Ok(true)
    }

    /// Drop every request. A waiting `request_permission` fails with `NotConnected`.
    pub(crate) fn cancel_all(&self) {
        let mut inner = self.lock();
        inner.outgoing = None;
        inner.incoming.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::context::testing::test_context;
    use crate::transport::testing::StubTransport;
    use crate::types::ParticipantRole;

    #[tokio::test(start_paused = true)]
    async fn test_privileged_roles_bypass() {
        for role in [ParticipantRole::Host, ParticipantRole::CoHost] {
            let transport = StubTransport::new();
            let (ctx, _rx) = test_context("user-1", role, transport.clone());
            let permission = ScreenSharePermission::new(ctx);

            let grant = permission.request_permission().await.unwrap();
            assert_eq!(grant, PermissionGrant::Privileged);
            assert!(transport.sent_messages().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_while_pending_fails_fast() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-2", ParticipantRole::Participant, transport);
        let permission = Arc::new(ScreenSharePermission::new(ctx));

        let first = tokio::spawn({
            let permission = Arc::clone(&permission);
            async move { permission.request_permission().await }
        });
        while !permission.has_outgoing() {
            tokio::task::yield_now().await;
        }

        let second = permission.request_permission().await;
        assert!(matches!(second, Err(SessionError::RequestAlreadyPending)));

        first.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_late_approval_is_noop() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-2", ParticipantRole::Participant, transport.clone());
        let permission = ScreenSharePermission::new(ctx);

        let started = Instant::now();
        let result = permission.request_permission().await;
        assert!(matches!(result, Err(SessionError::PermissionTimedOut)));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
        assert!(!permission.has_outgoing());

        let (request, _) = transport.sent_messages().into_iter().next().unwrap();
        let request_id = match request {
            SignalMessage::ScreenShareRequest { request_id, .. } => request_id,
            other => unreachable!("expected a screen share request, got {other:?}"),
        };
        let applied = permission.handle_decision(
            &request_id,
            "user-2",
            Decision::Approved { by: "Host".to_string() },
        );
        assert!(!applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_for_other_participant_is_ignored() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-2", ParticipantRole::Participant, transport);
        let permission = ScreenSharePermission::new(ctx);

        assert!(!permission.handle_decision(
            "req-1",
            "user-3",
            Decision::Denied { by: "Host".to_string() }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_queues_one_request_per_requester() {
        let transport = StubTransport::new();
        let (ctx, mut rx) = test_context("user-1", ParticipantRole::Host, transport);
        let permission = ScreenSharePermission::new(ctx);

        assert!(permission.handle_request("req-1", "user-7", "Bob", 1));
        assert!(permission.handle_request("req-2", "user-7", "Bob", 2));
        assert!(permission.handle_request("req-3", "user-8", "", 3));

        let pending = permission.pending_requests();
        let ids: Vec<_> = pending.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["req-2", "req-3"]);
        // Blank names fall back to the placeholder
        assert_eq!(pending.last().unwrap().requester_name, "User 8");

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ScreenShareRequested(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_participant_ignores_requests_and_cannot_resolve() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-2", ParticipantRole::Participant, transport);
        let permission = ScreenSharePermission::new(ctx);

        assert!(!permission.handle_request("req-1", "user-7", "Bob", 1));
        assert!(matches!(
            permission.approve("req-1").await,
            Err(SessionError::PermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_sends_directed_decision() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Host, transport.clone());
        let permission = ScreenSharePermission::new(ctx);
        permission.handle_request("req-1", "user-7", "Bob", 1);

        assert!(permission.deny("req-1").await.unwrap());
        assert!(!permission.deny("req-1").await.unwrap());
        assert!(permission.pending_requests().is_empty());

        let sent = transport.sent_messages();
        let (message, destinations) = sent.first().unwrap();
        assert!(matches!(message, SignalMessage::ScreenShareDenied { request_id, .. } if request_id == "req-1"));
        assert_eq!(destinations, &vec!["user-7".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_requests_are_pruned() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Host, transport);
        let permission = ScreenSharePermission::new(ctx);
        permission.handle_request("req-1", "user-7", "Bob", 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(permission.pending_requests().is_empty());
        assert!(!permission.approve("req-1").await.unwrap());
    }
}
