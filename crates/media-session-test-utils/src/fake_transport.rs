//! In-memory room transport.
//!
//! Records every connect, publish, unpublish, subscription change and data
//! send. Tests drive the session by pushing `TransportEvent`s through
//! `emit` and by editing the remote roster.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use media_session::signaling::SignalMessage;
use media_session::transport::{
    LocalParticipantInfo, RemoteParticipantInfo, RoomTransport, SharedTrack, TrackSid,
    TransportError, TransportEvent, TransportEvents, TransportState,
};
use media_session::TrackSource;
use tokio::sync::mpsc;

/// A track as it was at the moment `publish_track` was called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub sid: TrackSid,
    pub track_id: String,
    pub source: TrackSource,
    pub muted_at_publish: bool,
    pub capture_enabled_at_publish: bool,
}

/// One call to `send_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentData {
    pub payload: Vec<u8>,
    pub destinations: Vec<String>,
}

/// Ordered log of mutating calls, used to assert sequencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    Publish(TrackSid),
    Unpublish(TrackSid),
    Disconnect,
}

#[derive(Default)]
struct TransportInner {
    state: Option<TransportState>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    local: Option<LocalParticipantInfo>,
    remote: Vec<RemoteParticipantInfo>,
    tokens: Vec<String>,
    published: Vec<PublishRecord>,
    active_publications: Vec<TrackSid>,
    subscriptions: Vec<(String, TrackSid, bool)>,
    sent: Vec<SentData>,
    calls: Vec<TransportCall>,
    connect_error: Option<TransportError>,
    publish_failures: Vec<TrackSource>,
    data_error: Option<TransportError>,
}

pub struct FakeTransport {
    inner: Mutex<TransportInner>,
    stabilizes: AtomicBool,
    connect_delay: Mutex<Duration>,
    next_sid: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    /// A transport that connects and stabilizes immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(TransportInner::default()),
            stabilizes: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            next_sid: AtomicUsize::new(1),
            disconnects: AtomicUsize::new(0),
        })
    }

    // --- Scripting ---

    pub fn set_local(&self, info: LocalParticipantInfo) {
        self.inner.lock().unwrap().local = Some(info);
    }

    pub fn add_remote(&self, info: RemoteParticipantInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.remote.retain(|p| p.identity != info.identity);
        inner.remote.push(info);
    }

    pub fn remove_remote(&self, identity: &str) {
        self.inner
            .lock()
            .unwrap()
            .remote
            .retain(|p| p.identity != identity);
    }

    /// When false, the state stays `Connecting` after `connect`.
    pub fn set_stabilizes(&self, stabilizes: bool) {
        self.stabilizes.store(stabilizes, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn fail_connect(&self, error: Option<TransportError>) {
        self.inner.lock().unwrap().connect_error = error;
    }

    /// Fail every publish of `source` until cleared.
    pub fn fail_publish(&self, source: TrackSource) {
        self.inner.lock().unwrap().publish_failures.push(source);
    }

    pub fn clear_publish_failures(&self) {
        self.inner.lock().unwrap().publish_failures.clear();
    }

    pub fn fail_data(&self, error: Option<TransportError>) {
        self.inner.lock().unwrap().data_error = error;
    }

    pub fn set_state(&self, state: TransportState) {
        self.inner.lock().unwrap().state = Some(state);
    }

    /// Deliver an SDK event. Returns false when no connection is open.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Deliver a data message as if `sender` had sent it.
    pub fn deliver(&self, sender: &str, message: &SignalMessage) -> bool {
        self.emit(TransportEvent::DataReceived {
            sender_identity: Some(sender.to_string()),
            payload: message.encode().unwrap(),
        })
    }

    /// Close the event stream without a disconnect event.
    pub fn drop_event_stream(&self) {
        self.inner.lock().unwrap().events = None;
    }

    // --- Inspection ---

    pub fn connect_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == TransportCall::Connect)
            .count()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.inner.lock().unwrap().tokens.clone()
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn published_of(&self, source: TrackSource) -> Vec<PublishRecord> {
        self.published()
            .into_iter()
            .filter(|p| p.source == source)
            .collect()
    }

    /// Sids published and not yet unpublished.
    pub fn active_publications(&self) -> Vec<TrackSid> {
        self.inner.lock().unwrap().active_publications.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, TrackSid, bool)> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn sent(&self) -> Vec<SentData> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Decoded data messages with their destinations, oldest first.
    pub fn sent_messages(&self) -> Vec<(SignalMessage, Vec<String>)> {
        self.sent()
            .into_iter()
            .map(|s| (SignalMessage::decode(&s.payload).unwrap(), s.destinations))
            .collect()
    }

    pub fn sent_of_type(&self, message_type: &str) -> Vec<(SignalMessage, Vec<String>)> {
        self.sent_messages()
            .into_iter()
            .filter(|(m, _)| m.message_type() == message_type)
            .collect()
    }
}

#[async_trait]
impl RoomTransport for FakeTransport {
    async fn connect(
        &self,
        _url: &str,
        token: &SecretString,
    ) -> Result<TransportEvents, TransportError> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(TransportCall::Connect);
        if let Some(error) = inner.connect_error.clone() {
            return Err(error);
        }
        inner.tokens.push(token.expose_secret().to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        inner.events = Some(tx);
        inner.state = Some(if self.stabilizes.load(Ordering::SeqCst) {
            TransportState::Connected
        } else {
            TransportState::Connecting
        });
        Ok(rx)
    }

    fn state(&self) -> TransportState {
        self.inner
            .lock()
            .unwrap()
            .state
            .unwrap_or(TransportState::Disconnected)
    }

    fn local_participant(&self) -> Option<LocalParticipantInfo> {
        self.inner.lock().unwrap().local.clone()
    }

    fn remote_participants(&self) -> Vec<RemoteParticipantInfo> {
        self.inner.lock().unwrap().remote.clone()
    }

    async fn publish_track(&self, track: SharedTrack) -> Result<TrackSid, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let source = track.source();
        if inner.publish_failures.contains(&source) {
            return Err(TransportError::Publish(format!(
                "{} publish rejected",
                source.as_str()
            )));
        }
        let sid = format!("TR_{}", self.next_sid.fetch_add(1, Ordering::SeqCst));
        inner.published.push(PublishRecord {
            sid: sid.clone(),
            track_id: track.id(),
            source,
            muted_at_publish: track.is_muted(),
            capture_enabled_at_publish: track.is_capture_enabled(),
        });
        inner.active_publications.push(sid.clone());
        inner.calls.push(TransportCall::Publish(sid.clone()));
        Ok(sid)
    }

    async fn unpublish_track(&self, sid: &str) -> Result<(), TransportError> {
        // Acknowledgement arrives asynchronously.
        tokio::task::yield_now().await;
        let mut inner = self.inner.lock().unwrap();
        inner.active_publications.retain(|s| s != sid);
        inner.calls.push(TransportCall::Unpublish(sid.to_string()));
        Ok(())
    }

    async fn set_subscribed(
        &self,
        identity: &str,
        sid: &str,
        subscribed: bool,
    ) -> Result<(), TransportError> {
        self.inner.lock().unwrap().subscriptions.push((
            identity.to_string(),
            sid.to_string(),
            subscribed,
        ));
        Ok(())
    }

    async fn send_data(
        &self,
        payload: Vec<u8>,
        destinations: &[String],
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.data_error.clone() {
            return Err(error);
        }
        inner.sent.push(SentData {
            payload,
            destinations: destinations.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.events = None;
        inner.state = Some(TransportState::Disconnected);
        inner.active_publications.clear();
        inner.calls.push(TransportCall::Disconnect);
    }
}
