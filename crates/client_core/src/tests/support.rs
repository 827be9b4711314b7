//! Fake collaborators shared by the session and controller tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{MessageId, MessageKind, RoomId},
    protocol::{parse_timestamp, MessagePayload},
};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{
    channel_session::{
        ChannelConnection, ChannelConnector, ChannelEventHandler, ChannelTransport, RoomEvent,
        SubscriptionHandle, TransportEvent,
    },
    error::{ClientError, ClientResult},
    rest::HistoryProvider,
};

pub const TEST_SUBSCRIPTION: &str = "sub-0";

pub fn payload(id: Option<i64>, author: &str, content: &str, second: u32) -> MessagePayload {
    MessagePayload {
        message_id: id.map(MessageId),
        username: author.to_string(),
        content: content.to_string(),
        timestamp: parse_timestamp(&format!("2024-01-01T00:00:{second:02}Z")),
        kind: MessageKind::Created,
        edited: false,
    }
}

pub fn event_body(message: &MessagePayload, kind: MessageKind) -> String {
    let mut message = message.clone();
    message.kind = kind;
    serde_json::to_string(&message).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Ok,
    AuthRejected,
    Unreachable,
    SubscribeFails,
}

#[derive(Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    max_live: AtomicUsize,
}

impl LiveCounter {
    fn subscribed(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn unsubscribed(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

pub struct FakeTransport {
    pub calls: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, String)>>,
    fail_subscribe: bool,
    counter: Arc<LiveCounter>,
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn subscribe(&self, topic: &str) -> ClientResult<SubscriptionHandle> {
        self.calls.lock().await.push(format!("subscribe:{topic}"));
        if self.fail_subscribe {
            return Err(ClientError::Transport("subscription refused".to_string()));
        }
        self.counter.subscribed();
        Ok(SubscriptionHandle {
            id: TEST_SUBSCRIPTION.to_string(),
            topic: topic.to_string(),
        })
    }

    async fn unsubscribe(&self, subscription: &SubscriptionHandle) -> ClientResult<()> {
        self.calls
            .lock()
            .await
            .push(format!("unsubscribe:{}", subscription.topic));
        self.counter.unsubscribed();
        Ok(())
    }

    async fn publish(&self, destination: &str, body: String) -> ClientResult<()> {
        self.published
            .lock()
            .await
            .push((destination.to_string(), body));
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.calls.lock().await.push("disconnect".to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeConnection {
    pub auth_token: String,
    pub transport: Arc<FakeTransport>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeConnection {
    pub fn deliver(&self, body: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Message {
            subscription_id: TEST_SUBSCRIPTION.to_string(),
            destination: "/topic/rooms/test".to_string(),
            body: body.into(),
        });
    }

    pub async fn calls(&self) -> Vec<String> {
        self.transport.calls.lock().await.clone()
    }
}

pub struct FakeConnector {
    mode: Mutex<ConnectMode>,
    pub counter: Arc<LiveCounter>,
    connections: Mutex<Vec<FakeConnection>>,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            counter: Arc::new(LiveCounter::default()),
            connections: Mutex::new(Vec::new()),
            gates: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Holds the next handshake until the returned sender fires. The sender
    /// reports closed once that handshake is abandoned.
    pub async fn gate_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().await.push_back(rx);
        tx
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock().await = mode;
    }

    pub async fn connection(&self, index: usize) -> Option<FakeConnection> {
        self.connections.lock().await.get(index).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn latest(&self) -> Option<FakeConnection> {
        self.connections.lock().await.last().cloned()
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(&self, auth_token: &str) -> ClientResult<ChannelConnection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().await.pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let mode = *self.mode.lock().await;
        match mode {
            ConnectMode::AuthRejected => {
                return Err(ClientError::AuthRejected("token refused".to_string()))
            }
            ConnectMode::Unreachable => {
                return Err(ClientError::Transport("connection refused".to_string()))
            }
            ConnectMode::Ok | ConnectMode::SubscribeFails => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(FakeTransport {
            calls: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            fail_subscribe: mode == ConnectMode::SubscribeFails,
            counter: Arc::clone(&self.counter),
        });
        self.connections.lock().await.push(FakeConnection {
            auth_token: auth_token.to_string(),
            transport: Arc::clone(&transport),
            inbound: tx,
        });
        Ok(ChannelConnection {
            transport,
            inbound: rx,
        })
    }
}

pub struct RecordingHandler {
    events: mpsc::UnboundedSender<RoomEvent>,
    errors: mpsc::UnboundedSender<String>,
}

impl RecordingHandler {
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<RoomEvent>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (errors, errors_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events, errors }), events_rx, errors_rx)
    }
}

#[async_trait]
impl ChannelEventHandler for RecordingHandler {
    async fn on_event(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    async fn on_error(&self, error: &ClientError) {
        let _ = self.errors.send(error.to_string());
    }
}

enum HistoryReply {
    Ready(ClientResult<Vec<MessagePayload>>),
    Gated(oneshot::Receiver<ClientResult<Vec<MessagePayload>>>),
}

/// History source whose per-room responses are scripted up front; a gated
/// room blocks until the test releases it.
#[derive(Default)]
pub struct ScriptedHistory {
    replies: Mutex<HashMap<RoomId, HistoryReply>>,
    pub requests: Mutex<Vec<(RoomId, String)>>,
}

impl ScriptedHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn ready(&self, room_id: RoomId, history: Vec<MessagePayload>) {
        self.replies
            .lock()
            .await
            .insert(room_id, HistoryReply::Ready(Ok(history)));
    }

    pub async fn failing(&self, room_id: RoomId, error: ClientError) {
        self.replies
            .lock()
            .await
            .insert(room_id, HistoryReply::Ready(Err(error)));
    }

    pub async fn gated(
        &self,
        room_id: RoomId,
    ) -> oneshot::Sender<ClientResult<Vec<MessagePayload>>> {
        let (tx, rx) = oneshot::channel();
        self.replies
            .lock()
            .await
            .insert(room_id, HistoryReply::Gated(rx));
        tx
    }
}

#[async_trait]
impl HistoryProvider for ScriptedHistory {
    async fn fetch_history(
        &self,
        room_id: RoomId,
        auth_token: &str,
    ) -> ClientResult<Vec<MessagePayload>> {
        self.requests
            .lock()
            .await
            .push((room_id, auth_token.to_string()));
        let reply = self.replies.lock().await.remove(&room_id);
        match reply {
            Some(HistoryReply::Ready(result)) => result,
            Some(HistoryReply::Gated(rx)) => rx.await.unwrap_or_else(|_| {
                Err(ClientError::HistoryUnavailable("gate dropped".to_string()))
            }),
            None => Ok(Vec::new()),
        }
    }
}

pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for value")
        .expect("channel closed")
}
