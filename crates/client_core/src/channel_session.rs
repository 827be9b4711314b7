use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{room_topic, MessageId, MessageKind, RoomId},
    protocol::MessagePayload,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: String,
    pub topic: String,
}

/// Frames a transport hands to its session, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message {
        subscription_id: String,
        destination: String,
        body: String,
    },
    Error(String),
    Closed,
}

pub struct ChannelConnection {
    pub transport: Arc<dyn ChannelTransport>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// One live connection to the message broker. Topics and destinations are
/// given without broker prefixes; the transport adds its own.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> ClientResult<SubscriptionHandle>;
    async fn unsubscribe(&self, subscription: &SubscriptionHandle) -> ClientResult<()>;
    /// Resolves once the frame is handed to the connection. Carries no
    /// application-level result.
    async fn publish(&self, destination: &str, body: String) -> ClientResult<()>;
    async fn disconnect(&self) -> ClientResult<()>;
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, auth_token: &str) -> ClientResult<ChannelConnection>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Subscribed,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub kind: MessageKind,
    pub message: MessagePayload,
}

#[async_trait]
pub trait ChannelEventHandler: Send + Sync {
    async fn on_event(&self, event: RoomEvent);
    async fn on_error(&self, error: &ClientError);
}

/// Lifecycle of a single room subscription: `Idle -> Connecting -> Subscribed
/// -> Closed`, or `Connecting -> Failed` when the handshake does not complete.
pub struct ChannelSession {
    room_id: RoomId,
    status: Arc<watch::Sender<SessionStatus>>,
    transport: Option<Arc<dyn ChannelTransport>>,
    subscription: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
}

impl ChannelSession {
    pub fn new(room_id: RoomId) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            room_id,
            status: Arc::new(status),
            transport: None,
            subscription: None,
            pump: None,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub async fn open(
        &mut self,
        connector: &dyn ChannelConnector,
        auth_token: &str,
        handler: Arc<dyn ChannelEventHandler>,
    ) -> ClientResult<()> {
        self.open_until(connector, auth_token, handler, std::future::pending())
            .await
    }

    /// Like [`ChannelSession::open`], but abandons the handshake once `cancel`
    /// resolves. A cancelled open ends `Closed` with nothing left subscribed,
    /// returns [`ClientError::OpenCancelled`] and does not call `on_error`.
    pub async fn open_until<F>(
        &mut self,
        connector: &dyn ChannelConnector,
        auth_token: &str,
        handler: Arc<dyn ChannelEventHandler>,
        cancel: F,
    ) -> ClientResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let current = self.status();
        if current != SessionStatus::Idle {
            return Err(ClientError::InvalidSessionState {
                expected: SessionStatus::Idle,
                actual: current,
            });
        }
        tokio::pin!(cancel);

        self.status.send_replace(SessionStatus::Connecting);
        info!(room_id = self.room_id.0, "session: connecting");

        let connected = tokio::select! {
            biased;
            () = &mut cancel => None,
            connected = connector.connect(auth_token) => Some(connected),
        };
        let Some(connected) = connected else {
            return Err(self.cancelled(None).await);
        };
        let ChannelConnection { transport, inbound } = match connected {
            Ok(connection) => connection,
            Err(err) => return Err(self.fail(handshake_error(err), handler.as_ref()).await),
        };

        let topic = room_topic(self.room_id);
        let subscribed = tokio::select! {
            biased;
            () = &mut cancel => None,
            subscribed = transport.subscribe(&topic) => Some(subscribed),
        };
        let Some(subscribed) = subscribed else {
            return Err(self.cancelled(Some(transport)).await);
        };
        let subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(err) => {
                if let Err(disconnect_err) = transport.disconnect().await {
                    debug!(
                        room_id = self.room_id.0,
                        "session: disconnect after failed subscribe: {disconnect_err}"
                    );
                }
                return Err(self.fail(handshake_error(err), handler.as_ref()).await);
            }
        };

        self.pump = Some(spawn_event_pump(
            self.room_id,
            subscription.id.clone(),
            inbound,
            handler,
            Arc::clone(&self.status),
        ));
        info!(
            room_id = self.room_id.0,
            subscription_id = %subscription.id,
            "session: subscribed"
        );
        self.transport = Some(transport);
        self.subscription = Some(subscription);
        self.status.send_replace(SessionStatus::Subscribed);
        Ok(())
    }

    /// Unsubscribes and disconnects. Safe to call from any state, any number
    /// of times.
    pub async fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let transport = self.transport.take();
        let subscription = self.subscription.take();
        if transport.is_none() && self.status() == SessionStatus::Closed {
            return;
        }

        if let Some(transport) = transport {
            if let Some(subscription) = subscription {
                if let Err(err) = transport.unsubscribe(&subscription).await {
                    warn!(room_id = self.room_id.0, "session: unsubscribe failed: {err}");
                }
            }
            if let Err(err) = transport.disconnect().await {
                warn!(room_id = self.room_id.0, "session: disconnect failed: {err}");
            }
        }

        self.status.send_replace(SessionStatus::Closed);
        info!(room_id = self.room_id.0, "session: closed");
    }

    /// The transport of a subscribed session, so a caller can send without
    /// holding on to the session itself.
    pub fn live_transport(&self) -> ClientResult<Arc<dyn ChannelTransport>> {
        match (&self.transport, self.status()) {
            (Some(transport), SessionStatus::Subscribed) => Ok(Arc::clone(transport)),
            _ => Err(ClientError::NotConnected),
        }
    }

    pub async fn publish(&self, destination: &str, body: String) -> ClientResult<()> {
        self.live_transport()?.publish(destination, body).await
    }

    async fn cancelled(&mut self, transport: Option<Arc<dyn ChannelTransport>>) -> ClientError {
        if let Some(transport) = transport {
            if let Err(err) = transport.disconnect().await {
                debug!(room_id = self.room_id.0, "session: disconnect after cancel: {err}");
            }
        }
        self.status.send_replace(SessionStatus::Closed);
        info!(room_id = self.room_id.0, "session: open cancelled");
        ClientError::OpenCancelled
    }

    async fn fail(&mut self, error: ClientError, handler: &dyn ChannelEventHandler) -> ClientError {
        warn!(room_id = self.room_id.0, "session: open failed: {error}");
        self.status.send_replace(SessionStatus::Failed);
        handler.on_error(&error).await;
        error
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

fn handshake_error(err: ClientError) -> ClientError {
    match err {
        ClientError::AuthRejected(_) | ClientError::ChannelHandshakeFailed(_) => err,
        other => ClientError::ChannelHandshakeFailed(other.to_string()),
    }
}

fn spawn_event_pump(
    room_id: RoomId,
    subscription_id: String,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    handler: Arc<dyn ChannelEventHandler>,
    status: Arc<watch::Sender<SessionStatus>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message {
                    subscription_id: frame_subscription,
                    destination,
                    body,
                } => {
                    if frame_subscription != subscription_id {
                        debug!(
                            room_id = room_id.0,
                            %destination,
                            "session: frame for foreign subscription"
                        );
                        continue;
                    }
                    match decode_room_event(room_id, &body) {
                        Ok(event) => handler.on_event(event).await,
                        Err(err) => {
                            warn!(room_id = room_id.0, "session: dropping event: {err}");
                        }
                    }
                }
                TransportEvent::Error(message) => {
                    handler.on_error(&ClientError::Transport(message)).await;
                }
                TransportEvent::Closed => break,
            }
        }

        // Reaching here means the broker went away underneath us.
        status.send_replace(SessionStatus::Closed);
        info!(room_id = room_id.0, "session: inbound stream ended");
        handler
            .on_error(&ClientError::Transport(
                "connection closed by broker".to_string(),
            ))
            .await;
    })
}

/// Decodes a room topic frame. A bare numeric body is a delete notice for
/// that durable id; anything else is a message payload whose `kind`
/// defaults to `created`.
pub fn decode_room_event(room_id: RoomId, body: &str) -> ClientResult<RoomEvent> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if let Some(id) = value.as_i64() {
        return Ok(RoomEvent {
            room_id,
            kind: MessageKind::Deleted,
            message: MessagePayload {
                message_id: Some(MessageId(id)),
                ..MessagePayload::default()
            },
        });
    }
    if !value.is_object() {
        return Err(ClientError::InvalidMessage(format!(
            "unexpected room event body: {body}"
        )));
    }
    let message: MessagePayload = serde_json::from_value(value)?;
    Ok(RoomEvent {
        room_id,
        kind: message.kind,
        message,
    })
}

#[cfg(test)]
#[path = "tests/channel_session_tests.rs"]
mod tests;
