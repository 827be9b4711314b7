use std::sync::{Arc, Weak};

use async_trait::async_trait;
use shared::{
    domain::{chat_destination, ChatOperation, MessageId, RoomId},
    protocol::{EditMessagePayload, SendMessagePayload},
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    channel_session::{
        ChannelConnector, ChannelEventHandler, ChannelSession, RoomEvent, SessionStatus,
    },
    error::{ClientError, ClientResult},
    identity::DisplayIdentity,
    message_cache::{CacheChange, CachedMessage, MessageCache},
    renderer::{PlaceholderKind, RoomRenderer},
    rest::HistoryProvider,
};

/// Who is signed in and where. Passed in explicitly so nothing reads
/// ambient globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub server_url: String,
    pub auth_token: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The room was already active with a subscribed session.
    AlreadyActive,
    Switched,
    /// A later switch took ownership before this one finished.
    Superseded,
}

struct ControllerState {
    active_room: Option<RoomId>,
    active_token: u64,
    cache: MessageCache,
    // Status of the session currently in the slot, readable without the slot lock.
    live: Option<(RoomId, watch::Receiver<SessionStatus>)>,
}

/// Owns the active room: its message cache, its single channel session and
/// the render target both feed.
pub struct RoomController {
    context: SessionContext,
    history: Arc<dyn HistoryProvider>,
    connector: Arc<dyn ChannelConnector>,
    renderer: Arc<dyn RoomRenderer>,
    switch_seq: watch::Sender<u64>,
    inner: Mutex<ControllerState>,
    // Held across close and open so two sessions are never live together. An
    // open holding it is cancelled as soon as a newer switch token is issued.
    session: Mutex<Option<ChannelSession>>,
}

impl RoomController {
    pub fn new(
        context: SessionContext,
        history: Arc<dyn HistoryProvider>,
        connector: Arc<dyn ChannelConnector>,
        renderer: Arc<dyn RoomRenderer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            history,
            connector,
            renderer,
            switch_seq: watch::Sender::new(0),
            inner: Mutex::new(ControllerState {
                active_room: None,
                active_token: 0,
                cache: MessageCache::new(),
                live: None,
            }),
            session: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    fn is_current(&self, token: u64) -> bool {
        *self.switch_seq.borrow() == token
    }

    fn next_token(&self) -> u64 {
        let mut token = 0;
        self.switch_seq.send_modify(|seq| {
            *seq += 1;
            token = *seq;
        });
        token
    }

    /// Resolves once a token newer than `token` has been issued.
    fn superseded_signal(&self, token: u64) -> impl std::future::Future<Output = ()> + Send {
        let mut seq = self.switch_seq.subscribe();
        async move {
            let _ = seq.wait_for(|latest| *latest != token).await;
        }
    }

    /// Makes `room_id` the active room. The most recent call wins: an
    /// earlier call still in flight returns [`SwitchOutcome::Superseded`]
    /// and leaves the cache and renderer alone.
    pub async fn switch_room(self: &Arc<Self>, room_id: RoomId) -> ClientResult<SwitchOutcome> {
        let Some(token) = self.begin_switch(room_id).await else {
            debug!(room_id = room_id.0, "controller: room already active");
            return Ok(SwitchOutcome::AlreadyActive);
        };
        info!(room_id = room_id.0, switch_token = token, "controller: switching room");

        {
            let mut slot = self.session.lock().await;
            if !self.is_current(token) {
                return Ok(self.superseded(token, room_id));
            }
            if let Some(mut previous) = slot.take() {
                self.inner.lock().await.live = None;
                previous.close().await;
            }
        }

        if !self.claim_room(token, room_id).await {
            return Ok(self.superseded(token, room_id));
        }

        let history = self
            .history
            .fetch_history(room_id, &self.context.auth_token)
            .await;
        {
            let mut state = self.inner.lock().await;
            if !self.is_current(token) {
                return Ok(self.superseded(token, room_id));
            }
            match history {
                Ok(messages) => {
                    let kept = state.cache.seed(messages);
                    for message in state.cache.entries() {
                        self.renderer.insert(message);
                    }
                    if kept == 0 {
                        self.renderer.show_placeholder(PlaceholderKind::EmptyRoom);
                    }
                    info!(
                        room_id = room_id.0,
                        switch_token = token,
                        messages = kept,
                        "controller: history seeded"
                    );
                }
                Err(err) if err.requires_reauth() => {
                    warn!(room_id = room_id.0, "controller: history rejected credentials: {err}");
                    self.renderer.show_placeholder(PlaceholderKind::AuthRejected);
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        room_id = room_id.0,
                        "controller: history unavailable, continuing live only: {err}"
                    );
                    self.renderer
                        .show_placeholder(PlaceholderKind::HistoryUnavailable);
                }
            }
        }

        let mut slot = self.session.lock().await;
        if !self.is_current(token) {
            return Ok(self.superseded(token, room_id));
        }
        if let Some(mut stale) = slot.take() {
            self.inner.lock().await.live = None;
            stale.close().await;
        }

        let handler = Arc::new(LiveEventRouter {
            controller: Arc::downgrade(self),
            room_id,
            token,
        });
        let mut session = ChannelSession::new(room_id);
        let opened = session
            .open_until(
                self.connector.as_ref(),
                &self.context.auth_token,
                handler,
                self.superseded_signal(token),
            )
            .await;
        if matches!(opened, Err(ClientError::OpenCancelled)) || !self.is_current(token) {
            session.close().await;
            return Ok(self.superseded(token, room_id));
        }
        self.inner.lock().await.live = Some((room_id, session.watch_status()));
        *slot = Some(session);
        drop(slot);
        opened?;

        info!(room_id = room_id.0, switch_token = token, "controller: room active");
        Ok(SwitchOutcome::Switched)
    }

    /// Issues a new switch token unless `room_id` is already active, fully
    /// subscribed, and no other switch is pending. Never waits on the session
    /// slot, so it cannot be held up by an in-flight handshake.
    async fn begin_switch(&self, room_id: RoomId) -> Option<u64> {
        let state = self.inner.lock().await;
        let settled = *self.switch_seq.borrow() == state.active_token;
        let subscribed = state.live.as_ref().is_some_and(|(live_room, status)| {
            *live_room == room_id && *status.borrow() == SessionStatus::Subscribed
        });
        if settled && subscribed && state.active_room == Some(room_id) {
            return None;
        }
        Some(self.next_token())
    }

    async fn claim_room(&self, token: u64, room_id: RoomId) -> bool {
        let mut state = self.inner.lock().await;
        if !self.is_current(token) {
            return false;
        }
        state.active_room = Some(room_id);
        state.active_token = token;
        state.cache.clear();
        self.renderer.clear();
        self.renderer.show_placeholder(PlaceholderKind::Loading);
        true
    }

    fn superseded(&self, token: u64, room_id: RoomId) -> SwitchOutcome {
        info!(
            room_id = room_id.0,
            switch_token = token,
            latest_token = *self.switch_seq.borrow(),
            "controller: switch superseded"
        );
        SwitchOutcome::Superseded
    }

    async fn apply_live_event(&self, token: u64, event: RoomEvent) {
        let mut state = self.inner.lock().await;
        if !self.is_current(token) || state.active_room != Some(event.room_id) {
            debug!(
                room_id = event.room_id.0,
                switch_token = token,
                "controller: dropping event for inactive room"
            );
            return;
        }
        match state.cache.apply(&event.message, event.kind) {
            Ok(CacheChange::Inserted { message, .. }) => self.renderer.insert(&message),
            Ok(CacheChange::Updated { identity, content }) => {
                self.renderer.update(&identity, &content)
            }
            Ok(CacheChange::Removed { identity }) => self.renderer.remove(&identity),
            Ok(CacheChange::Ignored(reason)) => match reason.into_error() {
                Some(miss) => debug!(room_id = event.room_id.0, "controller: event ignored: {miss}"),
                None => debug!(room_id = event.room_id.0, ?reason, "controller: event ignored"),
            },
            Err(err) => warn!(room_id = event.room_id.0, "controller: dropping event: {err}"),
        }
    }

    async fn report_channel_error(&self, token: u64, room_id: RoomId, error: &ClientError) {
        let state = self.inner.lock().await;
        if !self.is_current(token) || state.active_room != Some(room_id) {
            return;
        }
        warn!(room_id = room_id.0, switch_token = token, "controller: channel error: {error}");
        self.renderer.show_placeholder(if error.requires_reauth() {
            PlaceholderKind::AuthRejected
        } else {
            PlaceholderKind::ConnectionFailed
        });
    }

    pub async fn send_message(&self, content: &str) -> ClientResult<()> {
        let content = non_empty(content)?;
        let body = serde_json::to_string(&SendMessagePayload { content })?;
        self.publish(ChatOperation::SendMessage, body).await
    }

    pub async fn edit_message(&self, message_id: MessageId, new_content: &str) -> ClientResult<()> {
        let new_content = non_empty(new_content)?;
        let body = serde_json::to_string(&EditMessagePayload {
            message_id,
            new_content,
        })?;
        self.publish(ChatOperation::EditMessage, body).await
    }

    pub async fn delete_message(&self, identity: DisplayIdentity) -> ClientResult<()> {
        let body = serde_json::to_string(&identity)?;
        self.publish(ChatOperation::DeleteMessage, body).await
    }

    /// Publishes leave the cache untouched; the broker echoes the
    /// authoritative event back on the room topic.
    async fn publish(&self, operation: ChatOperation, body: String) -> ClientResult<()> {
        let (room_id, transport) = {
            let slot = self.session.lock().await;
            let session = slot.as_ref().ok_or(ClientError::NotConnected)?;
            (session.room_id(), session.live_transport()?)
        };
        transport
            .publish(&chat_destination(room_id, operation), body)
            .await?;
        debug!(
            room_id = room_id.0,
            operation = operation.as_str(),
            "controller: published"
        );
        Ok(())
    }

    /// Tears down the active room, e.g. on logout. Any switch still in
    /// flight is superseded.
    pub async fn leave(&self) {
        let token = self.next_token();
        let mut slot = self.session.lock().await;
        if !self.is_current(token) {
            return;
        }
        if let Some(mut session) = slot.take() {
            session.close().await;
        }
        let mut state = self.inner.lock().await;
        if !self.is_current(token) {
            return;
        }
        state.live = None;
        let left = state.active_room.take();
        state.active_token = token;
        state.cache.clear();
        self.renderer.clear();
        if let Some(room_id) = left {
            info!(room_id = room_id.0, switch_token = token, "controller: left room");
        }
    }

    pub async fn active_room(&self) -> Option<RoomId> {
        self.inner.lock().await.active_room
    }

    pub async fn session_status(&self) -> SessionStatus {
        self.inner
            .lock()
            .await
            .live
            .as_ref()
            .map(|(_, status)| *status.borrow())
            .unwrap_or(SessionStatus::Idle)
    }

    pub async fn snapshot(&self) -> Vec<CachedMessage> {
        self.inner.lock().await.cache.entries().to_vec()
    }
}

fn non_empty(content: &str) -> ClientResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ClientError::Validation(
            "message content must not be empty".to_string(),
        ));
    }
    Ok(content.to_string())
}

/// Routes one session's events into the controller, tagged with the switch
/// token that opened it.
struct LiveEventRouter {
    controller: Weak<RoomController>,
    room_id: RoomId,
    token: u64,
}

#[async_trait]
impl ChannelEventHandler for LiveEventRouter {
    async fn on_event(&self, event: RoomEvent) {
        if let Some(controller) = self.controller.upgrade() {
            controller.apply_live_event(self.token, event).await;
        }
    }

    async fn on_error(&self, error: &ClientError) {
        if let Some(controller) = self.controller.upgrade() {
            controller
                .report_channel_error(self.token, self.room_id, error)
                .await;
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
