use tokio::sync::broadcast;

use crate::{identity::DisplayIdentity, message_cache::CachedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
    Loading,
    EmptyRoom,
    HistoryUnavailable,
    ConnectionFailed,
    AuthRejected,
}

/// Render target for the active room's message view.
///
/// Calls arrive in the order cache mutations happen; implementations must not
/// reorder them. A placeholder stays visible until the next `insert` or `clear`.
pub trait RoomRenderer: Send + Sync {
    fn insert(&self, message: &CachedMessage);
    fn update(&self, identity: &DisplayIdentity, content: &str);
    fn remove(&self, identity: &DisplayIdentity);
    fn clear(&self);
    fn show_placeholder(&self, kind: PlaceholderKind);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCommand {
    Insert(CachedMessage),
    Update {
        identity: DisplayIdentity,
        content: String,
    },
    Remove(DisplayIdentity),
    Clear,
    Placeholder(PlaceholderKind),
}

/// Forwards every render call as a [`RenderCommand`] to broadcast subscribers.
pub struct BroadcastRenderer {
    commands: broadcast::Sender<RenderCommand>,
}

impl BroadcastRenderer {
    pub fn new(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity.max(1));
        Self { commands }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenderCommand> {
        self.commands.subscribe()
    }

    fn emit(&self, command: RenderCommand) {
        let _ = self.commands.send(command);
    }
}

impl Default for BroadcastRenderer {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RoomRenderer for BroadcastRenderer {
    fn insert(&self, message: &CachedMessage) {
        self.emit(RenderCommand::Insert(message.clone()));
    }

    fn update(&self, identity: &DisplayIdentity, content: &str) {
        self.emit(RenderCommand::Update {
            identity: *identity,
            content: content.to_string(),
        });
    }

    fn remove(&self, identity: &DisplayIdentity) {
        self.emit(RenderCommand::Remove(*identity));
    }

    fn clear(&self) {
        self.emit(RenderCommand::Clear);
    }

    fn show_placeholder(&self, kind: PlaceholderKind) {
        self.emit(RenderCommand::Placeholder(kind));
    }
}
