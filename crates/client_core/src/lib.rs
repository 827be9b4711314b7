//! Room session and message reconciliation for the chat client.
//!
//! [`RoomController`] owns the active room. It fetches history over REST,
//! seeds a [`MessageCache`], then holds exactly one [`ChannelSession`] on the
//! room's broker topic and folds live events into the cache.

pub mod channel_session;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message_cache;
pub mod renderer;
pub mod rest;
pub mod stomp;

pub use channel_session::{
    decode_room_event, ChannelConnection, ChannelConnector, ChannelEventHandler, ChannelSession,
    ChannelTransport, RoomEvent, SessionStatus, SubscriptionHandle, TransportEvent,
};
pub use config::ClientSettings;
pub use controller::{RoomController, SessionContext, SwitchOutcome};
pub use error::{ClientError, ClientResult};
pub use identity::{resolve, DisplayIdentity};
pub use message_cache::{CacheChange, CachedMessage, IgnoreReason, MessageCache};
pub use renderer::{BroadcastRenderer, PlaceholderKind, RenderCommand, RoomRenderer};
pub use rest::{HistoryProvider, RestClient};
pub use stomp::{StompConnector, StompFrame};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
