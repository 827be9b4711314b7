use shared::error::ApiError;
use thiserror::Error;

use crate::{channel_session::SessionStatus, identity::DisplayIdentity};

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("credentials rejected: {0}")]
    AuthRejected(String),
    #[error("room history unavailable: {0}")]
    HistoryUnavailable(String),
    #[error("channel handshake failed: {0}")]
    ChannelHandshakeFailed(String),
    #[error("no cached message matches {0}")]
    ReconciliationMiss(DisplayIdentity),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("no subscribed room session")]
    NotConnected,
    #[error("channel open cancelled by a newer room switch")]
    OpenCancelled,
    #[error("channel session is {actual:?}, expected {expected:?}")]
    InvalidSessionState {
        expected: SessionStatus,
        actual: SessionStatus,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Errors that need the user to sign in again rather than reselect a room.
    pub fn requires_reauth(&self) -> bool {
        match self {
            ClientError::AuthRejected(_) => true,
            ClientError::Api(api) => api.code.is_auth_failure(),
            _ => false,
        }
    }
}

/// STOMP brokers report auth failures as free text in an ERROR frame.
pub(crate) fn is_auth_failure_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("access denied")
        || lower.contains("invalid token")
        || lower.contains("expired")
}
