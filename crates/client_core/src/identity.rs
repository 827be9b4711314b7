use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use shared::{
    domain::MessageId,
    protocol::{format_timestamp, MessagePayload},
};

use crate::error::{ClientError, ClientResult};

/// Display identity of a message within the active room.
///
/// `Surrogate` is only used when the server did not assign a durable id. A
/// message first seen under a surrogate is never merged with a later event
/// carrying a durable id for the same logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayIdentity {
    Durable(MessageId),
    Surrogate(DateTime<Utc>),
}

impl DisplayIdentity {
    pub fn durable_id(&self) -> Option<MessageId> {
        match self {
            DisplayIdentity::Durable(id) => Some(*id),
            DisplayIdentity::Surrogate(_) => None,
        }
    }
}

impl fmt::Display for DisplayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayIdentity::Durable(id) => write!(f, "#{}", id.0),
            DisplayIdentity::Surrogate(ts) => write!(f, "@{}", format_timestamp(ts)),
        }
    }
}

// Delete publishes carry the bare identity value.
impl Serialize for DisplayIdentity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            DisplayIdentity::Durable(id) => serializer.serialize_i64(id.0),
            DisplayIdentity::Surrogate(ts) => serializer.serialize_str(&format_timestamp(ts)),
        }
    }
}

pub fn resolve(message: &MessagePayload) -> ClientResult<DisplayIdentity> {
    if let Some(id) = message.message_id {
        return Ok(DisplayIdentity::Durable(id));
    }
    message
        .timestamp
        .map(DisplayIdentity::Surrogate)
        .ok_or_else(|| {
            ClientError::InvalidMessage(format!(
                "message from '{}' has neither a message id nor a timestamp",
                message.username
            ))
        })
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
