use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(RoomId);
id_newtype!(MessageId);

/// What an inbound channel event does to the message it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Created,
    Edited,
    Deleted,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Created => "created",
            MessageKind::Edited => "edited",
            MessageKind::Deleted => "deleted",
        }
    }
}

/// Publish operations addressed to `chat/{room_id}/{operation}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOperation {
    SendMessage,
    EditMessage,
    DeleteMessage,
}

impl ChatOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatOperation::SendMessage => "sendMessage",
            ChatOperation::EditMessage => "editMessage",
            ChatOperation::DeleteMessage => "deleteMessage",
        }
    }
}

pub fn room_topic(room_id: RoomId) -> String {
    format!("rooms/{}", room_id.0)
}

pub fn chat_destination(room_id: RoomId, operation: ChatOperation) -> String {
    format!("chat/{}/{}", room_id.0, operation.as_str())
}
