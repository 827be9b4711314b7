use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, MessageKind},
    protocol::MessagePayload,
};
use tracing::{debug, warn};

use crate::{
    error::{ClientError, ClientResult},
    identity::{resolve, DisplayIdentity},
};

/// A message as currently displayed for the active room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub identity: DisplayIdentity,
    pub durable_id: Option<MessageId>,
    pub author: String,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub edited: bool,
}

impl CachedMessage {
    fn from_payload(identity: DisplayIdentity, payload: &MessagePayload, edited: bool) -> Self {
        Self {
            identity,
            durable_id: payload.message_id,
            author: payload.username.clone(),
            content: payload.content.clone(),
            sent_at: payload.timestamp,
            edited,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateDelivery(DisplayIdentity),
    ReconciliationMiss(DisplayIdentity),
}

impl IgnoreReason {
    /// Misses map to [`ClientError::ReconciliationMiss`] for diagnostics;
    /// duplicate deliveries are not errors.
    pub fn into_error(self) -> Option<ClientError> {
        match self {
            IgnoreReason::DuplicateDelivery(_) => None,
            IgnoreReason::ReconciliationMiss(identity) => {
                Some(ClientError::ReconciliationMiss(identity))
            }
        }
    }
}

/// The effect of a single [`MessageCache::apply`] call, scoped to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Inserted {
        index: usize,
        message: CachedMessage,
    },
    Updated {
        identity: DisplayIdentity,
        content: String,
    },
    Removed {
        identity: DisplayIdentity,
    },
    Ignored(IgnoreReason),
}

/// Ordered store of the active room's displayed messages, indexed by
/// resolved identity. No two entries ever share an identity.
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: Vec<CachedMessage>,
    index: HashMap<DisplayIdentity, usize>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every entry with `history`, kept in server order.
    ///
    /// Entries that cannot be resolved, or repeat an identity already seeded,
    /// are dropped. Returns how many entries were kept.
    pub fn seed(&mut self, history: Vec<MessagePayload>) -> usize {
        self.clear();
        for payload in history {
            let identity = match resolve(&payload) {
                Ok(identity) => identity,
                Err(err) => {
                    warn!("cache: dropping history entry: {err}");
                    continue;
                }
            };
            if self.index.contains_key(&identity) {
                debug!(%identity, "cache: duplicate identity in history");
                continue;
            }
            self.push(CachedMessage::from_payload(identity, &payload, payload.edited));
        }
        self.entries.len()
    }

    pub fn apply(&mut self, event: &MessagePayload, kind: MessageKind) -> ClientResult<CacheChange> {
        let identity = resolve(event)?;
        let change = match kind {
            MessageKind::Created => self.insert(identity, event, event.edited),
            MessageKind::Edited => match self.index.get(&identity).copied() {
                Some(position) => {
                    let entry = &mut self.entries[position];
                    entry.content = event.content.clone();
                    entry.edited = true;
                    CacheChange::Updated {
                        identity,
                        content: entry.content.clone(),
                    }
                }
                None => {
                    debug!(%identity, "cache: edit for unseen message, inserting");
                    self.insert(identity, event, true)
                }
            },
            MessageKind::Deleted => match self.index.remove(&identity) {
                Some(position) => {
                    self.entries.remove(position);
                    self.reindex_from(position);
                    CacheChange::Removed { identity }
                }
                None => {
                    debug!(%identity, "cache: delete for unknown message");
                    CacheChange::Ignored(IgnoreReason::ReconciliationMiss(identity))
                }
            },
        };
        Ok(change)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn get(&self, identity: &DisplayIdentity) -> Option<&CachedMessage> {
        self.index
            .get(identity)
            .and_then(|position| self.entries.get(*position))
    }

    pub fn contains(&self, identity: &DisplayIdentity) -> bool {
        self.index.contains_key(identity)
    }

    pub fn entries(&self) -> &[CachedMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(
        &mut self,
        identity: DisplayIdentity,
        payload: &MessagePayload,
        edited: bool,
    ) -> CacheChange {
        if self.index.contains_key(&identity) {
            return CacheChange::Ignored(IgnoreReason::DuplicateDelivery(identity));
        }
        let message = CachedMessage::from_payload(identity, payload, edited);
        let index = self.push(message.clone());
        CacheChange::Inserted { index, message }
    }

    fn push(&mut self, message: CachedMessage) -> usize {
        let position = self.entries.len();
        self.index.insert(message.identity, position);
        self.entries.push(message);
        position
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.identity, position);
        }
    }
}

#[cfg(test)]
#[path = "tests/message_cache_tests.rs"]
mod tests;
