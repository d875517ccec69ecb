//! Chat session manager.
//!
//! Chats deduplicate on the `(user_id, channel, session_id)` natural
//! key; re-sending with the same key touches `updated_at` and appends
//! to the existing chat. Deletion cascades to messages. Everything goes
//! through the state store, so appends are serialized and readers never
//! see a torn chat.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;

use nx_domain::error::{Error, Result};
use nx_domain::state::{ChatMessage, ChatSpec};
use nx_store::StateStore;

pub struct ChatManager {
    store: Arc<StateStore>,
}

impl ChatManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Find the chat with this natural key, or create it. Touches
    /// `updated_at` either way.
    pub fn resolve_or_create(
        &self,
        user_id: &str,
        channel: &str,
        session_id: &str,
    ) -> Result<ChatSpec> {
        self.store.write(|doc| {
            let existing = doc
                .chats
                .values()
                .find(|c| {
                    c.user_id == user_id && c.channel == channel && c.session_id == session_id
                })
                .map(|c| c.id.clone());

            let now = Utc::now();
            match existing {
                Some(id) => {
                    let chat = doc
                        .chats
                        .get_mut(&id)
                        .ok_or_else(|| Error::Internal("chat vanished mid-write".into()))?;
                    // updated_at is monotonically non-decreasing.
                    if now > chat.updated_at {
                        chat.updated_at = now;
                    }
                    Ok(chat.clone())
                }
                None => {
                    let chat = ChatSpec {
                        id: uuid::Uuid::new_v4().to_string(),
                        name: String::new(),
                        session_id: session_id.to_string(),
                        user_id: user_id.to_string(),
                        channel: channel.to_string(),
                        updated_at: now,
                        meta: Map::new(),
                    };
                    doc.messages.entry(chat.id.clone()).or_default();
                    doc.chats.insert(chat.id.clone(), chat.clone());
                    tracing::info!(chat_id = %chat.id, user_id, channel, session_id, "chat created");
                    Ok(chat)
                }
            }
        })
    }

    /// List chats, optionally filtered, ordered `updated_at DESC` with
    /// `id` as tiebreak.
    pub fn list(&self, user_id: Option<&str>, channel: Option<&str>) -> Vec<ChatSpec> {
        let mut chats: Vec<ChatSpec> = self.store.read(|doc| {
            doc.chats
                .values()
                .filter(|c| user_id.map_or(true, |u| c.user_id == u))
                .filter(|c| channel.map_or(true, |ch| c.channel == ch))
                .cloned()
                .collect()
        });
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        chats
    }

    pub fn get(&self, chat_id: &str) -> Result<ChatSpec> {
        self.store
            .read(|doc| doc.chats.get(chat_id).cloned())
            .ok_or_else(|| Error::ChatNotFound(chat_id.to_string()))
    }

    /// Messages of a chat, in insertion order.
    pub fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.store.read(|doc| {
            if !doc.chats.contains_key(chat_id) {
                return Err(Error::ChatNotFound(chat_id.to_string()));
            }
            Ok(doc.messages.get(chat_id).cloned().unwrap_or_default())
        })
    }

    /// Append a batch of messages to a chat in one transaction.
    pub fn append_messages(&self, chat_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
        self.store.write(|doc| {
            let chat = doc
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| Error::ChatNotFound(chat_id.to_string()))?;
            let now = Utc::now();
            if now > chat.updated_at {
                chat.updated_at = now;
            }
            doc.messages.entry(chat_id.to_string()).or_default().extend(messages);
            Ok(())
        })
    }

    /// Irrevocable delete; cascades to messages.
    pub fn delete(&self, chat_id: &str) -> Result<()> {
        self.store.write(|doc| {
            if doc.chats.remove(chat_id).is_none() {
                return Err(Error::ChatNotFound(chat_id.to_string()));
            }
            doc.messages.remove(chat_id);
            Ok(())
        })
    }
}
