//! Typed messages with a string key/value payload.
//!
//! Every message exchanged with participants carries a [`MessageType`] tag
//! and a flat map from string key to string value. The transport decides
//! how these are encoded on the wire; the JSON shape produced by the serde
//! derives is `{"type": "...", "payload": {...}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::MessageType;

/// Message payload: string keys to string values.
pub type Payload = BTreeMap<String, String>;

/// Well-known payload keys.
pub mod keys {
    /// Participant name, as declared in the mission descriptor.
    pub const AGENT_NAME: &str = "agentname";
    /// Session user the participant is connected as.
    pub const USERNAME: &str = "username";
    /// Free-form failure detail on bail and abort messages.
    pub const MESSAGE: &str = "message";
    /// Status line text.
    pub const TEXT: &str = "text";
    /// Status line category, used by clients to pick a display slot.
    pub const CATEGORY: &str = "category";
    /// Reason the running phase ended.
    pub const QUIT_CODE: &str = "quit_code";
}

/// A typed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Key/value payload.
    #[serde(default)]
    pub payload: Payload,
}

impl Message {
    /// Create a message with an empty payload.
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: BTreeMap::new(),
        }
    }

    /// Add a key/value pair, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    /// Look up a payload value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}
