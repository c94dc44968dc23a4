use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Username;

/// Discriminant of a [`Message`], as written in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Join,
    Leave,
    UserList,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        Self::Chat,
        Self::Join,
        Self::Leave,
        Self::UserList,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::UserList => "user_list",
            Self::Error => "error",
        }
    }

    /// Only conversation history is kept; presence snapshots and errors are transient.
    pub fn is_persistable(self) -> bool {
        matches!(self, Self::Chat | Self::Join | Self::Leave)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown message kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

/// A message on the wire and in history.
///
/// Internally tagged on `type`; each variant carries exactly the fields that
/// belong to its kind, so nothing else is ever serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "chat")]
    Chat {
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "join")]
    Join {
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "leave")]
    Leave {
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_list")]
    UserList { users: Vec<String> },

    #[serde(rename = "error")]
    Error { error: String },
}

impl Message {
    pub fn chat(username: &Username, content: impl Into<String>) -> Self {
        Self::Chat {
            username: username.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn join(username: &Username) -> Self {
        Self::Join {
            username: username.to_string(),
            content: format!("{username} joined the chat."),
            timestamp: Utc::now(),
        }
    }

    pub fn leave(username: &Username) -> Self {
        Self::Leave {
            username: username.to_string(),
            content: format!("{username} left the chat."),
            timestamp: Utc::now(),
        }
    }

    pub fn user_list<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UserList {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Rebuild a history record. Returns `None` for kinds that are never stored.
    pub fn from_record(
        kind: MessageKind,
        username: String,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        match kind {
            MessageKind::Chat => Some(Self::Chat {
                username,
                content,
                timestamp,
            }),
            MessageKind::Join => Some(Self::Join {
                username,
                content,
                timestamp,
            }),
            MessageKind::Leave => Some(Self::Leave {
                username,
                content,
                timestamp,
            }),
            MessageKind::UserList | MessageKind::Error => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat { .. } => MessageKind::Chat,
            Self::Join { .. } => MessageKind::Join,
            Self::Leave { .. } => MessageKind::Leave,
            Self::UserList { .. } => MessageKind::UserList,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Chat { username, .. }
            | Self::Join { username, .. }
            | Self::Leave { username, .. } => Some(username),
            Self::UserList { .. } | Self::Error { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Chat { content, .. }
            | Self::Join { content, .. }
            | Self::Leave { content, .. } => Some(content),
            Self::UserList { .. } | Self::Error { .. } => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Chat { timestamp, .. }
            | Self::Join { timestamp, .. }
            | Self::Leave { timestamp, .. } => Some(*timestamp),
            Self::UserList { .. } | Self::Error { .. } => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        from_object(raw.as_bytes())
    }
}

/// Derived deserializers also accept a positional JSON array, so anything
/// that is not an object is refused before the typed decode.
fn from_object<T: DeserializeOwned>(raw: &[u8]) -> serde_json::Result<T> {
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(de::Error::custom("expected a JSON object"));
    }
    serde_json::from_value(value)
}

/// What a client is allowed to submit.
///
/// Only `content` is read. Any `type`, `username` or `timestamp` the client
/// sends is ignored; the server stamps those itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub content: String,
}

impl InboundMessage {
    pub fn decode(raw: &[u8]) -> serde_json::Result<Self> {
        from_object(raw)
    }

    /// Canonical chat message for `username`, stamped now.
    pub fn into_chat(self, username: &Username) -> Message {
        Message::chat(username, self.content)
    }
}
