use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;

/// Username stamped on every hub-originated presence update.
pub const SYSTEM_USERNAME: &str = "system";

const PRESENCE_TEXT: &str = "online users";

/// Discriminant carried in the `type` field of every envelope.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Chat,
    /// Sent by clients to rename themselves and by the hub for presence snapshots.
    UpdateUsername,
    /// Any `type` this server does not understand, including a missing or
    /// null one. Decoded so the connection survives, then ignored.
    #[default]
    #[serde(other)]
    Unknown,
}

/// One JSON envelope exchanged with a browser client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_users: Option<Vec<String>>,
}

impl Message {
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Chat,
            username: username.into(),
            message: message.into(),
            online_users: None,
        }
    }

    pub fn update_username(username: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UpdateUsername,
            username: username.into(),
            message: String::new(),
            online_users: None,
        }
    }

    /// Builds the snapshot the hub fans out whenever registry membership or a
    /// display name changes.
    pub fn presence(online_users: Vec<String>) -> Self {
        Self {
            kind: MessageKind::UpdateUsername,
            username: SYSTEM_USERNAME.to_string(),
            message: PRESENCE_TEXT.to_string(),
            online_users: Some(online_users),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Unencodable)
    }
}

/// Browsers may send `null` for any field; it reads as the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
