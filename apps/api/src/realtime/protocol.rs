//! Wire format for the real-time channel: JSON text frames `{type, payload?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Close code the server sends when a newer connection for the same user
/// takes over. Clients must not reconnect after it.
pub const SUPERSEDED_CLOSE_CODE: u16 = 4000;
pub const SUPERSEDED_CLOSE_REASON: &str = "superseded";

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate(Authenticate),
    PageChange(PageChange),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticate {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageChange {
    pub page: String,
}

/// Frames the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong,
    Notification(Notification),
    Presence(Presence),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Machine-readable kind, e.g. `batch_completed`.
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: Uuid,
    pub page: String,
}

impl ClientMessage {
    pub fn authenticate(user_id: Uuid) -> Self {
        ClientMessage::Authenticate(Authenticate { user_id })
    }

    pub fn page_change(page: impl Into<String>) -> Self {
        ClientMessage::PageChange(PageChange { page: page.into() })
    }
}
