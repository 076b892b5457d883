//! Browser-facing chat protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::search::SearchResult;

/// Messages sent by a browser client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Chat {
        text: String,
        /// Display name, informational only
        #[serde(default)]
        user: Option<String>,
    },
    MusicSearch {
        query: String,
    },
    /// Any tag this relay does not know
    #[serde(other)]
    Unknown,
}

/// Messages sent to a browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once, right after the client is registered
    Init { data: InitData },
    /// A gateway frame relayed verbatim
    Gateway {
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bot: Option<BotMessage>,
    },
    MusicResults { data: Vec<SearchResult> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitData {
    pub connected: bool,
    pub server: String,
}

/// A gateway frame rendered as a line from the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotMessage {
    pub text: String,
    #[serde(default)]
    pub error: bool,
}

impl BotMessage {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: false,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: true,
        }
    }
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}
