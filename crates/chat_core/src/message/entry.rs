//! Message - One user or assistant turn in the visible history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a history entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
}

/// A single entry of the conversation history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier
    pub id: String,

    /// Text shown for this turn
    pub content: String,

    /// When this entry was created
    pub timestamp: DateTime<Utc>,

    /// Author of the entry
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Follow-up prompts offered with an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,

    /// Structured stage data extracted by the agent
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "auto_fill_data")]
    pub auto_fill_data: Option<serde_json::Value>,

    /// Whether an assistant turn finished streaming
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "is_complete")]
    pub is_complete: Option<bool>,
}

impl Message {
    /// Create a user message stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            message_type: MessageType::User,
            suggestions: None,
            auto_fill_data: None,
            is_complete: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.message_type == MessageType::User
    }
}
