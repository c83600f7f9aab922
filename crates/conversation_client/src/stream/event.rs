use serde::{Deserialize, Serialize};

/// One typed event of the agent response stream.
///
/// `Content` carries the cumulative text produced so far. Consumers replace
/// their accumulated content with it; it is never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content {
        content: String,
    },

    /// Terminal event of a turn.
    Complete {
        #[serde(default)]
        suggestions: Vec<String>,
        #[serde(default, rename = "autoFillData", alias = "auto_fill_data")]
        auto_fill_data: Option<serde_json::Value>,
        #[serde(default, rename = "stageComplete", alias = "stage_complete")]
        stage_complete: bool,
    },

    Error {
        #[serde(alias = "message")]
        error: String,
    },

    /// Keep-alive heartbeat.
    Ping,

    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
