use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a persisted token. Only `content` tokens carry response text.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Content,
    #[serde(other)]
    Other,
}

/// An indexed snapshot of a streaming response as stored by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Token {
    /// Increasing per conversation, starting at 0. Gaps are tolerated.
    pub token_index: u64,
    pub token_content: String,
    pub token_type: TokenType,
    pub created_at: DateTime<Utc>,
}

impl Token {
    pub fn is_content(&self) -> bool {
        self.token_type == TokenType::Content
    }
}
