//! Rebuild the best-known state of a conversation from the history store.
//!
//! Stored tokens are cumulative snapshots: the text of a turn is the content
//! of the highest-indexed `content` token, never the concatenation of all of
//! them. A complete response with `is_complete` set overrides tokens entirely.

use std::sync::Arc;

use chat_core::{CompleteResponse, ConversationStatus, Token};
use serde::Serialize;

use crate::backend::ConversationStore;
use crate::error::Result;

/// Where a recovered state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    CompleteResponse,
    Tokens,
    /// Nothing stored yet.
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub content: String,
    pub suggestions: Vec<String>,
    pub auto_fill_data: Option<serde_json::Value>,
    pub stage_complete: bool,
    pub context: Option<serde_json::Value>,
    pub is_complete: bool,
    /// Highest stored token index seen, used as the resume point.
    pub last_token_index: Option<u64>,
    pub source: RecoverySource,
    pub error: Option<String>,
}

impl RecoveryResult {
    fn empty() -> Self {
        Self {
            success: true,
            content: String::new(),
            suggestions: Vec::new(),
            auto_fill_data: None,
            stage_complete: false,
            context: None,
            is_complete: false,
            last_token_index: None,
            source: RecoverySource::Empty,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            source: RecoverySource::Failed,
            error: Some(error),
            ..Self::empty()
        }
    }

    fn from_complete_response(response: CompleteResponse) -> Self {
        Self {
            content: response.full_content,
            suggestions: response.suggestions,
            auto_fill_data: response.auto_fill_data,
            stage_complete: response.stage_complete,
            context: response.context,
            is_complete: true,
            source: RecoverySource::CompleteResponse,
            ..Self::empty()
        }
    }

    /// True when something was recovered, complete or partial.
    pub fn has_content(&self) -> bool {
        self.success && self.source != RecoverySource::Empty
    }
}

/// Pick the content of the latest snapshot. Input order is irrelevant.
pub fn latest_content(tokens: &[Token]) -> Option<&Token> {
    let mut content: Vec<&Token> = tokens.iter().filter(|token| token.is_content()).collect();
    content.sort_by_key(|token| token.token_index);

    for pair in content.windows(2) {
        if pair[1].token_index - pair[0].token_index > 1 {
            log::debug!(
                "Token index gap between {} and {}",
                pair[0].token_index,
                pair[1].token_index
            );
        }
    }

    content.last().copied()
}

#[derive(Clone)]
pub struct RecoveryManager {
    store: Arc<dyn ConversationStore>,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Reconstruct the latest known state of `conversation_id`.
    ///
    /// Store failures never propagate; they come back as `success: false` so
    /// the caller can decide to start over.
    pub async fn recover_conversation(&self, conversation_id: &str) -> RecoveryResult {
        match self.try_recover(conversation_id).await {
            Ok(result) => {
                log::info!(
                    "[{}] Recovered {:?} state ({} chars, complete: {})",
                    conversation_id,
                    result.source,
                    result.content.len(),
                    result.is_complete
                );
                result
            }
            Err(err) => {
                log::warn!("[{}] Recovery failed: {}", conversation_id, err);
                RecoveryResult::failed(err.to_string())
            }
        }
    }

    async fn try_recover(&self, conversation_id: &str) -> Result<RecoveryResult> {
        if let Some(response) = self.store.complete_response(conversation_id).await? {
            if response.is_complete {
                return Ok(RecoveryResult::from_complete_response(response));
            }
            log::debug!(
                "[{}] Ignoring stored response that is not complete",
                conversation_id
            );
        }

        let tokens = self.store.tokens(conversation_id, None).await?;
        let last_token_index = tokens.iter().map(|token| token.token_index).max();

        let Some(latest) = latest_content(&tokens) else {
            return Ok(RecoveryResult {
                last_token_index,
                ..RecoveryResult::empty()
            });
        };

        Ok(RecoveryResult {
            content: latest.token_content.clone(),
            last_token_index,
            source: RecoverySource::Tokens,
            ..RecoveryResult::empty()
        })
    }

    /// Whether the backend still considers the conversation in progress.
    /// Lookup failures count as "no".
    pub async fn needs_recovery(&self, conversation_id: &str) -> bool {
        match self.conversation_status(conversation_id).await {
            Ok(status) => status.is_resumable(),
            Err(err) => {
                log::warn!(
                    "[{}] Could not read conversation status: {}",
                    conversation_id,
                    err
                );
                false
            }
        }
    }

    pub async fn conversation_status(&self, conversation_id: &str) -> Result<ConversationStatus> {
        Ok(self.store.conversation(conversation_id).await?.status)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use chat_core::TokenType;

    fn token(index: u64, content: &str, token_type: TokenType) -> Token {
        Token {
            token_index: index,
            token_content: content.to_string(),
            token_type,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn latest_content_sorts_before_selecting() {
        let tokens = vec![
            token(2, "Hello world!", TokenType::Content),
            token(0, "Hello", TokenType::Content),
            token(3, "{tool call}", TokenType::Other),
            token(1, "Hello world", TokenType::Content),
        ];
        let latest = latest_content(&tokens).unwrap();
        assert_eq!(latest.token_index, 2);
        assert_eq!(latest.token_content, "Hello world!");
    }

    #[test]
    fn latest_content_handles_largest_index() {
        let tokens = vec![
            token(u64::MAX, "last", TokenType::Content),
            token(u64::MAX - 1, "almost", TokenType::Content),
            token(3, "early", TokenType::Content),
        ];
        let latest = latest_content(&tokens).unwrap();
        assert_eq!(latest.token_index, u64::MAX);
        assert_eq!(latest.token_content, "last");
    }

    #[test]
    fn latest_content_ignores_non_content_tokens() {
        let tokens = vec![token(0, "thinking", TokenType::Other)];
        assert!(latest_content(&tokens).is_none());
    }

    #[test]
    fn failed_result_is_not_fatal_shape() {
        let result = RecoveryResult::failed("store offline".to_string());
        assert!(!result.success);
        assert!(!result.has_content());
        assert_eq!(result.error.as_deref(), Some("store offline"));
        assert!(result.content.is_empty());
    }
}
