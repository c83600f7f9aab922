use std::time::Duration;

use chat_core::{Config, Message};
use chat_state::ConversationPhase;
use serde::Serialize;

use crate::error::ChatClientError;
use crate::recovery::RecoveryResult;
use crate::retry::RetryPolicy;

const DEFAULT_RESUME_TIMEOUT: Duration = Duration::from_secs(120);

/// Observable client state of one conversation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    /// Latest cumulative text of the current turn.
    pub content: String,
    pub suggestions: Vec<String>,
    pub auto_fill_data: Option<serde_json::Value>,
    pub is_complete: bool,
    pub is_loading: bool,
    pub is_streaming: bool,
    /// User-visible failure of the last turn.
    pub error: Option<String>,
    pub conversation_id: Option<String>,
    pub history_messages: Vec<Message>,
    pub phase: ConversationPhase,
}

impl ConversationState {
    pub(crate) fn reset_transient(&mut self) {
        self.content.clear();
        self.suggestions.clear();
        self.auto_fill_data = None;
        self.is_complete = false;
        self.error = None;
    }

    pub(crate) fn sync_phase(&mut self, phase: &ConversationPhase) {
        self.is_loading = phase.is_loading();
        self.is_streaming = phase.is_streaming();
        self.phase = phase.clone();
    }

    /// Append persisted messages that are not already in the history.
    pub(crate) fn merge_history(&mut self, messages: Vec<Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self
                .history_messages
                .iter()
                .any(|existing| existing.id == message.id)
            {
                continue;
            }
            self.history_messages.push(message);
            added += 1;
        }
        added
    }
}

/// Result of a turn whose stream delivered `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTurn {
    pub conversation_id: String,
    pub content: String,
    pub suggestions: Vec<String>,
    pub auto_fill_data: Option<serde_json::Value>,
    pub stage_complete: bool,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed(CompletedTurn),
    /// Stored state was applied without opening a stream.
    Restored(RecoveryResult),
    /// The history store could not be read. Nothing was applied.
    RecoveryFailed(String),
    /// Superseded or cancelled by the caller. Never surfaced as an error.
    Cancelled,
    Failed(ChatClientError),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stage_id: String,
    /// Sent with conversation creation.
    pub metadata: serde_json::Value,
    pub retry: RetryPolicy,
    pub resume_timeout: Duration,
}

impl SessionConfig {
    pub fn new(stage_id: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            metadata: serde_json::json!({}),
            retry: RetryPolicy::default(),
            resume_timeout: DEFAULT_RESUME_TIMEOUT,
        }
    }

    pub fn from_config(stage_id: impl Into<String>, config: &Config) -> Self {
        Self {
            retry: config.retry.into(),
            resume_timeout: Duration::from_secs(config.resume_timeout_secs),
            ..Self::new(stage_id)
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
