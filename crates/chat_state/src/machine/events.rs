//! Conversation events - Defines events that trigger phase transitions

use serde::{Deserialize, Serialize};

/// Defines the events that can trigger transitions in the FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationEvent {
    // ========== User Events ==========
    /// User sent a new message.
    MessageSubmitted {
        /// Whether a conversation id must be created first.
        needs_conversation: bool,
    },

    /// User cancelled (new message, navigation, unmount).
    Cancelled,

    /// User dismissed the visible error.
    ErrorCleared,

    // ========== Conversation Events ==========
    /// Backend assigned a conversation id.
    ConversationCreated { conversation_id: String },

    /// Conversation creation failed; never retried as a stream error.
    ConversationCreationFailed { error: String },

    // ========== Recovery Events ==========
    /// Started rebuilding persisted state.
    RecoveryStarted,

    /// Recovery finished without reopening a stream.
    RecoveryFinished { is_complete: bool },

    // ========== Stream Events ==========
    /// A response stream was opened for the given attempt.
    StreamOpened { attempt: u32 },

    /// A cumulative `content` event was applied.
    ContentReceived,

    /// The terminal `complete` event was applied.
    CompleteReceived,

    // ========== Error Events ==========
    /// A retryable failure scheduled another attempt.
    RetryScheduled {
        next_attempt: u32,
        delay_ms: u64,
        error: String,
    },

    /// The attempt failed terminally (non-retryable or budget spent).
    AttemptFailed { error: String },
}

impl ConversationEvent {
    /// Check if this event is user-initiated.
    pub fn is_user_event(&self) -> bool {
        matches!(
            self,
            Self::MessageSubmitted { .. } | Self::Cancelled | Self::ErrorCleared
        )
    }

    /// Check if this is an error event.
    pub fn is_error_event(&self) -> bool {
        matches!(
            self,
            Self::ConversationCreationFailed { .. }
                | Self::RetryScheduled { .. }
                | Self::AttemptFailed { .. }
        )
    }

    /// Short name used in logs and transition errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSubmitted { .. } => "message_submitted",
            Self::Cancelled => "cancelled",
            Self::ErrorCleared => "error_cleared",
            Self::ConversationCreated { .. } => "conversation_created",
            Self::ConversationCreationFailed { .. } => "conversation_creation_failed",
            Self::RecoveryStarted => "recovery_started",
            Self::RecoveryFinished { .. } => "recovery_finished",
            Self::StreamOpened { .. } => "stream_opened",
            Self::ContentReceived => "content_received",
            Self::CompleteReceived => "complete_received",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::AttemptFailed { .. } => "attempt_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_event_detection() {
        assert!(ConversationEvent::MessageSubmitted {
            needs_conversation: true
        }
        .is_user_event());
        assert!(ConversationEvent::Cancelled.is_user_event());
        assert!(!ConversationEvent::ContentReceived.is_user_event());
    }

    #[test]
    fn test_error_event_detection() {
        let event = ConversationEvent::RetryScheduled {
            next_attempt: 2,
            delay_ms: 1000,
            error: "HTTP 503".to_string(),
        };
        assert!(event.is_error_event());
        assert!(!ConversationEvent::CompleteReceived.is_error_event());
    }

    #[test]
    fn test_serialized_name_matches_log_name() {
        let value = serde_json::to_value(ConversationEvent::ContentReceived).unwrap();
        assert_eq!(value, serde_json::json!("content_received"));
        assert_eq!(ConversationEvent::ContentReceived.name(), "content_received");
    }
}
