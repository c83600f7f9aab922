//! Conversation phases - Defines all possible states of a conversation turn

use serde::{Deserialize, Serialize};

/// Defines the possible phases of a conversation's client-side lifecycle.
///
/// `Idle`, `Complete` and `Errored` are resting phases; everything else means
/// a request is in flight.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum ConversationPhase {
    /// Awaiting user input.
    #[default]
    Idle,

    /// Asking the backend for a conversation id (first send of a session).
    CreatingConversation,

    /// Rebuilding persisted state after a reload or disconnect.
    Recovering,

    /// Receiving events from an open response stream.
    Streaming {
        /// The current attempt (1-based).
        attempt: u32,
    },

    /// Waiting out the backoff delay before the next attempt.
    BackingOff {
        /// Attempt that will start once the delay elapses.
        next_attempt: u32,
        /// Scheduled delay in milliseconds.
        delay_ms: u64,
        /// Failure that triggered the retry.
        last_error: String,
    },

    /// The terminal `complete` event was applied.
    Complete,

    /// The turn failed terminally and the error is visible.
    Errored {
        error_message: String,
        failed_at: String, // ISO timestamp
    },
}

impl ConversationPhase {
    /// Check if this is a resting phase (no request in flight).
    pub fn is_resting(&self) -> bool {
        matches!(self, Self::Idle | Self::Complete | Self::Errored { .. })
    }

    /// Check if a request is in flight.
    pub fn is_loading(&self) -> bool {
        !self.is_resting()
    }

    /// Check if a response stream is open.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Get a human-readable description of the current phase.
    pub fn description(&self) -> &str {
        match self {
            Self::Idle => "Ready for input",
            Self::CreatingConversation => "Starting conversation",
            Self::Recovering => "Restoring conversation",
            Self::Streaming { .. } => "Receiving AI response",
            Self::BackingOff { .. } => "Retrying",
            Self::Complete => "Response complete",
            Self::Errored { .. } => "Failed",
        }
    }
}
