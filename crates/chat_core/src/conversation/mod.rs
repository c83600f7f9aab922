//! Conversation module - Identity and lifecycle of one agent exchange
//!
//! A conversation is scoped to a single wizard stage. Its status is owned by
//! the backend; the client only reads it to decide whether to resume.

use serde::{Deserialize, Serialize};

/// Backend-authoritative lifecycle status of a conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// The agent may still be producing output.
    Active,
    /// The last turn finished and a complete response was stored.
    Completed,
    /// The backend gave up on the conversation.
    Failed,
}

impl ConversationStatus {
    /// Only active conversations are resumed after a disconnect.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// One logical exchange between the user and the agent for a stage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    /// Opaque identifier assigned by the backend on creation.
    pub id: String,

    /// Wizard stage this conversation belongs to.
    #[serde(alias = "stageId")]
    pub stage_id: String,

    /// Current status as last reported by the backend.
    pub status: ConversationStatus,
}
