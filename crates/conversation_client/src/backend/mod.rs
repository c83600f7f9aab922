//! Backend seams: the agent that streams responses and the history store
//! that persists them.

mod http;

pub use http::HttpConversationBackend;

use async_trait::async_trait;
use chat_core::{CompleteResponse, Conversation, Message, Token};
use serde::Serialize;

use crate::error::Result;
use crate::stream::EventStream;

/// Body of a streaming request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub conversation_id: String,
    pub stage_context: serde_json::Value,
    /// New user turn. Absent when resuming an interrupted turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub resume: Option<ResumeOptions>,
}

impl AgentRequest {
    pub fn is_resume(&self) -> bool {
        self.resume.is_some()
    }
}

/// Lets the backend skip tokens the client already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_token_index: Option<u64>,
    pub resume_streaming: bool,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Create a conversation for `stage_id` and return its id.
    async fn create_conversation(
        &self,
        access_token: &str,
        stage_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<String>;

    /// Open the response stream for a new or resumed turn.
    async fn stream_agent_response(
        &self,
        access_token: &str,
        request: &AgentRequest,
    ) -> Result<EventStream>;
}

/// Read side of the conversation history store.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// Stored tokens with an index greater than `after_index` (all when `None`).
    async fn tokens(&self, conversation_id: &str, after_index: Option<u64>) -> Result<Vec<Token>>;

    async fn complete_response(&self, conversation_id: &str) -> Result<Option<CompleteResponse>>;

    /// Persisted history in creation order.
    async fn messages(&self, _conversation_id: &str) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }
}
