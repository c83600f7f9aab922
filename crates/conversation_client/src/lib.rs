//! conversation_client - Streaming conversation protocol client
//!
//! - `stream` - SSE frames to typed events
//! - `retry` - Backoff controller for streaming attempts
//! - `backend` - Agent and history-store seams plus the HTTP implementation
//! - `recovery` - Rebuilding interrupted turns from stored tokens
//! - `session` - The per-stage conversation driver

pub mod auth;
pub mod backend;
pub mod error;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod stream;

pub use auth::Credentials;
pub use backend::{AgentBackend, AgentRequest, ConversationStore, HttpConversationBackend, ResumeOptions};
pub use chat_core::Config;
pub use error::{ChatClientError, Result};
pub use recovery::{RecoveryManager, RecoveryResult, RecoverySource};
pub use retry::{RetryController, RetryNotice, RetryPolicy};
pub use session::{
    CompletedTurn, ConversationSession, ConversationState, SessionCallbacks, SessionConfig,
    SessionEvent, TurnOutcome,
};
pub use stream::{parse_event_stream, EventStream, StreamEvent};
