//! Scripted in-process backend for session and recovery tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_core::{
    CompleteResponse, Conversation, ConversationStatus, Message, Token, TokenType,
};
use conversation_client::{
    parse_event_stream, AgentBackend, AgentRequest, ChatClientError, ConversationSession,
    ConversationStore, Credentials, EventStream, Result, SessionConfig, SessionEvent,
};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

/// What the next stream request returns.
pub enum Reply {
    /// Body frames, then a clean close.
    Frames(Vec<String>),
    /// Body frames, then the connection stays open forever.
    FramesThenHang(Vec<String>),
    /// Non-2xx response.
    Status(u16),
    /// Body frames, then the connection drops.
    Transport(Vec<String>),
}

pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<AgentRequest>>,
    create_status: Mutex<Option<u16>>,
    conversation_id: String,
    create_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    token_calls: AtomicUsize,

    conversation: Mutex<Option<Conversation>>,
    tokens: Mutex<Vec<Token>>,
    complete: Mutex<Option<CompleteResponse>>,
    messages: Mutex<Vec<Message>>,
    store_offline: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            create_status: Mutex::new(None),
            conversation_id: "conv-1".to_string(),
            create_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            conversation: Mutex::new(None),
            tokens: Mutex::new(Vec::new()),
            complete: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            store_offline: AtomicBool::new(false),
        })
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_creation_with(&self, status: u16) {
        *self.create_status.lock().unwrap() = Some(status);
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, status: ConversationStatus) {
        *self.conversation.lock().unwrap() = Some(Conversation {
            id: self.conversation_id.clone(),
            stage_id: "idea".to_string(),
            status,
        });
    }

    pub fn set_tokens(&self, tokens: Vec<Token>) {
        *self.tokens.lock().unwrap() = tokens;
    }

    pub fn set_complete(&self, response: CompleteResponse) {
        *self.complete.lock().unwrap() = Some(response);
    }

    pub fn set_messages(&self, messages: Vec<Message>) {
        *self.messages.lock().unwrap() = messages;
    }

    pub fn take_store_offline(&self) {
        self.store_offline.store(true, Ordering::SeqCst);
    }

    fn check_store(&self) -> Result<()> {
        if self.store_offline.load(Ordering::SeqCst) {
            return Err(ChatClientError::Status {
                status: 503,
                body: "store offline".to_string(),
            });
        }
        Ok(())
    }
}

fn body(frames: Vec<String>) -> Vec<std::result::Result<Vec<u8>, String>> {
    frames.into_iter().map(|frame| Ok(frame.into_bytes())).collect()
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn create_conversation(
        &self,
        _access_token: &str,
        _stage_id: &str,
        _metadata: &serde_json::Value,
    ) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let create_status = *self.create_status.lock().unwrap();
        if let Some(status) = create_status {
            return Err(ChatClientError::Status {
                status,
                body: "creation failed".to_string(),
            });
        }
        Ok(self.conversation_id.clone())
    }

    async fn stream_agent_response(
        &self,
        _access_token: &str,
        request: &AgentRequest,
    ) -> Result<EventStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Frames(frames)) => Ok(parse_event_stream(stream::iter(body(frames)))),
            Some(Reply::FramesThenHang(frames)) => {
                let hang = stream::pending::<std::result::Result<Vec<u8>, String>>();
                Ok(parse_event_stream(stream::iter(body(frames)).chain(hang)))
            }
            Some(Reply::Status(401)) => Err(ChatClientError::Unauthorized(401)),
            Some(Reply::Status(403)) => Err(ChatClientError::Unauthorized(403)),
            Some(Reply::Status(status)) => Err(ChatClientError::Status {
                status,
                body: String::new(),
            }),
            Some(Reply::Transport(frames)) => {
                let mut items = body(frames);
                items.push(Err("connection reset by peer".to_string()));
                Ok(parse_event_stream(stream::iter(items)))
            }
            None => Err(ChatClientError::Status {
                status: 500,
                body: "no scripted reply".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ConversationStore for ScriptedBackend {
    async fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.check_store()?;
        self.conversation
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChatClientError::Status {
                status: 404,
                body: format!("unknown conversation {conversation_id}"),
            })
    }

    async fn tokens(&self, _conversation_id: &str, after_index: Option<u64>) -> Result<Vec<Token>> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.check_store()?;
        Ok(self
            .tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|token| after_index.map_or(true, |after| token.token_index > after))
            .cloned()
            .collect())
    }

    async fn complete_response(&self, _conversation_id: &str) -> Result<Option<CompleteResponse>> {
        self.check_store()?;
        Ok(self.complete.lock().unwrap().clone())
    }

    async fn messages(&self, _conversation_id: &str) -> Result<Vec<Message>> {
        self.check_store()?;
        Ok(self.messages.lock().unwrap().clone())
    }
}

pub fn content(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"type": "content", "content": text})
    )
}

pub fn complete(
    suggestions: &[&str],
    auto_fill_data: Option<serde_json::Value>,
    stage_complete: bool,
) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({
            "type": "complete",
            "suggestions": suggestions,
            "autoFillData": auto_fill_data,
            "stageComplete": stage_complete,
        })
    )
}

pub fn error_frame(message: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"type": "error", "error": message})
    )
}

pub fn ping() -> String {
    "data: {\"type\":\"ping\"}\n\n".to_string()
}

pub fn token(index: u64, text: &str) -> Token {
    Token {
        token_index: index,
        token_content: text.to_string(),
        token_type: TokenType::Content,
        created_at: chrono::Utc::now(),
    }
}

pub fn signed_in() -> Credentials {
    Credentials::new(Some("test-token".to_string()))
}

pub fn session_with(
    backend: &Arc<ScriptedBackend>,
    credentials: Credentials,
    config: SessionConfig,
) -> (ConversationSession, mpsc::UnboundedReceiver<SessionEvent>) {
    ConversationSession::new(backend.clone(), backend.clone(), credentials, config)
}

pub fn session(
    backend: &Arc<ScriptedBackend>,
) -> (ConversationSession, mpsc::UnboundedReceiver<SessionEvent>) {
    session_with(backend, signed_in(), SessionConfig::new("idea"))
}
