use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Message shown to the user whenever the failure is an authentication one.
pub const SIGN_IN_MESSAGE: &str = "Please sign in to continue planning with the assistant.";

#[derive(Error, Debug)]
pub enum ChatClientError {
    #[error("No signed-in session")]
    NotAuthenticated,

    #[error("Authentication rejected by server (HTTP {0})")]
    Unauthorized(u16),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Agent reported an error: {0}")]
    Agent(String),

    #[error("Stream closed before the response completed")]
    IncompleteStream,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to create conversation: {0}")]
    ConversationCreation(Box<ChatClientError>),

    #[error("Request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ChatClientError>;

fn is_auth_status(status: Option<StatusCode>) -> bool {
    matches!(
        status,
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
    )
}

impl ChatClientError {
    /// Missing session or a 401/403 from the backend.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::NotAuthenticated | Self::Unauthorized(_) => true,
            Self::Http(err) => is_auth_status(err.status()),
            Self::Middleware(reqwest_middleware::Error::Reqwest(err)) => {
                is_auth_status(err.status())
            }
            Self::ConversationCreation(inner) => inner.is_auth(),
            _ => false,
        }
    }

    /// Whether another attempt may succeed. Auth failures, cancellation and
    /// conversation creation are never retried.
    pub fn is_retryable(&self) -> bool {
        !self.is_auth() && !matches!(self, Self::Cancelled | Self::ConversationCreation(_))
    }

    /// Human-readable text for the visible error field.
    pub fn user_message(&self) -> String {
        if self.is_auth() {
            SIGN_IN_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
