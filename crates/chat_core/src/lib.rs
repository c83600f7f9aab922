//! chat_core - Core types and configuration for the conversation protocol
//!
//! This crate provides the foundational types shared by the client crates:
//! - `conversation` - Conversation identity and backend-owned status
//! - `message` - Visible history entries
//! - `token` - Persisted stream snapshots and complete responses
//! - `config` - Client configuration loading

pub mod config;
pub mod conversation;
pub mod message;
pub mod paths;
pub mod token;

// Re-export commonly used types
pub use config::{Config, ConfigError, ProxyAuth, RetrySettings};
pub use conversation::{Conversation, ConversationStatus};
pub use message::{Message, MessageType};
pub use token::{CompleteResponse, Token, TokenType};
