//! chat_state - State machine for the conversation streaming lifecycle
//!
//! This crate provides the FSM that tracks one conversation from message
//! submission through streaming, retry backoff, recovery, and completion.

pub mod machine;

// Re-export commonly used types
pub use machine::{
    ConversationEvent, ConversationPhase, StateMachine, StateTransition, TransitionError,
};
