//! State machine module
//!
//! Contains the FSM implementation for the conversation lifecycle.

mod events;
mod states;
mod transitions;

pub use events::ConversationEvent;
pub use states::ConversationPhase;
pub use transitions::{StateMachine, StateTransition, TransitionError};
