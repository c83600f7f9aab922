//! State transitions - FSM transition logic
//!
//! Implements the state machine that handles event-driven phase transitions.

use thiserror::Error;

use super::events::ConversationEvent;
use super::states::ConversationPhase;

/// Error type for invalid state transitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition {
        from: ConversationPhase,
        event: String,
    },
}

/// Represents a state transition result.
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// The phase before the transition.
    pub from: ConversationPhase,
    /// The phase after the transition.
    pub to: ConversationPhase,
    /// The event that triggered the transition.
    pub event: ConversationEvent,
    /// Whether the phase actually changed.
    pub changed: bool,
}

/// State machine for managing conversation phase transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Current phase.
    current: ConversationPhase,
    /// Transition history (limited).
    history: Vec<StateTransition>,
    /// Max history entries to keep.
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in the Idle phase.
    pub fn new() -> Self {
        Self::with_phase(ConversationPhase::Idle)
    }

    /// Create a state machine with a specific initial phase.
    pub fn with_phase(phase: ConversationPhase) -> Self {
        Self {
            current: phase,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> &ConversationPhase {
        &self.current
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event. Invalid events leave the phase untouched.
    pub fn handle_event(
        &mut self,
        event: ConversationEvent,
    ) -> Result<StateTransition, TransitionError> {
        let Some(next) = Self::compute_next_phase(&self.current, &event) else {
            return Err(TransitionError::InvalidTransition {
                from: self.current.clone(),
                event: event.name().to_string(),
            });
        };

        let from = std::mem::replace(&mut self.current, next.clone());
        let changed = from != next;
        if changed && (event.is_user_event() || event.is_error_event()) {
            log::debug!("phase {:?} -> {:?} on {}", from, next, event.name());
        } else if changed {
            log::trace!("phase {:?} -> {:?} on {}", from, next, event.name());
        }

        let transition = StateTransition {
            from,
            to: next,
            event,
            changed,
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        Ok(transition)
    }

    /// Compute the next phase given the current phase and event.
    fn compute_next_phase(
        phase: &ConversationPhase,
        event: &ConversationEvent,
    ) -> Option<ConversationPhase> {
        use ConversationEvent::*;
        use ConversationPhase::*;

        let next = match (phase, event) {
            // ========== Submission ==========
            (
                current,
                MessageSubmitted {
                    needs_conversation,
                },
            ) if current.is_resting() => {
                if *needs_conversation {
                    CreatingConversation
                } else {
                    Streaming { attempt: 1 }
                }
            }

            // ========== Conversation Identity ==========
            (CreatingConversation, ConversationCreated { .. }) => Streaming { attempt: 1 },
            (CreatingConversation, ConversationCreationFailed { error }) => errored(error),

            // ========== Recovery ==========
            (current, RecoveryStarted) if current.is_resting() => Recovering,
            (Recovering, RecoveryFinished { is_complete: true }) => Complete,
            (Recovering, RecoveryFinished { is_complete: false }) => Idle,

            // ========== Streaming ==========
            (Recovering | Streaming { .. } | BackingOff { .. }, StreamOpened { attempt }) => {
                Streaming { attempt: *attempt }
            }
            (Streaming { attempt }, ContentReceived) => Streaming { attempt: *attempt },
            (Streaming { .. }, CompleteReceived) => Complete,

            // ========== Failure and Retry ==========
            (
                Streaming { .. },
                RetryScheduled {
                    next_attempt,
                    delay_ms,
                    error,
                },
            ) => BackingOff {
                next_attempt: *next_attempt,
                delay_ms: *delay_ms,
                last_error: error.clone(),
            },
            (current, AttemptFailed { error }) if current.is_loading() => errored(error),

            // ========== User Actions ==========
            (current, Cancelled) if current.is_loading() => Idle,
            (Errored { .. }, ErrorCleared) => Idle,

            _ => return None,
        };

        Some(next)
    }

    /// Check if a transition is valid without executing it.
    pub fn can_transition(&self, event: &ConversationEvent) -> bool {
        Self::compute_next_phase(&self.current, event).is_some()
    }

    /// Reset to the Idle phase.
    pub fn reset(&mut self) {
        self.current = ConversationPhase::Idle;
    }
}

fn errored(error: &str) -> ConversationPhase {
    ConversationPhase::Errored {
        error_message: error.to_string(),
        failed_at: chrono::Utc::now().to_rfc3339(),
    }
}
