//! Token module - Persisted output of a streamed assistant turn
//!
//! Tokens are cumulative snapshots, not deltas: each one holds the full text
//! produced so far. The complete response is the terminal record of a turn.

mod complete;
mod snapshot;

pub use complete::CompleteResponse;
pub use snapshot::{Token, TokenType};
