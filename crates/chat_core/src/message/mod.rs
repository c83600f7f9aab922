//! Message module - Entries of the visible conversation history
//!
//! History is append-only. Entries are kept in the order they were created
//! and are never reordered by the client.

mod entry;

pub use entry::{Message, MessageType};
