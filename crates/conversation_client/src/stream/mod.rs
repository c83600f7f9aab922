//! Transport stream parsing: SSE frames -> typed [`StreamEvent`]s.

mod event;
mod parser;

pub use event::StreamEvent;
pub use parser::{parse_event_stream, parse_frame, EventStream};
