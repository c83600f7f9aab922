//! Shared SSE -> [`EventStream`] adapter.

use std::fmt::Display;
use std::io::{self, Cursor};
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use super::event::StreamEvent;
use crate::error::{ChatClientError, Result};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Decode the JSON payload of one `data:` frame.
///
/// Blank and unparseable payloads yield `None`; the latter are logged so a
/// proxy artifact never aborts the stream.
pub fn parse_frame(data: &str) -> Option<StreamEvent> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::Unknown) => {
            log::debug!("Ignoring stream event of unknown type: {}", data);
            None
        }
        Ok(event) => Some(event),
        Err(e) => {
            log::warn!("Skipping malformed stream frame: {}, data: {}", e, data);
            None
        }
    }
}

/// Decode one complete line. Only `data:` lines carry events.
fn parse_line(line: &str) -> Option<StreamEvent> {
    match line.strip_prefix("data:") {
        Some(data) => parse_frame(data),
        None => {
            if !line.trim().is_empty() && !line.starts_with(':') {
                log::debug!("Ignoring non-data stream line: {}", line);
            }
            None
        }
    }
}

/// Convert a response byte stream into an ordered, finite [`EventStream`].
///
/// Each `data:` line is dispatched as soon as its line ends; a blank line
/// between frames is optional. A partial line at the end of a chunk is held
/// until the next chunk completes it, and whatever remains buffered when the
/// body closes is decoded as a last line. Transport failures are surfaced as
/// [`ChatClientError::Stream`]; decoding failures of a single frame are
/// skipped.
pub fn parse_event_stream<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let bytes = body.map(|chunk| {
        chunk
            .map(Cursor::new)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    });

    let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());
    let stream = lines.filter_map(|line| async move {
        match line {
            Ok(line) => parse_line(&line).map(Ok),
            Err(LinesCodecError::Io(err)) => Some(Err(ChatClientError::Stream(err.to_string()))),
            Err(err) => {
                log::warn!("Skipping undecodable stream line: {}", err);
                None
            }
        }
    });

    Box::pin(stream)
}
