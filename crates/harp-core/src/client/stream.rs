//! Gradio event stream reading
//!
//! `GET /gradio_api/call/{endpoint}/{event_id}` answers with server-sent
//! event lines:
//!
//! ```text
//! event: heartbeat
//! data: null
//!
//! event: complete
//! data: [{"path": ...}]
//! ```
//!
//! The stream is read line by line until a `complete` or `error` event. The
//! line after the sentinel is the payload (or the error message).

use std::io::BufRead;

use crate::error::{ErrorKind, HarpError, Result};

use super::CancelToken;

pub const COMPLETE_EVENT: &str = "complete";
pub const ERROR_EVENT: &str = "error";

/// Event name announced by a line, if any
///
/// Accepts both `event: complete` and a bare `complete` line.
fn event_name(line: &str) -> &str {
    let line = line.trim();
    match line.strip_prefix("event:") {
        Some(name) => name.trim(),
        None => line,
    }
}

/// Read the stream until a sentinel and return the payload line
///
/// The cancel token is checked before every line.
pub fn read_event_stream<R: BufRead>(mut reader: R, cancel: &CancelToken) -> Result<String> {
    let mut line = String::new();
    loop {
        cancel.check()?;
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| {
            if cancel.is_cancelled() {
                HarpError::cancelled()
            } else {
                HarpError::new(ErrorKind::HttpRequestError, format!("Failed to read event stream: {}", e))
            }
        })?;
        if read == 0 {
            return Err(HarpError::new(
                ErrorKind::HttpRequestError,
                "Event stream ended before a complete or error event",
            ));
        }

        match event_name(&line) {
            COMPLETE_EVENT => return read_payload_line(&mut reader, cancel),
            ERROR_EVENT => {
                let message = read_payload_line(&mut reader, cancel)?;
                return Err(HarpError::new(ErrorKind::HttpRequestError, message));
            }
            _ => {}
        }
    }
}

fn read_payload_line<R: BufRead>(reader: &mut R, cancel: &CancelToken) -> Result<String> {
    cancel.check()?;
    let mut payload = String::new();
    reader.read_line(&mut payload).map_err(|e| {
        HarpError::new(ErrorKind::HttpRequestError, format!("Failed to read event payload: {}", e))
    })?;
    Ok(payload.trim_end_matches(['\r', '\n']).to_string())
}

/// The text following `key` in `response`, trimmed
pub fn extract_key(response: &str, key: &str) -> Result<String> {
    match response.find(key) {
        Some(index) => Ok(response[index + key.len()..].trim().to_string()),
        None => Err(HarpError::new(
            ErrorKind::MissingJsonKey,
            format!("Missing Key in JSON :: Key {} not found in response", key),
        )),
    }
}
