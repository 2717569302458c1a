//! Incremental decoder for the run stream.
//!
//! The store frames run messages as server-sent events (`data: {...}`). Bare
//! JSON lines are accepted too so newline-delimited transports decode the same.

use crate::error::{ClientError, ClientResult};
use crate::types::{RunEvent, WireRunMessage};

/// Accumulates raw bytes and yields complete run events.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> ClientResult<Vec<RunEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Decode whatever is left once the stream ends without a trailing newline.
    pub fn finish(&mut self) -> ClientResult<Option<RunEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> ClientResult<Option<RunEvent>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| ClientError::Stream(format!("invalid utf-8 in run stream: {e}")))?
        .trim();

    // Blank lines separate events; `:` lines are comments/keep-alives.
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let payload = match line.strip_prefix("data:") {
        Some(data) => data.trim(),
        None if line.starts_with('{') => line,
        // `event:`, `id:`, `retry:` fields carry nothing we use.
        None => return Ok(None),
    };

    let message: WireRunMessage = serde_json::from_str(payload)?;
    Ok(message.into_event())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunCompletion;

    #[test]
    fn test_events_split_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"outp").unwrap().is_empty());
        let events = decoder
            .push(b"ut\":\"line 1\"}\n\ndata: {\"output\":\"line 2\"}\n\n")
            .unwrap();
        assert_eq!(
            events,
            vec![
                RunEvent::Output("line 1".into()),
                RunEvent::Output("line 2".into())
            ]
        );
    }

    #[test]
    fn test_comments_and_fields_ignored() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .push(b": keep-alive\nevent: message\nid: 4\n\n")
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_bare_json_line_and_finish() {
        let mut decoder = EventDecoder::new();
        assert!(decoder
            .push(br#"{"done":true,"success":true,"return_code":0}"#)
            .unwrap()
            .is_empty());
        assert_eq!(
            decoder.finish().unwrap(),
            Some(RunEvent::Completed(RunCompletion {
                success: true,
                return_code: Some(0)
            }))
        );
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {not json}\n").is_err());
    }
}
