//! SSE decoder for OpenAI-compatible chat completion streams.
//!
//! Each event is a `data:` line holding a JSON chunk with a
//! `choices[].delta` object. The stream ends with `data: [DONE]`. Byte chunks
//! from the transport do not respect line boundaries, so partial lines are
//! buffered until their newline arrives.

use parley_core::{RawError, StreamEvent};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    pending: Vec<u8>,
    /// Set once a terminal event has been emitted. Later input is ignored.
    done: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one transport chunk and return the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, RawError>> {
        self.pending.extend_from_slice(chunk);

        let pending = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if !self.done {
                if let Some(event) = self.decode_line(&pending[start..end]) {
                    events.push(event);
                }
            }
            start = end + 1;
        }

        // Keep only the unterminated tail.
        self.pending = pending;
        self.pending.drain(..start);
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, RawError>> {
        if self.pending.is_empty() || self.done {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line).into_iter().collect()
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Result<StreamEvent, RawError>> {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                let raw = RawError::Parse(format!("invalid UTF-8 in stream: {e}"));
                return Some(self.fail(raw));
            }
        };
        match self.feed_line(line) {
            Ok(event) => event.map(Ok),
            Err(raw) => Some(self.fail(raw)),
        }
    }

    /// Parse a single SSE line.
    ///
    /// Returns `Ok(Some(Delta))` for text, `Ok(Some(Close))` for `[DONE]`,
    /// `Ok(None)` for comments, blank lines and chunks without text.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamEvent>, RawError> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            debug!("SSE stream finished");
            self.done = true;
            return Ok(Some(StreamEvent::Close));
        }

        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| RawError::Parse(format!("invalid JSON in SSE data: {e}")))?;

        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            return Err(in_stream_error(error));
        }

        let choice = &chunk["choices"][0];

        // A filtered chunk fails the reply even if it also carries text.
        if let Some(reason @ ("content_filter" | "sensitive")) = choice["finish_reason"].as_str() {
            warn!("Reply stopped by the provider: finish_reason={reason}");
            return Err(RawError::Other(format!(
                "reply blocked by content filter ({reason})"
            )));
        }

        Ok(choice["delta"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .map(|content| StreamEvent::Delta(content.to_string())))
    }

    fn fail(&mut self, raw: RawError) -> Result<StreamEvent, RawError> {
        self.done = true;
        Err(raw)
    }
}

/// Map an `{"error": {...}}` payload sent inside the stream.
fn in_stream_error(error: &Value) -> RawError {
    let message = error["message"]
        .as_str()
        .map_or_else(|| error.to_string(), ToString::to_string);

    let status = error["code"]
        .as_u64()
        .or_else(|| error["code"].as_str().and_then(|c| c.parse().ok()))
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (400..600).contains(code));

    match status {
        Some(status) => RawError::Status { status, message },
        None => RawError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn decodes_deltas_and_done() {
        let mut decoder = SseDecoder::new();
        let input = format!("{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"));

        let events: Vec<_> = decoder.feed(input.as_bytes());

        assert_eq!(
            events,
            vec![
                Ok(StreamEvent::Delta("Hel".into())),
                Ok(StreamEvent::Delta("lo".into())),
                Ok(StreamEvent::Close),
            ]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn buffers_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let input = chunk("naïve");
        let bytes = input.as_bytes();
        // Split inside the multi-byte character.
        let split = input.find('ï').unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).is_empty());
        assert_eq!(
            decoder.feed(&bytes[split..]),
            vec![Ok(StreamEvent::Delta("naïve".into()))]
        );
    }

    #[test]
    fn ignores_comments_and_role_only_chunks() {
        let mut decoder = SseDecoder::new();
        let input = ": keep-alive\n\
                     event: message\n\
                     data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                     data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n";

        assert!(decoder.feed(input.as_bytes()).is_empty());
        assert!(!decoder.is_done());
    }

    #[test]
    fn content_filter_is_an_error() {
        let mut decoder = SseDecoder::new();
        let input = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"content_filter\"}]}\n\
                     data: [DONE]\n";

        let events = decoder.feed(input.as_bytes());

        assert_eq!(events.len(), 1);
        let Err(RawError::Other(message)) = &events[0] else {
            panic!("Expected a content filter error, got {events:?}");
        };
        assert!(message.contains("content filter"));
    }

    #[test]
    fn filtered_chunk_with_text_is_an_error() {
        let mut decoder = SseDecoder::new();
        let input = format!(
            "{}data: {{\"choices\":[{{\"delta\":{{\"content\":\"bad\"}},\"finish_reason\":\"sensitive\"}}]}}\n\
             data: [DONE]\n",
            chunk("fine ")
        );

        let events = decoder.feed(input.as_bytes());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(StreamEvent::Delta("fine ".into())));
        let Err(RawError::Other(message)) = &events[1] else {
            panic!("Expected a content filter error, got {events:?}");
        };
        assert!(message.contains("sensitive"));
        assert!(decoder.is_done());
    }

    #[test]
    fn many_lines_in_one_chunk_keep_the_tail() {
        let mut decoder = SseDecoder::new();
        let mut input: String = (0..200).map(|i| chunk(&i.to_string())).collect();
        input.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"ta");

        let events = decoder.feed(input.as_bytes());
        assert_eq!(events.len(), 200);
        assert_eq!(events[199], Ok(StreamEvent::Delta("199".into())));

        assert_eq!(
            decoder.feed(b"il\"}}]}\n"),
            vec![Ok(StreamEvent::Delta("tail".into()))]
        );
    }

    #[test]
    fn in_stream_error_keeps_status() {
        let mut decoder = SseDecoder::new();
        let input = "data: {\"error\":{\"code\":\"429\",\"message\":\"Rate limit reached\"}}\n";

        assert_eq!(
            decoder.feed(input.as_bytes()),
            vec![Err(RawError::Status {
                status: 429,
                message: "Rate limit reached".into()
            })]
        );
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {not json\n");
        assert!(matches!(events[0], Err(RawError::Parse(_))));
        assert!(decoder.feed(chunk("late").as_bytes()).is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish(), vec![Ok(StreamEvent::Close)]);
    }
}
