//! Incremental Server-Sent-Events parser.
//!
//! Raw text is appended to an internal buffer by [`SseParser::feed`]; the
//! returned [`Events`] iterator pulls complete lines out of the buffer one at
//! a time and yields a [`StreamEvent`] whenever a frame completes. A trailing
//! line without its terminator stays buffered until a later call completes it.

use crate::event::StreamEvent;
use crate::payload::decode_frame;

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    /// Bytes of an incomplete UTF-8 sequence from the previous `feed_bytes`.
    utf8_carry: Vec<u8>,
    frame: PendingFrame,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and iterate the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Events<'_> {
        self.buffer.push_str(chunk);
        Events {
            parser: self,
            flush: false,
        }
    }

    /// Append raw bytes. A multi-byte character split across calls is held
    /// back until its remaining bytes arrive; invalid sequences are replaced.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Events<'_> {
        let mut pending = std::mem::take(&mut self.utf8_carry);
        pending.extend_from_slice(bytes);

        let mut rest = pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        Events {
            parser: self,
            flush: false,
        }
    }

    /// Signal end of input: the unterminated last line and any pending frame
    /// are processed as if terminated.
    pub fn finish(&mut self) -> Events<'_> {
        if !self.utf8_carry.is_empty() {
            let carry = std::mem::take(&mut self.utf8_carry);
            self.buffer.push_str(&String::from_utf8_lossy(&carry));
        }
        Events {
            parser: self,
            flush: true,
        }
    }

    /// Text buffered but not yet terminated by a newline.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Drop all buffered input and any partially read frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.utf8_carry.clear();
        self.frame = PendingFrame::default();
    }

    fn take_line(&mut self) -> Option<String> {
        let index = self.buffer.find(|c: char| c == '\n' || c == '\r')?;
        let bytes = self.buffer.as_bytes();

        let end = if bytes[index] == b'\r' {
            match bytes.get(index + 1) {
                // A lone '\r' at the end may be the first half of "\r\n".
                None => return None,
                Some(b'\n') => index + 2,
                Some(_) => index + 1,
            }
        } else {
            index + 1
        };

        let line = self.buffer[..index].to_string();
        self.buffer.drain(..end);
        Some(line)
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let remainder = std::mem::take(&mut self.buffer);
        Some(remainder.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.frame.event = Some(value.to_string()),
            "data" => self.frame.data.push(value.to_string()),
            "id" | "retry" => {}
            other => log::debug!("Ignoring unknown SSE field '{}'", other),
        }

        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let frame = std::mem::take(&mut self.frame);
        if frame.data.is_empty() {
            if let Some(kind) = frame.event {
                log::debug!("Dropping SSE frame '{}' without data", kind);
            }
            return None;
        }

        let payload = frame.data.join("\n");
        decode_frame(frame.event.as_deref(), &payload)
    }
}

/// Lazy iterator over the events completed by one `feed` call.
///
/// Dropping it early leaves the unread lines buffered for the next call.
pub struct Events<'a> {
    parser: &'a mut SseParser,
    flush: bool,
}

impl Iterator for Events<'_> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        while let Some(line) = self.parser.take_line() {
            if let Some(event) = self.parser.process_line(&line) {
                return Some(event);
            }
        }

        if !self.flush {
            return None;
        }

        if let Some(line) = self.parser.take_remainder() {
            if let Some(event) = self.parser.process_line(&line) {
                return Some(event);
            }
        }

        self.flush = false;
        self.parser.dispatch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Suggestion;

    fn collect(parser: &mut SseParser, chunk: &str) -> Vec<StreamEvent> {
        parser.feed(chunk).collect()
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta(text.to_string())
    }

    const SCENARIO: &str = concat!(
        "data: {\"content\":\"Hi\"}\n\n",
        "data: {\"content\":\" there\"}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn parses_complete_frames() {
        let mut parser = SseParser::new();
        let events = collect(&mut parser, SCENARIO);
        assert_eq!(events, vec![delta("Hi"), delta(" there"), StreamEvent::Done]);
        assert!(parser.buffered().is_empty());
    }

    #[test]
    fn partial_line_is_retained_until_terminated() {
        let mut parser = SseParser::new();
        assert!(collect(&mut parser, "data: {\"content\":").is_empty());
        assert_eq!(parser.buffered(), "data: {\"content\":");

        assert!(collect(&mut parser, "\"Hi\"}\n").is_empty());
        assert_eq!(collect(&mut parser, "\n"), vec![delta("Hi")]);
    }

    #[test]
    fn chunking_does_not_change_events() {
        let expected = collect(&mut SseParser::new(), SCENARIO);

        for size in 1..=SCENARIO.len() {
            let mut parser = SseParser::new();
            let mut events = Vec::new();
            let bytes = SCENARIO.as_bytes();
            for piece in bytes.chunks(size) {
                events.extend(parser.feed_bytes(piece));
            }
            assert_eq!(events, expected, "chunk size {size}");
        }
    }

    #[test]
    fn crlf_split_between_chunks() {
        let mut parser = SseParser::new();
        let mut events: Vec<_> = parser.feed("data: {\"content\":\"a\"}\r").collect();
        events.extend(parser.feed("\n\r\n"));
        assert_eq!(events, vec![delta("a")]);
    }

    #[test]
    fn multibyte_characters_split_across_byte_chunks() {
        let text = "data: {\"content\":\"héllo ✓\"}\n\n";
        let bytes = text.as_bytes();
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for byte in bytes {
            events.extend(parser.feed_bytes(std::slice::from_ref(byte)));
        }
        assert_eq!(events, vec![delta("héllo ✓")]);
    }

    #[test]
    fn named_events_are_classified() {
        let mut parser = SseParser::new();
        let events = collect(
            &mut parser,
            concat!(
                "event: status\n",
                "data: {\"status\":\"Activated mentor mode\"}\n\n",
                "event: reasoning\n",
                "data: {\"reasoning\":\"because\"}\n\n",
                "event: suggestions\n",
                "data: [{\"text\":\"More?\"}]\n\n",
            ),
        );

        assert_eq!(
            events,
            vec![
                StreamEvent::Status("Activated mentor mode".to_string()),
                StreamEvent::Reasoning("because".to_string()),
                StreamEvent::Suggestions(vec![Suggestion::new("More?")]),
            ]
        );
    }

    #[test]
    fn event_kind_does_not_leak_into_next_frame() {
        let mut parser = SseParser::new();
        let events = collect(
            &mut parser,
            "event: status\ndata: \"busy\"\n\ndata: {\"content\":\"x\"}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::Status("busy".to_string()), delta("x")]);
    }

    #[test]
    fn malformed_frame_is_skipped_and_stream_continues() {
        let mut parser = SseParser::new();
        let events = collect(
            &mut parser,
            "data: {\"content\": oops\n\ndata: {\"content\":\"ok\"}\n\n",
        );
        assert_eq!(events, vec![delta("ok")]);
    }

    #[test]
    fn multiline_data_is_joined() {
        let mut parser = SseParser::new();
        let events = collect(
            &mut parser,
            "event: reasoning\ndata: {\"reasoning\":\ndata: \"two lines\"}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::Reasoning("two lines".to_string())]);
    }

    #[test]
    fn comments_and_ignored_fields() {
        let mut parser = SseParser::new();
        let events = collect(
            &mut parser,
            ": keep-alive\nid: 7\nretry: 100\ndata:{\"content\":\"z\"}\n\n",
        );
        assert_eq!(events, vec![delta("z")]);
    }

    #[test]
    fn dropped_iterator_keeps_remaining_lines() {
        let mut parser = SseParser::new();
        let first = parser.feed(SCENARIO).next();
        assert_eq!(first, Some(delta("Hi")));

        let rest: Vec<_> = parser.feed("").collect();
        assert_eq!(rest, vec![delta(" there"), StreamEvent::Done]);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut parser = SseParser::new();
        assert!(collect(&mut parser, "data: {\"content\":\"tail\"}").is_empty());

        let events: Vec<_> = parser.finish().collect();
        assert_eq!(events, vec![delta("tail")]);
        assert!(parser.finish().next().is_none());
    }

    #[test]
    fn blank_lines_without_data_produce_nothing() {
        let mut parser = SseParser::new();
        assert!(collect(&mut parser, "\n\n\nevent: status\n\n").is_empty());
    }

    #[test]
    fn reset_discards_partial_input() {
        let mut parser = SseParser::new();
        assert!(collect(&mut parser, "data: {\"content\":\"lost\"}\n").is_empty());
        parser.reset();
        assert!(collect(&mut parser, "\n").is_empty());
    }
}
