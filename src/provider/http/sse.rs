//! Incremental Server-Sent Events parser.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Buffers partial chunks and yields complete events.
///
/// Chunks may split a UTF-8 sequence; its leading bytes wait for the rest.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    undecoded: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        self.undecoded.extend_from_slice(chunk.as_ref());
        let text = self.decode();
        if text.contains('\r') {
            self.buffer.push_str(&text.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.buffer.push_str(&text);
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = Self::parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode the complete UTF-8 prefix of `undecoded`, keeping an unfinished tail.
    fn decode(&mut self) -> String {
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.undecoded.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    match e.error_len() {
                        None => {
                            self.undecoded.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let tail = std::mem::take(&mut self.undecoded);
        self.buffer.push_str(&String::from_utf8_lossy(&tail));
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_block(rest.trim_end_matches('\n'))
    }

    fn parse_block(text: &str) -> Option<SseEvent> {
        let mut event = None;
        let mut data = Vec::new();

        for line in text.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => event = Some(value.to_string()),
                "data" => data.push(value),
                _ => {}
            }
        }

        if data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: data.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_with_type() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: par").is_empty());
        let events = parser.feed("tial\n\ndata: next\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "partial");
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = "data: caf\u{e9} \u{1f600}\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(parser.feed(&bytes[..split]).is_empty());
        assert!(parser.feed(&bytes[split..split + 3]).is_empty());
        let events = parser.feed(&bytes[split + 3..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "caf\u{e9} \u{1f600}");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: a\xFFb\n\n");
        assert_eq!(events[0].data, "a\u{fffd}b");
    }

    #[test]
    fn test_crlf_and_multiline() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: one\r\ndata: two\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn test_comments_and_empty_data() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keepalive\n\ndata:\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: [DONE]").is_empty());
        assert_eq!(parser.finish().unwrap().data, "[DONE]");
        assert!(parser.finish().is_none());
    }
}
