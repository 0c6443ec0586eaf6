//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks do not line up with line or event boundaries, so the decoder
//! keeps raw bytes until a line is complete and only then decodes it as UTF-8.
//! Fields of the event being assembled survive between calls to
//! [`SseDecoder::feed`].

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // The last chunk ended in `\r`; a `\n` opening the next one belongs to it.
    after_cr: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Append a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut chunk = chunk;
        if self.after_cr && !chunk.is_empty() {
            self.after_cr = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let end = start + offset;
            let terminator = match (self.buffer[end], self.buffer.get(end + 1).copied()) {
                (b'\r', Some(b'\n')) => 2,
                (b'\r', None) => {
                    self.after_cr = true;
                    1
                }
                _ => 1,
            };
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + terminator;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment.
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event() {
        let mut decoder = SseDecoder::default();
        let frames = decoder
            .feed(b"event: statusUpdate\ndata: {\"jobId\":\"1\",\"status\":\"pending\"}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "statusUpdate".into(),
                data: r#"{"jobId":"1","status":"pending"}"#.into(),
            }]
        );
    }

    #[test]
    fn keeps_partial_frames_between_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: statusUpd").is_empty());
        assert!(decoder.feed(b"ate\ndata: {\"status\":").is_empty());
        let frames = decoder.feed(b"\"completed\"}\n\nevent: error\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "statusUpdate");
        assert_eq!(frames[0].data, r#"{"status":"completed"}"#);

        let frames = decoder.feed(b"data: {\"message\":\"boom\"}\n\n");
        assert_eq!(frames[0].event, "error");
    }

    #[test]
    fn skips_comments_and_defaults_event_name() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b": keep-alive\n\ndata: hello\ndata: world\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".into(),
                data: "hello\nworld".into(),
            }]
        );
    }

    #[test]
    fn accepts_crlf_line_endings() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"event: error\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn crlf_split_across_chunks_is_one_line_break() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"event: statusUpdate\r").is_empty());
        let frames = decoder.feed(b"\ndata: {\"status\":\"completed\"}\r\n\r\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "statusUpdate".into(),
                data: r#"{"status":"completed"}"#.into(),
            }]
        );
    }

    #[test]
    fn bare_cr_terminates_lines() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"event: error\rdata: {}\r\r");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");

        // A trailing `\r` followed by a chunk with no leading `\n`.
        assert!(decoder.feed(b"data: a\r").is_empty());
        let frames = decoder.feed(b"\r");
        assert_eq!(frames[0].data, "a");
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let bytes = "event: error\ndata: {\"message\":\"é\"}\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        let frames = decoder.feed(&bytes[split..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"message":"é"}"#);
    }

    #[test]
    fn event_name_resets_after_dispatch() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.feed(b"event: statusUpdate\n\ndata: x\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "message".into(),
                data: "x".into(),
            }]
        );
    }
}
