//! Line decoding for `text/event-stream` bodies.
//!
//! Only `data:` lines matter to the feed; each carries one JSON record.
//! Comments, `event:`/`id:` fields and blank separators are ignored.

/// A single line longer than this is discarded rather than buffered forever.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits an arbitrarily chunked byte stream into complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes (without terminators).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }
            self.buffer.extend_from_slice(head);
            lines.push(self.take_line());
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_LINE_BYTES {
                tracing::warn!(
                    bytes = self.buffer.len(),
                    "Event stream line exceeds limit, discarding"
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.discarding || self.buffer.is_empty() {
            self.buffer.clear();
            self.discarding = false;
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}

/// The payload of a `data:` line, with the single optional leading space removed.
pub fn data_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        None
    } else {
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\n\ndata: 2\r\n"), vec![
            "data: {\"a\":1}".to_string(),
            String::new(),
            "data: 2".to_string(),
        ]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("data: tail"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_oversized_line_discarded_until_newline() {
        let mut decoder = LineDecoder::new();
        let huge = vec![b'x'; MAX_LINE_BYTES + 1];
        assert!(decoder.push(&huge).is_empty());
        assert!(decoder.push(b"still the same line").is_empty());
        assert_eq!(decoder.push(b"\ndata: ok\n"), vec!["data: ok".to_string()]);
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_payload("data:{\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_payload("data:   "), None);
        assert_eq!(data_payload(": keepalive"), None);
        assert_eq!(data_payload("event: message"), None);
    }
}
