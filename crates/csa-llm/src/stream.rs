/// Accumulates raw bytes from an HTTP streaming body and yields complete
/// lines, buffering any partial trailing line across chunk boundaries
/// (spec.md §4.4: "MUST tolerate chunk boundaries mid-JSON").
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a raw chunk and returns the complete lines it produced, in
    /// order. Any unterminated tail is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            let trimmed = line.trim_end_matches(['\n', '\r']).to_string();
            if !trimmed.is_empty() {
                lines.push(trimmed);
            }
        }
        lines
    }

    /// Flushes and returns any remaining buffered (unterminated) content.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let trimmed = rest.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_multiple_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_json_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"messa").is_empty());
        let lines = buf.push(b"ge\":{\"content\":\"hi\"}}\n");
        assert_eq!(lines, vec!["{\"message\":{\"content\":\"hi\"}}"]);
    }

    #[test]
    fn test_empty_lines_are_dropped() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\n\n{\"x\":1}\n\n");
        assert_eq!(lines, vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_finish_returns_trailing_partial() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"partial");
        assert_eq!(buf.finish().as_deref(), Some("{\"partial"));
        assert_eq!(buf.finish(), None);
    }
}
