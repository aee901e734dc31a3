/// Splits `text` into chunks of at most `chunk_chars` characters, each
/// chunk overlapping the previous by `overlap` characters (spec.md §4.2).
/// Operates on `char` boundaries so multi-byte UTF-8 text is never split
/// mid-codepoint.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(chunk_chars.saturating_sub(1));
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn test_short_text_yields_single_chunk() {
        let chunks = chunk_text("hello world", 100, 10);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn test_overlap_is_respected() {
        let text = "abcdefghij"; // 10 chars
        let chunks = chunk_text(text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_overlap_never_exceeds_chunk_size() {
        // overlap >= chunk_chars would infinite-loop without clamping
        let chunks = chunk_text("abcdefgh", 3, 10);
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 100);
    }

    #[test]
    fn test_multibyte_text_not_split_mid_codepoint() {
        let text = "héllo wörld";
        let chunks = chunk_text(text, 4, 1);
        for chunk in &chunks {
            assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
        }
    }
}
