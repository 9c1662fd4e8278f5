use crate::error::{RagError, Result};
use regex::Regex;

/// Boundaries tried from the most to the least preferred before falling back
/// to a hard cut: blank line, sentence end, line break, any whitespace.
const BOUNDARY_PATTERNS: [&str; 4] = [
    r"\r?\n[ \t]*\r?\n",
    r#"[.!?]["')\]]*\s"#,
    r"\n",
    r"\s",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits text into windows of at most `chunk_size` characters where each
/// window starts `chunk_overlap` characters before the previous one ended.
///
/// Lengths are counted in `char`s. Window ends snap back to the most
/// preferred boundary found inside the window, as long as the window stays
/// longer than the overlap; otherwise the window is cut at `chunk_size`.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
    boundaries: Vec<Regex>,
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        let boundaries = BOUNDARY_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { config, boundaries })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + self.config.chunk_size).min(chars.len());
            if hard_end == chars.len() {
                chunks.push(chars[start..hard_end].iter().collect());
                break;
            }

            let end = self.break_point(&chars, start, hard_end);
            chunks.push(chars[start..end].iter().collect());
            start = end - self.config.chunk_overlap;
        }

        chunks
    }

    fn break_point(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_end = start + self.config.chunk_overlap + 1;
        let window: String = chars[start..hard_end].iter().collect();

        for boundary in &self.boundaries {
            let candidate = boundary
                .find_iter(&window)
                .map(|found| start + window[..found.end()].chars().count())
                .filter(|end| *end >= min_end)
                .last();

            if let Some(end) = candidate {
                return end;
            }
        }

        hard_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig::new(size, overlap).unwrap()).unwrap()
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(matches!(
            ChunkingConfig::new(100, 100),
            Err(RagError::Config(_))
        ));
        assert!(matches!(ChunkingConfig::new(0, 0), Err(RagError::Config(_))));
        assert!(ChunkingConfig::new(100, 99).is_ok());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(10, 2).split("").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunker(50, 10).split("A short note about pumps.");
        assert_eq!(chunks, vec!["A short note about pumps.".to_string()]);
    }

    #[test]
    fn hard_cut_when_no_boundary_exists() {
        let text = "x".repeat(25);
        let chunks = chunker(10, 3).split(&text);
        let lengths: Vec<usize> = chunks.iter().map(|chunk| chunk.chars().count()).collect();
        assert_eq!(lengths, vec![10, 10, 10, 4]);
    }

    #[test]
    fn prefers_paragraph_over_sentence_breaks() {
        let text = "First para. Still first.\n\nSecond para starts here and goes on for a while.";
        let chunks = chunker(40, 5).split(text);
        assert_eq!(chunks[0], "First para. Still first.\n\n");
    }

    #[test]
    fn crlf_blank_line_is_a_paragraph_break() {
        let text = "First para. Still first.\r\n\r\nSecond para starts here and goes on for a while.";
        let chunks = chunker(40, 5).split(text);
        assert_eq!(chunks[0], "First para. Still first.\r\n\r\n");
    }

    #[test]
    fn prefers_sentence_over_word_breaks() {
        let text = "One sentence here. Another sentence that keeps going";
        let chunks = chunker(30, 4).split(text);
        assert_eq!(chunks[0], "One sentence here. ");
        assert!(chunks[1].starts_with("re. "));
    }

    #[test]
    fn consecutive_chunks_share_exact_overlap() {
        let text = "The pressure relief valve opens at nine bar. ".repeat(20);
        let chunks = chunker(120, 30).split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let previous: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            assert_eq!(previous[previous.len() - 30..], next[..30]);
        }
    }

    #[test]
    fn multibyte_text_is_counted_in_chars() {
        let text = "ü".repeat(15);
        let chunks = chunker(6, 2).split(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 6));
        assert_eq!(chunks[0], "ü".repeat(6));
    }
}
