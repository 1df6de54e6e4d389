//! Sliding-window text chunking.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Result, SagittaError};

/// Splits text into overlapping chunks of a fixed character length.
///
/// Sizes are measured in grapheme clusters so a window never splits a
/// character. The window advances by `chunk_size - overlap`; requiring
/// `overlap < chunk_size` keeps every window advancing.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// Create a chunker. Fails with `InvalidArgument` when `chunk_size` is
    /// zero or `overlap >= chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(SagittaError::invalid_argument(
                "chunk_size must be at least 1",
            ));
        }
        if overlap >= chunk_size {
            return Err(SagittaError::invalid_argument(format!(
                "overlap {overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// The configured window length.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The configured overlap between consecutive windows.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split content into ordered chunks. The last chunk may be shorter
    /// than `chunk_size`; empty content produces no chunks.
    pub fn chunk(&self, content: &str) -> Vec<String> {
        let graphemes: Vec<&str> = content.graphemes(true).collect();
        if graphemes.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.chunk_size).min(graphemes.len());
            chunks.push(graphemes[start..end].concat());
            if end == graphemes.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        assert!(TextChunker::new(500, 500).is_err());
        assert!(TextChunker::new(500, 600).is_err());
        assert!(TextChunker::new(0, 0).is_err());
        assert!(TextChunker::new(500, 50).is_ok());
    }

    #[test]
    fn test_chunks_cover_text_with_exact_overlap() {
        let chunker = TextChunker::new(500, 50).unwrap();
        let content: String = (0..1200)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();

        let chunks = chunker.chunk(&content);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[1].len(), 500);
        assert_eq!(chunks[2].len(), 300);

        // Consecutive chunks overlap by exactly 50 characters.
        assert_eq!(&chunks[0][450..], &chunks[1][..50]);
        assert_eq!(&chunks[1][450..], &chunks[2][..50]);

        // Concatenating with the overlaps removed reproduces the text.
        let mut reassembled = chunks[0].clone();
        for chunk in &chunks[1..] {
            reassembled.push_str(&chunk[50..]);
        }
        assert_eq!(reassembled, content);
    }

    #[test]
    fn test_short_content_is_one_chunk() {
        let chunker = TextChunker::new(100, 10).unwrap();
        let chunks = chunker.chunk("short text");
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn test_empty_content_has_no_chunks() {
        let chunker = TextChunker::new(100, 10).unwrap();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_multibyte_text_never_splits_a_character() {
        let chunker = TextChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk("日本語のテキスト分割");

        for chunk in &chunks {
            // Every chunk is valid UTF-8 by construction; sizes are in
            // characters, not bytes.
            assert!(chunk.chars().count() <= 4);
        }
        assert_eq!(chunks[0].chars().count(), 4);
    }
}
