use sha2::{Digest, Sha256};

/// Raw chunk info before embedding.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub hash: String,
}

/// Characters per ~token-unit, used to convert `chunk_size`/`overlap` (expressed in
/// token-units) into a character window. A coarse, portable approximation — see
/// SPEC_FULL.md §9 open question on context-length errors this can still trigger.
const CHARS_PER_UNIT: usize = 4;

pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_tokens(512, 50)
    }
}

impl Chunker {
    /// `overlap_chars` is clamped below `max_chars` so the window always advances.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars.saturating_sub(1)),
        }
    }

    pub fn from_tokens(chunk_size: usize, overlap: usize) -> Self {
        Self::new(chunk_size * CHARS_PER_UNIT, overlap * CHARS_PER_UNIT)
    }

    /// Character-bounded sliding window split with overlap, per SPEC_FULL.md §4.3.
    ///
    /// Windows snap their end back to the last newline they contain so chunks break on
    /// line boundaries where possible; whitespace-only windows are skipped.
    pub fn chunk(&self, file_path: &str, content: &str) -> Vec<ChunkInfo> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let len = content.len();
        let line_starts = prefix_line_table(content);
        let advance = self.max_chars.saturating_sub(self.overlap_chars).max(1);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < len {
            let mut end = (start + self.max_chars).min(len);

            if end < len {
                if let Some(newline_offset) = content[start..end].rfind('\n') {
                    let snapped = start + newline_offset + 1;
                    if snapped > start {
                        end = snapped;
                    }
                }
            }

            let slice = &content[start..end];
            if !slice.trim().is_empty() {
                let start_line = line_for_offset(&line_starts, start);
                let end_line = line_for_offset(&line_starts, end.saturating_sub(1).max(start));

                chunks.push(ChunkInfo {
                    id: format!("{file_path}_{index}"),
                    file_path: file_path.to_string(),
                    start_line,
                    end_line,
                    content: slice.to_string(),
                    hash: hash_content(slice),
                });
                index += 1;
            }

            if end >= len {
                break;
            }
            start += advance;
        }

        chunks
    }

    /// Wraps each chunk's `content` with a `"File: <path>\n\n"` prefix. Line numbers are
    /// unaffected — they always refer to the original, unprefixed text (SPEC_FULL.md §9).
    pub fn chunk_with_context(&self, file_path: &str, content: &str) -> Vec<ChunkInfo> {
        self.chunk(file_path, content)
            .into_iter()
            .map(|mut c| {
                c.content = format!("File: {}\n\n{}", c.file_path, c.content);
                c
            })
            .collect()
    }
}

/// Byte offset at which each line (0-indexed) starts.
fn prefix_line_table(content: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, byte) in content.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 1-indexed line number containing byte offset `pos`.
fn line_for_offset(line_starts: &[usize], pos: usize) -> usize {
    match line_starts.binary_search(&pos) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunker = Chunker::new(100, 10);
        assert!(chunker.chunk("f.rs", "").is_empty());
        assert!(chunker.chunk("f.rs", "   \n\t  ").is_empty());
    }

    #[test]
    fn overlap_clamped_below_size_at_construction() {
        let chunker = Chunker::new(50, 200);
        assert!(chunker.overlap_chars < chunker.max_chars);
    }

    #[test]
    fn windows_snap_to_line_boundaries() {
        let content = "a".repeat(10) + "\n" + &"b".repeat(10) + "\n" + &"c".repeat(10);
        let chunker = Chunker::new(15, 0);
        let chunks = chunker.chunk("f.txt", &content);

        assert!(chunks[0].content.ends_with('\n'));
        assert!(!chunks[0].content.contains('b'));
    }

    #[test]
    fn advances_and_covers_whole_file() {
        let content: String = (0..500).map(|i| format!("line {i}\n")).collect();
        let chunker = Chunker::new(200, 20);
        let chunks = chunker.chunk("big.txt", &content);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 1);
        assert!(chunks.iter().all(|c| c.start_line <= c.end_line));

        let reassembled: String = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("");
        for line in content.lines() {
            assert!(reassembled.contains(line));
        }
    }

    #[test]
    fn ids_are_sequential_per_file() {
        let content: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let chunker = Chunker::new(50, 5);
        let chunks = chunker.chunk("f.rs", &content);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("f.rs_{i}"));
        }
    }

    #[test]
    fn chunk_with_context_prefixes_content_but_not_line_numbers() {
        let chunker = Chunker::new(100, 10);
        let chunks = chunker.chunk_with_context("src/a.rs", "fn main() {}\n");
        assert!(chunks[0].content.starts_with("File: src/a.rs\n\n"));
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let chunker = Chunker::new(100, 10);
        let a = chunker.chunk("f.rs", "hello world\n");
        let b = chunker.chunk("f.rs", "hello world\n");
        let c = chunker.chunk("f.rs", "goodbye world\n");
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].hash, c[0].hash);
    }
}
