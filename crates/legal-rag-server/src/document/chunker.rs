use crate::utils::error::ApiError;
use crate::utils::token_estimator;
use once_cell::sync::Lazy;
use regex::Regex;

/// Sentence-terminal punctuation, preferred cut points.
const SENTENCE_BREAKS: &[char] = &['。', '！', '？', '；', '!', '?', ';'];
/// Clause punctuation, second preference.
const CLAUSE_BREAKS: &[char] = &['，', ',', '、'];

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    /// Character offsets into the source text.
    pub start_pos: usize,
    pub end_pos: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
    embedding_max_tokens: usize,
}

impl TextChunker {
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        embedding_max_tokens: usize,
    ) -> Result<Self, ApiError> {
        if chunk_size <= overlap {
            return Err(ApiError::ConfigError(format!(
                "chunk_size ({chunk_size}) must exceed chunk_overlap ({overlap})"
            )));
        }

        Ok(Self {
            chunk_size,
            overlap,
            embedding_max_tokens,
        })
    }

    /// True iff the text's estimated token count exceeds the embedding
    /// model's per-call ceiling.
    pub fn needs_chunking(&self, text: &str) -> bool {
        token_estimator::estimate_tokens(text) > self.embedding_max_tokens
    }

    /// Greedy overlapping split. Each window prefers to end at sentence
    /// punctuation, then clause punctuation, then whitespace, else cuts
    /// hard at chunk_size. The next window starts at
    /// max(start + 1, end - overlap) so progress is guaranteed.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total == 0 {
            return chunks;
        }

        let mut start = 0;

        while start < total {
            let hard_end = std::cmp::min(start + self.chunk_size, total);
            let end = if hard_end < total {
                self.find_boundary(&chars, start, hard_end)
            } else {
                hard_end
            };

            chunks.push(Chunk {
                content: chars[start..end].iter().collect(),
                start_pos: start,
                end_pos: end,
            });

            if end >= total {
                break;
            }

            start = std::cmp::max(start + 1, end.saturating_sub(self.overlap));
        }

        chunks
    }

    /// Scan backwards from the hard cut for the best break, but never give
    /// up more than half the window.
    fn find_boundary(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + self.chunk_size / 2;

        for breaks in [SENTENCE_BREAKS, CLAUSE_BREAKS] {
            if let Some(pos) = (floor..hard_end).rev().find(|&i| breaks.contains(&chars[i])) {
                return pos + 1;
            }
        }

        if let Some(pos) = (floor..hard_end).rev().find(|&i| chars[i].is_whitespace()) {
            return pos + 1;
        }

        hard_end
    }

    /// Truncate a text to the embedding token budget at the best split
    /// point, used before submitting over-long inputs to the embedder.
    pub fn truncate_for_embedding(&self, text: &str) -> String {
        if !self.needs_chunking(text) {
            return text.to_string();
        }

        // token budget -> char budget under the chars/3 estimate
        let char_budget = self.embedding_max_tokens * 3;
        let chars: Vec<char> = text.chars().collect();
        let hard_end = std::cmp::min(char_budget, chars.len());

        let floor = hard_end / 2;
        let end = SENTENCE_BREAKS
            .iter()
            .chain(CLAUSE_BREAKS.iter())
            .filter_map(|b| (floor..hard_end).rev().find(|&i| chars[i] == *b))
            .max()
            .map(|pos| pos + 1)
            .unwrap_or(hard_end);

        chars[..end].iter().collect()
    }
}

static HASH_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}[_\-]?").expect("valid hash prefix regex"));

/// Turn raw segment metadata into a display source name: strip any stored
/// hash prefix and path components, falling back through the known
/// metadata keys. Never returns an empty string.
pub fn clean_source(metadata: &serde_json::Value) -> String {
    for key in ["original_filename", "source", "file_name"] {
        if let Some(raw) = metadata.get(key).and_then(|v| v.as_str()) {
            let cleaned = clean_source_name(raw);
            if !cleaned.is_empty() {
                return cleaned;
            }
        }
    }

    "法律知识库".to_string()
}

fn clean_source_name(raw: &str) -> String {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);

    HASH_PREFIX.replace(name, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> TextChunker {
        TextChunker::new(size, overlap, 500).unwrap()
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(TextChunker::new(100, 100, 500).is_err());
        assert!(TextChunker::new(100, 200, 500).is_err());
        assert!(TextChunker::new(100, 99, 500).is_ok());
    }

    #[test]
    fn test_empty_text() {
        assert!(chunker(100, 10).split("").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunker(100, 10).split("甲方应当按期支付价款。");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_pos, 0);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        // Sentence break inside the second half of the window
        let text = format!("{}。{}", "约".repeat(80), "定".repeat(80));
        let chunks = chunker(100, 10).split(&text);
        assert_eq!(chunks[0].content.chars().last(), Some('。'));
    }

    #[test]
    fn test_falls_back_to_clause_boundary() {
        let text = format!("{}，{}", "约".repeat(80), "定".repeat(80));
        let chunks = chunker(100, 10).split(&text);
        assert_eq!(chunks[0].content.chars().last(), Some('，'));
    }

    #[test]
    fn test_hard_cut_without_punctuation() {
        let text = "条".repeat(250);
        let chunks = chunker(100, 10).split(&text);
        assert_eq!(chunks[0].content.chars().count(), 100);
    }

    #[test]
    fn test_overlap_and_progress() {
        let text = "款".repeat(250);
        let chunks = chunker(100, 20).split(&text);

        for pair in chunks.windows(2) {
            assert!(pair[1].start_pos > pair[0].start_pos, "chunks must advance");
            assert_eq!(pair[0].end_pos - pair[1].start_pos, 20, "overlap preserved");
        }
    }

    #[test]
    fn test_reassembly_property() {
        // Concatenating chunks minus each non-initial chunk's overlap prefix
        // reproduces the source text.
        let text = format!(
            "第一条 甲方应当交付标的物。第二条 乙方应当支付价款，并承担运输费用。{}",
            "第三条 任何一方违约的，应当承担违约责任。".repeat(20)
        );
        let chunks = chunker(120, 30).split(&text);
        assert!(chunks.len() > 1);

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for chunk in &chunks {
            let skip = covered.saturating_sub(chunk.start_pos);
            rebuilt.extend(chunk.content.chars().skip(skip));
            covered = chunk.end_pos;
        }

        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_needs_chunking() {
        let c = chunker(1000, 100);
        assert!(!c.needs_chunking("短文本"));
        assert!(c.needs_chunking(&"条".repeat(1600))); // ~534 tokens
    }

    #[test]
    fn test_truncate_for_embedding_respects_budget() {
        let c = chunker(1000, 100);
        let long = "本合同条款约定如下。".repeat(400);
        let truncated = c.truncate_for_embedding(&long);
        assert!(truncated.chars().count() <= 1500);
        assert_eq!(truncated.chars().last(), Some('。'));
    }

    #[test]
    fn test_clean_source_strips_hash_prefix() {
        let meta = serde_json::json!({
            "source": format!("{}_民法典.pdf", "a".repeat(64)),
        });
        assert_eq!(clean_source(&meta), "民法典.pdf");
    }

    #[test]
    fn test_clean_source_strips_path() {
        let meta = serde_json::json!({ "source": "/data/uploads/合同法.docx" });
        assert_eq!(clean_source(&meta), "合同法.docx");
    }

    #[test]
    fn test_clean_source_fallback_chain() {
        let meta = serde_json::json!({
            "source": "",
            "original_filename": "环境保护法.txt",
        });
        assert_eq!(clean_source(&meta), "环境保护法.txt");

        let empty = serde_json::json!({});
        assert_eq!(clean_source(&empty), "法律知识库");
    }
}
