//! Document chunking strategies (§4.7). Three strategies over raw document
//! content, each producing `Chunk`s carrying a contextual-retrieval prefix
//! ready to be embedded alongside the chunk text.

use sibyl_common::document::ChunkType;
use strum::{Display, EnumString};

use crate::errors::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default)]
#[strum(serialize_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    Semantic,
    Sliding,
    Code,
}

/// A minimal view of a crawled document, enough to chunk and build context
/// prefixes from, without pulling in the full `CrawledDocument` row shape.
#[derive(Debug, Clone)]
pub struct ChunkSource<'a> {
    pub title: Option<&'a str>,
    pub url: &'a str,
    pub section_path: &'a [String],
    pub content: &'a str,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub context: Option<String>,
    pub chunk_type: ChunkType,
    pub chunk_index: u32,
    pub start_char: u32,
    pub end_char: u32,
    pub heading_path: Vec<String>,
    pub language: Option<String>,
    pub token_count: u32,
}

#[derive(Debug, Clone)]
struct RawChunk {
    content: String,
    start: u32,
    end: u32,
    heading_path: Vec<String>,
    chunk_type: ChunkType,
    language: Option<String>,
}

/// Max/overlap are configured in characters (the Python original converts
/// tokens to characters at a 1:4 ratio before chunking; this config takes
/// characters directly since Rust callers already pick a concrete budget).
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    max_chunk_chars: u32,
    overlap_chars: u32,
    pub include_context: bool,
}

impl ChunkerConfig {
    /// Construct and validate: the sliding-window step (`max - overlap`)
    /// must be positive or the window never advances.
    pub fn new(max_chunk_chars: u32, overlap_chars: u32, include_context: bool) -> Result<Self, IngestError> {
        if overlap_chars >= max_chunk_chars {
            return Err(IngestError::InvalidChunkerConfig(format!(
                "overlap_chars ({overlap_chars}) must be < max_chunk_chars ({max_chunk_chars})"
            )));
        }
        Ok(Self {
            max_chunk_chars,
            overlap_chars,
            include_context,
        })
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        // 1200 tokens * 4 chars/token, 200 token overlap, matching the
        // source's default `chunk_max_tokens`/`chunk_overlap_tokens`.
        Self::new(4800, 800, true).expect("default chunker config is always valid")
    }
}

pub struct DocumentChunker {
    config: ChunkerConfig,
}

impl DocumentChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn chunk_document(&self, document: &ChunkSource<'_>, strategy: ChunkStrategy) -> Vec<Chunk> {
        let content = document.content;
        if content.trim().is_empty() {
            return Vec::new();
        }

        let raw_chunks = match strategy {
            ChunkStrategy::Code => self.chunk_code_aware(content),
            ChunkStrategy::Sliding => self.chunk_sliding_window(content),
            ChunkStrategy::Semantic => self.chunk_semantic(content),
        };

        let doc_context = self.build_document_context(document);

        raw_chunks
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                let context = self
                    .config
                    .include_context
                    .then(|| self.generate_chunk_context(&doc_context, &raw));
                let token_count = (raw.content.len() as u32) / 4;
                Chunk {
                    content: raw.content,
                    context,
                    chunk_type: raw.chunk_type,
                    chunk_index: i as u32,
                    start_char: raw.start,
                    end_char: raw.end,
                    heading_path: raw.heading_path,
                    language: raw.language,
                    token_count,
                }
            })
            .collect()
    }

    fn chunk_semantic(&self, content: &str) -> Vec<RawChunk> {
        let mut chunks = Vec::new();
        let mut current_headings: Vec<String> = Vec::new();
        let mut current_chunk: Vec<&str> = Vec::new();
        let mut current_start: u32 = 0;
        let mut char_pos: u32 = 0;

        let lines: Vec<&str> = content.split('\n').collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            let line_len = (line.len() + 1) as u32;

            if line.starts_with('#') {
                flush_text(&mut chunks, &mut current_chunk, current_start, char_pos, &current_headings);
                current_start = char_pos;

                let level = line.len() - line.trim_start_matches('#').len();
                let heading_text = line.trim_start_matches('#').trim().to_string();
                while current_headings.len() >= level && !current_headings.is_empty() {
                    current_headings.pop();
                }
                current_headings.push(heading_text.clone());

                chunks.push(RawChunk {
                    content: heading_text,
                    start: char_pos,
                    end: char_pos + line_len,
                    heading_path: current_headings.clone(),
                    chunk_type: ChunkType::Heading,
                    language: None,
                });
                current_start = char_pos + line_len;
            } else if line.starts_with("```") {
                flush_text(&mut chunks, &mut current_chunk, current_start, char_pos, &current_headings);

                let lang = line.trim_start_matches("```").split_whitespace().next().map(str::to_string);
                let code_start = char_pos;
                let mut code_lines = vec![line];
                char_pos += line_len;
                i += 1;
                while i < lines.len() {
                    let next_line = lines[i];
                    code_lines.push(next_line);
                    char_pos += (next_line.len() + 1) as u32;
                    if next_line.starts_with("```") {
                        break;
                    }
                    i += 1;
                }
                chunks.push(RawChunk {
                    content: code_lines.join("\n"),
                    start: code_start,
                    end: char_pos,
                    heading_path: current_headings.clone(),
                    chunk_type: ChunkType::Code,
                    language: lang,
                });
                current_start = char_pos;
                i += 1;
                continue;
            } else if line.trim().is_empty() && !current_chunk.is_empty() {
                let chunk_text = current_chunk.join("\n").trim().to_string();
                if chunk_text.len() as u32 > self.config.max_chunk_chars / 2 {
                    chunks.push(RawChunk {
                        content: chunk_text,
                        start: current_start,
                        end: char_pos,
                        heading_path: current_headings.clone(),
                        chunk_type: ChunkType::Text,
                        language: None,
                    });
                    current_chunk.clear();
                    current_start = char_pos + line_len;
                } else {
                    current_chunk.push(line);
                }
            } else {
                current_chunk.push(line);
                let joined_len: usize = current_chunk.iter().map(|l| l.len() + 1).sum();
                if joined_len as u32 > self.config.max_chunk_chars {
                    let chunk_text = current_chunk.join("\n").trim().to_string();
                    chunks.push(RawChunk {
                        content: chunk_text,
                        start: current_start,
                        end: char_pos + line_len,
                        heading_path: current_headings.clone(),
                        chunk_type: ChunkType::Text,
                        language: None,
                    });
                    current_chunk.clear();
                    current_start = char_pos + line_len;
                }
            }

            char_pos += line_len;
            i += 1;
        }

        flush_text(&mut chunks, &mut current_chunk, current_start, char_pos, &current_headings);
        self.merge_small_chunks(chunks)
    }

    fn chunk_sliding_window(&self, content: &str) -> Vec<RawChunk> {
        let bytes = content.as_bytes();
        let len = bytes.len() as u32;
        let mut chunks = Vec::new();
        let mut start: u32 = 0;
        let step = self
            .config
            .max_chunk_chars
            .saturating_sub(self.config.overlap_chars)
            .max(1);

        while start < len {
            let mut end = (start + self.config.max_chunk_chars).min(len);
            if end < len {
                let search_floor = start.saturating_add(step).max(end.saturating_sub(100));
                let mut cursor = end.saturating_sub(1);
                while cursor > search_floor {
                    if bytes[cursor as usize] == b' ' {
                        end = cursor;
                        break;
                    }
                    cursor -= 1;
                }
            }
            let slice = &content[start as usize..end as usize];
            let trimmed = slice.trim();
            if !trimmed.is_empty() {
                chunks.push(RawChunk {
                    content: trimmed.to_string(),
                    start,
                    end,
                    heading_path: Vec::new(),
                    chunk_type: ChunkType::Text,
                    language: None,
                });
            }
            start += step;
        }
        chunks
    }

    fn chunk_code_aware(&self, content: &str) -> Vec<RawChunk> {
        let fence = regex::Regex::new(r"(?s)```.*?```").expect("static fence regex is valid");
        let mut chunks = Vec::new();
        let mut char_pos: u32 = 0;
        let mut last_end = 0usize;

        for m in fence.find_iter(content) {
            if m.start() > last_end {
                let prose = &content[last_end..m.start()];
                if !prose.trim().is_empty() {
                    for mut rc in self.chunk_semantic(prose) {
                        rc.start += char_pos;
                        rc.end += char_pos;
                        chunks.push(rc);
                    }
                }
                char_pos += (m.start() - last_end) as u32;
            }

            let segment = m.as_str();
            let lang = segment
                .trim_start_matches("```")
                .split_whitespace()
                .next()
                .map(str::to_string);

            if segment.len() as u32 <= self.config.max_chunk_chars * 2 {
                chunks.push(RawChunk {
                    content: segment.to_string(),
                    start: char_pos,
                    end: char_pos + segment.len() as u32,
                    heading_path: Vec::new(),
                    chunk_type: ChunkType::Code,
                    language: lang,
                });
            } else {
                let mut chunk_start = char_pos;
                let mut current_lines: Vec<&str> = Vec::new();
                for line in segment.split('\n') {
                    current_lines.push(line);
                    let current_len: usize = current_lines.iter().map(|l| l.len() + 1).sum();
                    if current_len as u32 > self.config.max_chunk_chars {
                        chunks.push(RawChunk {
                            content: current_lines.join("\n"),
                            start: chunk_start,
                            end: chunk_start + current_len as u32,
                            heading_path: Vec::new(),
                            chunk_type: ChunkType::Code,
                            language: lang.clone(),
                        });
                        chunk_start += current_len as u32 + 1;
                        current_lines.clear();
                    }
                }
                if !current_lines.is_empty() {
                    let joined = current_lines.join("\n");
                    let end = chunk_start + joined.len() as u32;
                    chunks.push(RawChunk {
                        content: joined,
                        start: chunk_start,
                        end,
                        heading_path: Vec::new(),
                        chunk_type: ChunkType::Code,
                        language: lang,
                    });
                }
            }

            char_pos += segment.len() as u32;
            last_end = m.end();
        }

        if last_end < content.len() {
            let prose = &content[last_end..];
            if !prose.trim().is_empty() {
                for mut rc in self.chunk_semantic(prose) {
                    rc.start += char_pos;
                    rc.end += char_pos;
                    chunks.push(rc);
                }
            }
        }

        chunks
    }

    fn merge_small_chunks(&self, chunks: Vec<RawChunk>) -> Vec<RawChunk> {
        if chunks.is_empty() {
            return chunks;
        }
        let min_size = self.config.max_chunk_chars / 4;
        let mut merged = Vec::new();
        let mut current = chunks[0].clone();

        for chunk in chunks.into_iter().skip(1) {
            let can_merge = chunk.chunk_type == current.chunk_type
                && (current.content.len() as u32) < min_size
                && (current.content.len() + chunk.content.len()) as u32 <= self.config.max_chunk_chars;

            if can_merge {
                current.content.push_str("\n\n");
                current.content.push_str(&chunk.content);
                current.end = chunk.end;
            } else {
                if !current.content.trim().is_empty() {
                    merged.push(current);
                }
                current = chunk;
            }
        }
        if !current.content.trim().is_empty() {
            merged.push(current);
        }
        merged
    }

    fn build_document_context(&self, document: &ChunkSource<'_>) -> String {
        let mut parts = Vec::new();
        if let Some(title) = document.title {
            parts.push(format!("Document: {title}"));
        }
        if !document.section_path.is_empty() {
            parts.push(format!("Section: {}", document.section_path.join(" > ")));
        }
        parts.push(format!("Source: {}", document.url));
        parts.join(" | ")
    }

    fn generate_chunk_context(&self, doc_context: &str, chunk: &RawChunk) -> String {
        let mut parts = vec![doc_context.to_string()];
        if !chunk.heading_path.is_empty() {
            parts.push(format!("Section: {}", chunk.heading_path.join(" > ")));
        }
        match chunk.chunk_type {
            ChunkType::Code => {
                let lang = chunk.language.as_deref().unwrap_or("code");
                parts.push(format!("Content type: {lang} code example"));
            }
            ChunkType::Heading => parts.push("Content type: section heading".to_string()),
            ChunkType::Text => {}
        }
        parts.join(" | ")
    }
}

fn flush_text(
    chunks: &mut Vec<RawChunk>,
    current_chunk: &mut Vec<&str>,
    start: u32,
    end: u32,
    headings: &[String],
) {
    if current_chunk.is_empty() {
        return;
    }
    let text = current_chunk.join("\n").trim().to_string();
    if !text.is_empty() {
        chunks.push(RawChunk {
            content: text,
            start,
            end,
            heading_path: headings.to_vec(),
            chunk_type: ChunkType::Text,
            language: None,
        });
    }
    current_chunk.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        assert!(ChunkerConfig::new(100, 100, true).is_err());
        assert!(ChunkerConfig::new(100, 99, true).is_ok());
    }

    #[test]
    fn semantic_chunking_splits_headings_and_code() {
        let chunker = DocumentChunker::new(ChunkerConfig::new(500, 50, true).unwrap());
        let content = "# Title\n\nSome prose here.\n\n```rust\nfn main() {}\n```\n";
        let doc = ChunkSource {
            title: Some("Guide"),
            url: "https://example.com/guide",
            section_path: &[],
            content,
        };
        let chunks = chunker.chunk_document(&doc, ChunkStrategy::Semantic);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Heading));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Code && c.language.as_deref() == Some("rust")));
    }

    #[test]
    fn contextual_prefix_includes_title_section_and_source() {
        let chunker = DocumentChunker::new(ChunkerConfig::new(500, 50, true).unwrap());
        let doc = ChunkSource {
            title: Some("Guide"),
            url: "https://example.com/guide",
            section_path: &[],
            content: "Some content that is long enough to form a chunk on its own merits.",
        };
        let chunks = chunker.chunk_document(&doc, ChunkStrategy::Semantic);
        let context = chunks[0].context.as_ref().unwrap();
        assert!(context.contains("Document: Guide"));
        assert!(context.contains("Source: https://example.com/guide"));
    }

    #[test]
    fn sliding_window_respects_overlap_and_snaps_to_whitespace() {
        let chunker = DocumentChunker::new(ChunkerConfig::new(20, 5, false).unwrap());
        let content = "word ".repeat(20);
        let doc = ChunkSource {
            title: None,
            url: "file:///x",
            section_path: &[],
            content: &content,
        };
        let chunks = chunker.chunk_document(&doc, ChunkStrategy::Sliding);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.content.is_empty());
        }
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let chunker = DocumentChunker::new(ChunkerConfig::default());
        let doc = ChunkSource {
            title: None,
            url: "https://example.com",
            section_path: &[],
            content: "   ",
        };
        assert!(chunker.chunk_document(&doc, ChunkStrategy::Semantic).is_empty());
    }
}
