//! Rich-text block documents for note elements.
//!
//! A note's content is the JSON serialization of a block list. The engine
//! never stores an undefined/unparseable note body: normalization coerces
//! anything invalid to an empty-paragraph document.
//!
//! Conversions are intentionally minimal:
//! - plain text → one paragraph per line
//! - markdown → `#`/`##`/`###` headings, `-`/`*` bullets, paragraphs;
//!   blank lines dropped

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rich-text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoteBlock {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    Bullet { text: String },
}

/// The canonical empty note: a single empty paragraph.
pub fn empty_document() -> Vec<NoteBlock> {
    vec![NoteBlock::Paragraph {
        text: String::new(),
    }]
}

/// Serialize a block list to its canonical string form.
pub fn serialize_blocks(blocks: &[NoteBlock]) -> String {
    serde_json::to_string(blocks).unwrap_or_else(|_| serialize_blocks(&empty_document()))
}

/// Parse serialized block content. `None` if invalid or empty.
pub fn parse_blocks(content: &str) -> Option<Vec<NoteBlock>> {
    let blocks: Vec<NoteBlock> = serde_json::from_str(content).ok()?;
    if blocks.is_empty() {
        return None;
    }
    Some(blocks)
}

/// Coerce possibly-missing/invalid content to valid serialized blocks.
pub fn normalize_content(content: Option<&str>) -> String {
    match content.and_then(parse_blocks) {
        Some(blocks) => serialize_blocks(&blocks),
        None => serialize_blocks(&empty_document()),
    }
}

/// Convert plain text: one paragraph block per line.
pub fn blocks_from_text(text: &str) -> Vec<NoteBlock> {
    let blocks: Vec<NoteBlock> = text
        .lines()
        .map(|line| NoteBlock::Paragraph {
            text: line.to_string(),
        })
        .collect();
    if blocks.is_empty() {
        empty_document()
    } else {
        blocks
    }
}

/// Minimal markdown conversion. Blank lines are dropped.
pub fn blocks_from_markdown(markdown: &str) -> Vec<NoteBlock> {
    let mut blocks = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = heading_text(trimmed) {
            blocks.push(NoteBlock::Heading {
                level: rest.0,
                text: rest.1.to_string(),
            });
        } else if let Some(rest) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            blocks.push(NoteBlock::Bullet {
                text: rest.trim().to_string(),
            });
        } else {
            blocks.push(NoteBlock::Paragraph {
                text: trimmed.to_string(),
            });
        }
    }
    if blocks.is_empty() {
        empty_document()
    } else {
        blocks
    }
}

/// `### Title` → `Some((3, "Title"))`, up to level 3.
fn heading_text(line: &str) -> Option<(u8, &str)> {
    for level in (1..=3u8).rev() {
        let prefix = "#".repeat(level as usize);
        if let Some(rest) = line.strip_prefix(&prefix) {
            if let Some(text) = rest.strip_prefix(' ') {
                return Some((level, text.trim()));
            }
        }
    }
    None
}

/// Session-scoped memoization of block → HTML rendering.
///
/// Replaces a process-wide singleton cache: each owner creates its own
/// instance and clears it on teardown.
#[derive(Debug, Default)]
pub struct NoteRenderCache {
    cache: HashMap<String, String>,
}

impl NoteRenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render serialized block content to HTML, memoized by content string.
    pub fn render_html(&mut self, content: &str) -> String {
        if let Some(html) = self.cache.get(content) {
            return html.clone();
        }
        let blocks = parse_blocks(content).unwrap_or_else(empty_document);
        let html = render_blocks_html(&blocks);
        self.cache.insert(content.to_string(), html.clone());
        html
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

fn render_blocks_html(blocks: &[NoteBlock]) -> String {
    let mut html = String::new();
    let mut in_list = false;
    for block in blocks {
        match block {
            NoteBlock::Bullet { text } => {
                if !in_list {
                    html.push_str("<ul>");
                    in_list = true;
                }
                html.push_str(&format!("<li>{}</li>", escape_html(text)));
            }
            other => {
                if in_list {
                    html.push_str("</ul>");
                    in_list = false;
                }
                match other {
                    NoteBlock::Heading { level, text } => {
                        let level = (*level).clamp(1, 3);
                        html.push_str(&format!("<h{level}>{}</h{level}>", escape_html(text)));
                    }
                    NoteBlock::Paragraph { text } => {
                        html.push_str(&format!("<p>{}</p>", escape_html(text)));
                    }
                    NoteBlock::Bullet { .. } => unreachable!(),
                }
            }
        }
    }
    if in_list {
        html.push_str("</ul>");
    }
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_invalid_content_yields_empty_paragraph() {
        let normalized = normalize_content(Some("not json"));
        let blocks = parse_blocks(&normalized).unwrap();
        assert_eq!(blocks, empty_document());

        let normalized = normalize_content(None);
        assert_eq!(parse_blocks(&normalized).unwrap(), empty_document());
    }

    #[test]
    fn test_normalize_preserves_valid_content() {
        let original = serialize_blocks(&[NoteBlock::Heading {
            level: 2,
            text: "Plan".to_string(),
        }]);
        assert_eq!(normalize_content(Some(&original)), original);
    }

    #[test]
    fn test_blocks_from_text_one_paragraph_per_line() {
        let blocks = blocks_from_text("first\nsecond");
        assert_eq!(
            blocks,
            vec![
                NoteBlock::Paragraph { text: "first".to_string() },
                NoteBlock::Paragraph { text: "second".to_string() },
            ]
        );
    }

    #[test]
    fn test_blocks_from_empty_text() {
        assert_eq!(blocks_from_text(""), empty_document());
    }

    #[test]
    fn test_markdown_heading_bullets_order() {
        let blocks = blocks_from_markdown("# Title\n- First\n- Second");
        assert_eq!(
            blocks,
            vec![
                NoteBlock::Heading { level: 1, text: "Title".to_string() },
                NoteBlock::Bullet { text: "First".to_string() },
                NoteBlock::Bullet { text: "Second".to_string() },
            ]
        );
    }

    #[test]
    fn test_markdown_heading_levels_and_blank_lines() {
        let blocks = blocks_from_markdown("## Sub\n\n### Deep\n\nplain");
        assert_eq!(
            blocks,
            vec![
                NoteBlock::Heading { level: 2, text: "Sub".to_string() },
                NoteBlock::Heading { level: 3, text: "Deep".to_string() },
                NoteBlock::Paragraph { text: "plain".to_string() },
            ]
        );
    }

    #[test]
    fn test_markdown_star_bullets() {
        let blocks = blocks_from_markdown("* one\n* two");
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0], NoteBlock::Bullet { .. }));
    }

    #[test]
    fn test_render_cache_memoizes_and_clears() {
        let mut cache = NoteRenderCache::new();
        let content = serialize_blocks(&[
            NoteBlock::Heading { level: 1, text: "T".to_string() },
            NoteBlock::Bullet { text: "a < b".to_string() },
            NoteBlock::Bullet { text: "b".to_string() },
            NoteBlock::Paragraph { text: "done".to_string() },
        ]);

        let html = cache.render_html(&content);
        assert_eq!(html, "<h1>T</h1><ul><li>a &lt; b</li><li>b</li></ul><p>done</p>");
        assert_eq!(cache.len(), 1);

        // Second render hits the cache.
        assert_eq!(cache.render_html(&content), html);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
