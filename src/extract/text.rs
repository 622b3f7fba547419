use super::extract_with;
use crate::error::ExtractionError;
use crate::record::{ResourceRecord, ResourceType, normalize_text};
use crate::traits::Extractor;
use std::path::Path;

/// Content longer than this is summarized by sentences rather than by characters.
const SUMMARY_SENTENCE_THRESHOLD: usize = 500;
const SUMMARY_SENTENCES: usize = 3;
const SUMMARY_CHARS: usize = 200;

/// Extractor for plain text, markdown and JSON files.
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn read(path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|e| ExtractionError::Decode {
            kind: "text",
            reason: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !is_json {
            return Ok(text);
        }

        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ExtractionError::Decode {
                kind: "json",
                reason: e.to_string(),
            })?;
        serde_json::to_string_pretty(&value).map_err(|e| ExtractionError::Decode {
            kind: "json",
            reason: e.to_string(),
        })
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Text
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md", "json"]
    }

    fn extract(&self, path: &Path) -> ResourceRecord {
        extract_with(path, ResourceType::Text, |path, metadata| {
            let content = Self::read(path)?;
            metadata.insert("token_count", content.split_whitespace().count());
            metadata.insert("summary", summarize(&content));
            Ok(content)
        })
    }
}

/// First few sentences of long content, or the first characters of short content.
pub fn summarize(content: &str) -> String {
    let text = normalize_text(content);
    if text.chars().count() <= SUMMARY_SENTENCE_THRESHOLD {
        return text.chars().take(SUMMARY_CHARS).collect();
    }

    let mut sentences = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && at_boundary {
            sentences += 1;
            if sentences == SUMMARY_SENTENCES {
                return text[..idx + c.len_utf8()].to_string();
            }
        }
    }
    text
}
