use super::extract_with;
use crate::error::ExtractionError;
use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
use crate::traits::Extractor;
use log::debug;
use lopdf::{Dictionary, Document, Object};
use std::path::Path;

const INFO_FIELDS: [(&[u8], &str); 4] = [
    (b"Title", "title"),
    (b"Author", "author"),
    (b"Subject", "subject"),
    (b"Keywords", "keywords"),
];

/// Extractor for PDF documents.
///
/// Text comes from `pdf-extract`; when that yields nothing, pages are read one by
/// one through `lopdf` and prefixed with `Page N:`.
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }

    fn convert(path: &Path, metadata: &mut ResourceMetadata) -> Result<String, ExtractionError> {
        let document = Document::load(path).map_err(|e| ExtractionError::Decode {
            kind: "pdf",
            reason: e.to_string(),
        })?;

        metadata.insert("page_count", document.get_pages().len());
        if let Some(info) = info_dictionary(&document) {
            for (key, field) in INFO_FIELDS {
                if let Ok(Object::String(bytes, _)) = info.get(key) {
                    let value = decode_pdf_string(bytes);
                    if !value.trim().is_empty() {
                        metadata.insert(field, value.trim());
                    }
                }
            }
        }

        let text = match pdf_extract::extract_text(path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => page_text(&document),
            Err(e) => {
                debug!("pdf-extract failed for {:?}: {}, reading pages", path, e);
                page_text(&document)
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(text.to_string())
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Pdf
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn extract(&self, path: &Path) -> ResourceRecord {
        extract_with(path, ResourceType::Pdf, Self::convert)
    }
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a byte order mark or a single-byte encoding.
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn page_text(document: &Document) -> String {
    let mut text = String::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(page) if !page.trim().is_empty() => {
                text.push_str(&format!("Page {}:\n{}\n\n", page_number, page.trim()));
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read page {}: {}", page_number, e),
        }
    }
    text
}
