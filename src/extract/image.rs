//! Image extractor.
//!
//! Images carry no text of their own, so the record content is a short description
//! built from tags inferred from the file name and its directory.

use super::extract_with;
use crate::error::ExtractionError;
use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
use crate::traits::Extractor;
use image::GenericImageView;
use std::path::Path;

const MAX_TAGS: usize = 10;

/// Extractor for image files.
pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }

    fn convert(path: &Path, metadata: &mut ResourceMetadata) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| ExtractionError::Decode {
            kind: "image",
            reason: e.to_string(),
        })?;
        let (width, height) = decoded.dimensions();
        let format = image::guess_format(&bytes)
            .map_or_else(|_| "unknown".to_string(), |f| format!("{f:?}").to_lowercase());

        let tags = infer_tags(path);
        metadata.insert("width", width);
        metadata.insert("height", height);
        metadata.insert("format", format);
        metadata.insert("inferred_tags", tags.clone());

        Ok(format!(
            "Image file: {} (Tags: {})",
            metadata.file_name,
            tags.join(", ")
        ))
    }
}

impl Default for ImageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for ImageExtractor {
    fn name(&self) -> &'static str {
        "image"
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Image
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"]
    }

    fn extract(&self, path: &Path) -> ResourceRecord {
        extract_with(path, ResourceType::Image, Self::convert)
    }
}

/// Lowercase words longer than two characters from the file stem and the parent
/// directory name, in order of first appearance.
pub fn infer_tags(path: &Path) -> Vec<String> {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string());
    let parent = path
        .parent()
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().to_string());

    let mut tags: Vec<String> = Vec::new();
    for part in stem.iter().chain(parent.iter()) {
        for word in part.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if word.chars().count() > 2 && !tags.contains(&word) {
                tags.push(word);
            }
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}
