use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

/// Modality of an indexed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Text,
    Pdf,
    Video,
    Image,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Text,
        ResourceType::Pdf,
        ResourceType::Video,
        ResourceType::Image,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Text => "text",
            ResourceType::Pdf => "pdf",
            ResourceType::Video => "video",
            ResourceType::Image => "image",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ResourceType::Text),
            "pdf" => Ok(ResourceType::Pdf),
            "video" => Ok(ResourceType::Video),
            "image" => Ok(ResourceType::Image),
            other => Err(format!(
                "unknown resource type '{}', expected one of text, pdf, video, image",
                other
            )),
        }
    }
}

/// Descriptive fields shared by every record, plus modality-specific extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub file_name: String,
    /// Unique identifier of the record within a store.
    pub file_path: String,
    /// Lowercase extension with a leading dot, e.g. `.pdf`.
    pub file_type: String,
    pub size_bytes: u64,
    /// Modification time in seconds since the Unix epoch.
    pub last_modified: f64,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Modality-specific fields such as `page_count` or `inferred_tags`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceMetadata {
    /// Builds metadata for `path` without touching the filesystem.
    pub fn for_path(path: &Path, resource_type: ResourceType) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_type = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Self {
            file_name,
            file_path: path.to_string_lossy().to_string(),
            file_type,
            size_bytes: 0,
            last_modified: 0.0,
            resource_type,
            error: None,
            indexed_at: None,
            updated_at: None,
            extra: Map::new(),
        }
    }

    /// Builds metadata for `path` and fills size and modification time from disk.
    pub fn from_file(path: &Path, resource_type: ResourceType) -> std::io::Result<Self> {
        let mut metadata = Self::for_path(path, resource_type);
        let fs_metadata = std::fs::metadata(path)?;
        metadata.size_bytes = fs_metadata.len();
        metadata.last_modified = fs_metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Ok(metadata)
    }

    /// Sets a modality-specific field.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Canonical unit of indexed content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub metadata: ResourceMetadata,
    content: String,
    processed_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl ResourceRecord {
    pub fn new(metadata: ResourceMetadata, content: impl Into<String>) -> Self {
        let content = content.into();
        let processed_content = normalize_text(&content);
        Self {
            metadata,
            content,
            processed_content,
            embedding: None,
        }
    }

    /// A record for a file that could not be extracted.
    pub fn failed(mut metadata: ResourceMetadata, error: impl fmt::Display) -> Self {
        metadata.error = Some(error.to_string());
        Self::new(metadata, String::new())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn processed_content(&self) -> &str {
        &self.processed_content
    }

    /// Replaces the content and re-derives the processed view.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.refresh_processed_content();
    }

    /// Recomputes `processed_content` from `content`.
    pub fn refresh_processed_content(&mut self) {
        self.processed_content = normalize_text(&self.content);
    }

    pub fn file_path(&self) -> &str {
        &self.metadata.file_path
    }

    pub fn resource_type(&self) -> ResourceType {
        self.metadata.resource_type
    }

    /// True when extraction failed; such records are never returned by searches.
    pub fn has_error(&self) -> bool {
        self.metadata
            .error
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }
}

/// Collapses every run of whitespace into a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
