//! Per-modality extractors and directory ingestion.
//!
//! Every extractor returns a [`ResourceRecord`]; a file that cannot be converted
//! still yields a record, with empty content and `metadata.error` set.

pub mod image;
pub mod pdf;
pub mod registry;
pub mod text;
pub mod video;

pub use self::image::ImageExtractor;
pub use pdf::PdfExtractor;
pub use registry::ExtractorRegistry;
pub use text::TextExtractor;
pub use video::VideoExtractor;

use crate::error::ExtractionError;
use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
use log::debug;
use std::path::Path;

/// Builds the base metadata for `path` and runs `convert`, turning any failure into
/// an error record.
pub(crate) fn extract_with<F>(path: &Path, resource_type: ResourceType, convert: F) -> ResourceRecord
where
    F: FnOnce(&Path, &mut ResourceMetadata) -> Result<String, ExtractionError>,
{
    let mut metadata = match ResourceMetadata::from_file(path, resource_type) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Cannot stat {:?}: {}", path, e);
            return ResourceRecord::failed(
                ResourceMetadata::for_path(path, resource_type),
                ExtractionError::Io(e),
            );
        }
    };

    match convert(path, &mut metadata) {
        Ok(content) => ResourceRecord::new(metadata, content),
        Err(e) => {
            debug!("Extraction failed for {:?}: {}", path, e);
            ResourceRecord::failed(metadata, e)
        }
    }
}

/// Base metadata for a file whose extraction never produced a record.
pub(crate) fn failure_record(
    path: &Path,
    resource_type: ResourceType,
    error: ExtractionError,
) -> ResourceRecord {
    let metadata = ResourceMetadata::from_file(path, resource_type)
        .unwrap_or_else(|_| ResourceMetadata::for_path(path, resource_type));
    ResourceRecord::failed(metadata, error)
}
