use eduindex::{ExtractorRegistry, IngestReport, ResourceBackend};
use log::{debug, info};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Default, Serialize)]
pub struct IngestionResult {
    pub report: IngestReport,
    pub total_document_count: usize,
}

impl IngestionResult {
    /// Extraction failures followed by records the backend refused.
    pub fn failed_files(&self) -> impl Iterator<Item = &String> {
        self.report.failed.iter().chain(&self.report.rejected)
    }
}

/// Extracts files with a registry and feeds the records to a backend.
pub struct ResourceIngestor<'a> {
    registry: &'a ExtractorRegistry,
    backend: &'a dyn ResourceBackend,
}

impl<'a> ResourceIngestor<'a> {
    pub fn new(registry: &'a ExtractorRegistry, backend: &'a dyn ResourceBackend) -> Self {
        ResourceIngestor { registry, backend }
    }

    /// Ingests a single file or every supported file under a directory. Files that fail
    /// extraction are still indexed and reported as failures.
    pub fn ingest(&self, path: &Path) -> anyhow::Result<IngestionResult> {
        if !path.exists() {
            anyhow::bail!("Path '{}' does not exist", path.display());
        }
        info!("Starting ingestion with path: {}", path.display());

        let records = if path.is_dir() {
            self.registry.ingest_categories(path)
        } else {
            self.registry.ingest_directory(path)
        };
        let total_files = records.len();
        println!("Extracted {} files", total_files);

        let mut report = IngestReport::default();
        for (index, record) in records.into_iter().enumerate() {
            let progress_percent = ((index + 1) as f32 / total_files as f32 * 100.0) as u32;
            println!(
                "Indexing file {} of {} ({}%): {}",
                index + 1,
                total_files,
                progress_percent,
                record.metadata.file_name
            );

            let file_path = record.file_path().to_string();
            let extraction_error = record.metadata.error.clone().filter(|_| record.has_error());
            match report.index_with(record, |record| self.backend.index(record)) {
                Ok(_) => match extraction_error {
                    Some(error) => println!("✗ Failed to extract: {} - {}", file_path, error),
                    None => debug!("✓ Successfully indexed: {:?}", file_path),
                },
                Err(e) => println!("✗ Failed to index: {} - {}", file_path, e),
            }
        }

        println!(
            "Completed processing {} files ({} added, {} updated, {} failed)",
            total_files,
            report.added,
            report.updated,
            report.failed.len() + report.rejected.len()
        );
        Ok(IngestionResult {
            report,
            total_document_count: self.backend.stats().records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eduindex::{Settings, SimpleBackend};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ingest_reports_backend_totals() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("loops.txt"), "for loops repeat work").unwrap();
        fs::write(docs.join("garbled.txt"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let mut settings = Settings::default();
        settings.index.path = Some(dir.path().join("resources.json"));
        settings.embedding.enabled = false;
        let (backend, warnings) = SimpleBackend::open(&settings);
        assert!(warnings.is_empty());
        let registry = ExtractorRegistry::with_defaults(&settings);
        let ingestor = ResourceIngestor::new(&registry, &backend);

        let first = ingestor.ingest(&docs).unwrap();
        assert_eq!(first.report.added, 2);
        assert_eq!(first.report.updated, 0);
        let failed: Vec<&String> = first.failed_files().collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("garbled.txt"));
        assert_eq!(first.total_document_count, 2);

        let second = ingestor.ingest(&docs).unwrap();
        assert_eq!(second.report.added, 0);
        assert_eq!(second.report.updated, 2);
        assert_eq!(second.total_document_count, 2);
    }
}
