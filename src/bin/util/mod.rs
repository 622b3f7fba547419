pub mod ingest;

pub use ingest::{IngestionResult, ResourceIngestor};
