//! Error types for the ingestion pipeline.

pub mod ingest_error;

pub use ingest_error::{IngestError, IngestResult};
