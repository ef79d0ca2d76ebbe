//! Service layer: job lifecycle operations and event ingestion

pub mod ingest;
pub mod jobs;
