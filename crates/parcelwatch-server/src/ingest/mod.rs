//! CSV ingestion core
//!
//! Everything between "a raw municipal CSV landed in blob storage" and
//! "property and violation records exist with fresh aggregates":
//!
//! - `sanitize`: storage-safe filename normalization
//! - `locality`: city/state validation and recovery heuristics
//! - `parser`: delimiter detection and row validation into accepted/rejected
//!   streams
//! - `splitter`: per-locality CSV re-serialization for multi-city uploads
//! - `models`: job/staging/property/violation row types and the job status
//!   state set
//! - `pipeline`: the per-job state machine (parse, stage, dedup, create
//!   violations, finalize)
//! - `dedup`: address-key property resolution and upsert planning
//! - `aggregate`: total recomputation of per-property violation rollups
//! - `monitor`: background stuck-job sweeper

pub mod aggregate;
pub mod config;
pub mod dedup;
pub mod locality;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod pipeline;
pub mod sanitize;
pub mod splitter;

pub use config::IngestConfig;
pub use monitor::JobMonitor;
pub use pipeline::UploadPipeline;
