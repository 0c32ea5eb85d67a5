//! Parcelwatch Server Library
//!
//! HTTP service for ingesting municipal code-violation CSV exports into the
//! distressed-property lead database.
//!
//! # Overview
//!
//! - **Upload API**: accepts raw municipal CSV exports, validates them up
//!   front, and stores the source blob in S3-compatible storage
//! - **Ingestion core**: a per-job state machine that parses, stages,
//!   deduplicates, and commits property and violation records in bounded
//!   batches
//! - **Locality detection**: recovers and validates (city, state) pairs from
//!   messy exports, and splits multi-jurisdiction files into per-city jobs
//! - **Aggregation**: total recomputation of per-property violation rollups,
//!   inline and via a resumable backfill
//! - **Job monitor**: background sweeper that reprocesses stuck jobs
//!
//! # Architecture
//!
//! Features are vertical slices (`commands/`, `queries/`, `routes.rs`)
//! over a shared `PgPool` and `Storage` handle; the ingestion core lives in
//! `ingest/` and is driven by the upload feature's command handlers.
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and extraction
//! - **SQLx**: PostgreSQL access and migrations
//! - **aws-sdk-s3**: source blob storage
//!
//! # Example
//!
//! ```no_run
//! use parcelwatch_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("binding {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

// Re-export commonly used types
pub use error::{AppError, AppResult};
