//! Properties: lead-facing reads and the aggregate backfill.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::properties_routes;
