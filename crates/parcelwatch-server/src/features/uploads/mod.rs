//! Upload jobs: create, process, split, reprocess, delete, and poll.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::uploads_routes;
