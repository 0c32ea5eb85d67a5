//! API response types shared by the feature routes

pub mod response;

pub use response::{ApiResponse, ErrorResponse};
