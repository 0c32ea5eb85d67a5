//! Feature modules, organized as vertical slices
//!
//! Each feature owns its commands, queries, and routes. Uploads need the
//! full state (database, storage, ingest tuning); properties only read the
//! database.

pub mod properties;
pub mod uploads;

use axum::Router;
use sqlx::PgPool;

use crate::ingest::IngestConfig;
use crate::storage::Storage;

/// Shared state handed to feature routers.
#[derive(Clone)]
pub struct FeatureState {
    pub db: PgPool,
    pub storage: Storage,
    pub ingest: IngestConfig,
}

/// Assemble the `/api/v1` router.
pub fn router(state: FeatureState) -> Router {
    Router::new()
        .nest(
            "/uploads",
            uploads::uploads_routes().with_state(state.clone()),
        )
        .nest(
            "/properties",
            properties::properties_routes().with_state(state.db.clone()),
        )
}
