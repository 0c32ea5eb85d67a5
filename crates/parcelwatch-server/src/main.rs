//! Parcelwatch Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parcelwatch_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use parcelwatch_server::{
    config::Config,
    db,
    error::AppError,
    features,
    ingest::{IngestConfig, JobMonitor},
    middleware,
    storage::{config::StorageConfig, Storage},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("parcelwatch-server".to_string())
        .filter_directives(
            "parcelwatch_server=debug,tower_http=debug,axum=trace,sqlx=info".to_string(),
        )
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting Parcelwatch Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let db_pool = db::create_pool(&config.database).await?;
    info!("Database connection pool established");

    // Initialize S3/MinIO storage
    let storage_config = StorageConfig::from_env()?;
    let storage = Storage::new(storage_config).await?;
    info!("Storage client initialized");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Start the stuck-job monitor if enabled
    let ingest_config = IngestConfig::from_env()?;
    let _monitor_handle = if ingest_config.monitor_enabled {
        let monitor = JobMonitor::new(
            db_pool.clone(),
            storage.clone(),
            ingest_config.clone(),
        );
        Some(monitor.start())
    } else {
        info!("Stuck-job monitor is disabled (INGEST_MONITOR_ENABLED=false)");
        None
    };

    // Build the application router
    let feature_state = features::FeatureState {
        db: db_pool.clone(),
        storage,
        ingest: ingest_config,
    };
    let app = create_router(db_pool, feature_state, &config);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(db: PgPool, feature_state: features::FeatureState, config: &Config) -> Router {
    let feature_routes = features::router(feature_state);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .with_state(db)
        .nest("/api/v1", feature_routes)
        .fallback(fallback_handler)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Catch-all for unmatched routes
async fn fallback_handler(uri: axum::http::Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri))
}

/// Health check handler
async fn health_check(State(db): State<PgPool>) -> Result<Response, StatusCode> {
    match db::health_check(&db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Platform statistics
async fn get_stats(State(db): State<PgPool>) -> impl IntoResponse {
    let jobs = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM upload_jobs").fetch_one(&db);
    let properties =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM properties").fetch_one(&db);
    let violations =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM violations").fetch_one(&db);

    let (jobs_res, properties_res, violations_res) = tokio::join!(jobs, properties, violations);

    match (jobs_res, properties_res, violations_res) {
        (Ok(jobs), Ok(properties), Ok(violations)) => (
            StatusCode::OK,
            Json(json!({
                "upload_jobs": jobs,
                "properties": properties,
                "violations": violations
            })),
        )
            .into_response(),
        _ => {
            tracing::error!("Failed to fetch stats from database");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch statistics" })),
            )
                .into_response()
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
