//! Guardrails - policy evaluation engine for AI agents
//!
//! This service evaluates inputs addressed to AI agents against customer
//! guardrail policies before they reach the model, and keeps an audit
//! trail of every decision.

use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use tokio::net::TcpListener;

mod api;
mod config;
mod domain;
mod engine;
mod error;
mod logging;
mod storage;

use crate::api::build_router;
use crate::config::Config;
use crate::engine::{
    AuditEmitter, ContentClassifier, EvaluationOrchestrator, HttpClassifier, PolicyCache,
};
use crate::storage::GuardrailsRepository;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The evaluation orchestrator.
    pub orchestrator: Arc<EvaluationOrchestrator>,
    /// Compiled-policy cache, invalidated on policy writes.
    pub cache: Arc<PolicyCache>,
    /// Database repository.
    pub repository: GuardrailsRepository,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    logging::init();

    tracing::info!("Starting guardrails engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        database = %config.database.url,
        classifier_enabled = %config.classifier.enabled,
        "Configuration loaded"
    );

    // Connect to database
    let pool = SqlitePool::connect(&config.database.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to database");
            anyhow::anyhow!("Database connection error: {}", e)
        })?;

    // Initialize repository and schema
    let repository = GuardrailsRepository::new(pool);
    repository.init_schema().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize database schema");
        anyhow::anyhow!("Schema initialization error: {}", e)
    })?;

    tracing::info!("Database connected and schema initialized");

    // Compile stored policies into the in-memory snapshot
    let cache = Arc::new(PolicyCache::new(repository.clone()));
    let compiled = cache.reload().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build policy snapshot");
        anyhow::anyhow!("Policy snapshot error: {}", e)
    })?;

    tracing::info!(policies = compiled, "Policy snapshot loaded");

    // Content classifier for content_safety policies
    if config.classifier.enabled {
        tracing::info!(
            endpoint = %config.classifier.endpoint,
            timeout_ms = config.classifier.timeout_ms,
            "Content classifier enabled"
        );
    } else {
        tracing::info!("Content classifier disabled");
    }
    let classifier: Arc<dyn ContentClassifier> =
        Arc::new(HttpClassifier::new(config.classifier.clone()));

    // Audit pipeline: handlers enqueue, the writer persists in the background
    let emitter = AuditEmitter::spawn(repository.clone(), config.audit.clone());

    let orchestrator = Arc::new(EvaluationOrchestrator::new(
        cache.clone(),
        classifier,
        emitter,
        config.engine.clone(),
    ));

    // Build application state
    let state = AppState {
        orchestrator,
        cache,
        repository,
    };

    // Build router
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(address = %addr, "Server listening");
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
