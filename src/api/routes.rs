//! Route definitions for the API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;
use crate::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::evaluate_guardrails,
        handlers::create_policy,
        handlers::list_policies,
        handlers::get_policy,
        handlers::update_policy,
        handlers::delete_policy,
        handlers::list_audit_logs,
        handlers::health_check,
    ),
    components(schemas(
        crate::api::types::EvaluateRequest,
        crate::api::types::EvaluateResponse,
        crate::api::types::CreatePolicyRequest,
        crate::api::types::UpdatePolicyRequest,
        crate::api::types::ListPoliciesQuery,
        crate::api::types::ListAuditLogsQuery,
        crate::api::types::ListAuditLogsResponse,
        crate::api::types::HealthResponse,
        crate::domain::Policy,
        crate::domain::PolicyType,
        crate::domain::EvaluationVerdict,
        crate::domain::Decision,
        crate::domain::AuditLogEntry,
    )),
    tags(
        (name = "guardrails", description = "Input evaluation endpoints"),
        (name = "policies", description = "Policy management"),
        (name = "audit", description = "Audit trail"),
        (name = "health", description = "Health and status endpoints")
    ),
    info(
        title = "Guardrails API",
        version = "0.1.0",
        description = "Policy evaluation engine - evaluates AI agent inputs against customer guardrail policies",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Evaluation
        .route("/v1/guardrails/evaluate", post(handlers::evaluate_guardrails))
        // Policy management
        .route(
            "/v1/policies",
            post(handlers::create_policy).get(handlers::list_policies),
        )
        .route(
            "/v1/policies/:id",
            get(handlers::get_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        // Audit trail
        .route("/v1/guardrails/audit-logs", get(handlers::list_audit_logs))
        // Health
        .route("/v1/health", get(handlers::health_check))
        .with_state(state)
        // OpenAPI docs
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
