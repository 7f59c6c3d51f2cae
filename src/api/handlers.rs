//! HTTP request handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::api::types::*;
use crate::domain::{templates, Decision, EvaluationRequest, Policy};
use crate::engine::compile;
use crate::error::{GuardrailsError, GuardrailsResult};
use crate::AppState;

/// Evaluate input text against the agent's policies.
///
/// POST /v1/guardrails/evaluate
#[utoipa::path(
    post,
    path = "/v1/guardrails/evaluate",
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Evaluation complete", body = EvaluateResponse),
        (status = 400, description = "Invalid input"),
        (status = 500, description = "Internal error")
    ),
    tag = "guardrails"
)]
pub async fn evaluate_guardrails(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> GuardrailsResult<Json<EvaluateResponse>> {
    tracing::info!(agent_id = %request.agent_id, "Evaluating input");

    let verdict = state
        .orchestrator
        .evaluate(EvaluationRequest {
            customer_id: request.customer_id.unwrap_or_else(Uuid::nil),
            agent_id: request.agent_id,
            input_text: request.input_text,
            context: request.context,
        })
        .await?;

    Ok(Json(EvaluateResponse { verdict }))
}

// ==================== Policy Management ====================

/// Create a new guardrail policy.
///
/// POST /v1/policies
#[utoipa::path(
    post,
    path = "/v1/policies",
    request_body = CreatePolicyRequest,
    responses(
        (status = 201, description = "Policy created", body = Policy),
        (status = 400, description = "Invalid rule configuration"),
        (status = 500, description = "Internal error")
    ),
    tag = "policies"
)]
pub async fn create_policy(
    State(state): State<AppState>,
    Json(request): Json<CreatePolicyRequest>,
) -> GuardrailsResult<(StatusCode, Json<Policy>)> {
    if request.name.trim().is_empty() {
        return Err(GuardrailsError::BadRequest(
            "Policy name is required".to_string(),
        ));
    }

    // Missing rule configuration falls back to the type's default template
    let rule_json = request
        .rule_json
        .unwrap_or_else(|| templates::default_rule_config(request.policy_type));

    let mut policy = Policy::new(
        request.customer_id.unwrap_or_else(Uuid::nil),
        request.agent_id,
        request.name,
        request.policy_type,
        Some(rule_json),
    );
    policy.description = request.description;
    policy.enabled = request.enabled;

    // Reject configurations the compiler cannot turn into a check
    compile(&policy).map_err(|e| GuardrailsError::BadRequest(e.to_string()))?;

    state.repository.save_policy(&policy).await?;
    state.cache.invalidate(policy.id).await?;

    tracing::info!(
        policy_id = %policy.id,
        policy_type = %policy.policy_type,
        name = %policy.name,
        "Policy created"
    );

    Ok((StatusCode::CREATED, Json(policy)))
}

/// List policies with optional customer filtering.
///
/// GET /v1/policies
#[utoipa::path(
    get,
    path = "/v1/policies",
    params(
        ("customer_id" = Option<Uuid>, Query, description = "Filter by owning customer")
    ),
    responses(
        (status = 200, description = "List of policies", body = [Policy]),
        (status = 500, description = "Internal error")
    ),
    tag = "policies"
)]
pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> GuardrailsResult<Json<Vec<Policy>>> {
    let policies = state.repository.list_policies(query.customer_id).await?;

    Ok(Json(policies))
}

/// Get a single policy.
///
/// GET /v1/policies/{id}
#[utoipa::path(
    get,
    path = "/v1/policies/{id}",
    params(
        ("id" = Uuid, Path, description = "Policy ID")
    ),
    responses(
        (status = 200, description = "The policy", body = Policy),
        (status = 404, description = "Policy not found"),
        (status = 500, description = "Internal error")
    ),
    tag = "policies"
)]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GuardrailsResult<Json<Policy>> {
    let policy = state.repository.get_policy(id).await?;

    Ok(Json(policy))
}

/// Update a policy's mutable fields.
///
/// PUT /v1/policies/{id}
#[utoipa::path(
    put,
    path = "/v1/policies/{id}",
    params(
        ("id" = Uuid, Path, description = "Policy ID")
    ),
    request_body = UpdatePolicyRequest,
    responses(
        (status = 200, description = "Updated policy", body = Policy),
        (status = 400, description = "Invalid rule configuration"),
        (status = 404, description = "Policy not found"),
        (status = 500, description = "Internal error")
    ),
    tag = "policies"
)]
pub async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePolicyRequest>,
) -> GuardrailsResult<Json<Policy>> {
    let mut policy = state.repository.get_policy(id).await?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(GuardrailsError::BadRequest(
                "Policy name is required".to_string(),
            ));
        }
        policy.name = name;
    }
    if let Some(description) = request.description {
        policy.description = Some(description);
    }
    if let Some(rule_json) = request.rule_json {
        policy.rule_json = Some(rule_json);
    }
    if let Some(enabled) = request.enabled {
        policy.enabled = enabled;
    }

    compile(&policy).map_err(|e| GuardrailsError::BadRequest(e.to_string()))?;

    state.repository.update_policy(&policy).await?;
    state.cache.invalidate(policy.id).await?;

    tracing::info!(policy_id = %policy.id, "Policy updated");

    Ok(Json(policy))
}

/// Delete a policy.
///
/// DELETE /v1/policies/{id}
#[utoipa::path(
    delete,
    path = "/v1/policies/{id}",
    params(
        ("id" = Uuid, Path, description = "Policy ID")
    ),
    responses(
        (status = 204, description = "Policy deleted"),
        (status = 404, description = "Policy not found"),
        (status = 500, description = "Internal error")
    ),
    tag = "policies"
)]
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GuardrailsResult<StatusCode> {
    state.repository.delete_policy(id).await?;
    state.cache.invalidate(id).await?;

    tracing::info!(policy_id = %id, "Policy deleted");

    Ok(StatusCode::NO_CONTENT)
}

// ==================== Audit Trail ====================

/// List audit entries with optional filtering.
///
/// GET /v1/guardrails/audit-logs
#[utoipa::path(
    get,
    path = "/v1/guardrails/audit-logs",
    params(
        ("agent_id" = Option<Uuid>, Query, description = "Filter by agent"),
        ("decision" = Option<String>, Query, description = "Filter by decision: ALLOWED, WARN or DENIED"),
        ("limit" = Option<i64>, Query, description = "Maximum results (default 20)"),
        ("offset" = Option<i64>, Query, description = "Pagination offset")
    ),
    responses(
        (status = 200, description = "Page of audit entries", body = ListAuditLogsResponse),
        (status = 400, description = "Invalid filter"),
        (status = 500, description = "Internal error")
    ),
    tag = "audit"
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(query): Query<ListAuditLogsQuery>,
) -> GuardrailsResult<Json<ListAuditLogsResponse>> {
    let decision = query
        .decision
        .as_ref()
        .map(|d| d.parse::<Decision>().map_err(GuardrailsError::BadRequest))
        .transpose()?;

    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let (logs, total) = state
        .repository
        .list_audit_logs(query.agent_id, decision, limit, offset)
        .await?;

    Ok(Json(ListAuditLogsResponse {
        logs,
        total,
        limit,
        offset,
    }))
}

// ==================== Health ====================

/// Health check endpoint.
///
/// GET /v1/health
#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Check database connectivity
    let db_status = match sqlx::query("SELECT 1")
        .fetch_one(state.repository.pool())
        .await
    {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
