//! Repository layer for database operations.

use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::domain::{AuditLogEntry, Decision, NewAuditEntry, Policy};
use crate::error::{GuardrailsError, GuardrailsResult};
use crate::storage::models::{AuditLogRow, PolicyRow};

/// Repository for all guardrails database operations.
#[derive(Clone)]
pub struct GuardrailsRepository {
    pool: SqlitePool,
}

impl GuardrailsRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the database schema.
    pub async fn init_schema(&self) -> GuardrailsResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                agent_id TEXT,
                name TEXT NOT NULL,
                description TEXT,
                policy_type TEXT NOT NULL,
                rule_json TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_policies_customer ON policies(customer_id);
            CREATE INDEX IF NOT EXISTS idx_policies_agent ON policies(agent_id);
            CREATE INDEX IF NOT EXISTS idx_policies_enabled ON policies(enabled);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                policy_id TEXT,
                timestamp TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                decision TEXT NOT NULL,
                latency_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_logs_agent ON audit_logs(agent_id);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_logs_decision ON audit_logs(decision);
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database schema initialized");
        Ok(())
    }

    // ==================== Policies ====================

    /// Save a policy to the database.
    pub async fn save_policy(&self, policy: &Policy) -> GuardrailsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO policies (
                id, customer_id, agent_id, name, description,
                policy_type, rule_json, enabled, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(policy.id.to_string())
        .bind(policy.customer_id.to_string())
        .bind(policy.agent_id.map(|id| id.to_string()))
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(policy.policy_type.to_string())
        .bind(
            policy
                .rule_json
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(policy.enabled)
        .bind(policy.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a policy by ID.
    pub async fn get_policy(&self, id: Uuid) -> GuardrailsResult<Policy> {
        let row: PolicyRow = sqlx::query_as("SELECT * FROM policies WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GuardrailsError::NotFound(format!("Policy {} not found", id)))?;

        row.try_into()
    }

    /// List policies, optionally filtered by customer, newest first.
    pub async fn list_policies(&self, customer_id: Option<Uuid>) -> GuardrailsResult<Vec<Policy>> {
        let query = if customer_id.is_some() {
            "SELECT * FROM policies WHERE customer_id = ? ORDER BY created_at DESC"
        } else {
            "SELECT * FROM policies ORDER BY created_at DESC"
        };

        let rows: Vec<PolicyRow> = if let Some(customer) = customer_id {
            sqlx::query_as(query)
                .bind(customer.to_string())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as(query).fetch_all(&self.pool).await?
        };

        rows.into_iter()
            .map(|r| r.try_into())
            .collect::<GuardrailsResult<Vec<_>>>()
    }

    /// List every enabled policy across all customers. Feeds the snapshot
    /// rebuild in the policy cache.
    pub async fn list_enabled_policies(&self) -> GuardrailsResult<Vec<Policy>> {
        let rows: Vec<PolicyRow> = sqlx::query_as("SELECT * FROM policies WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| r.try_into())
            .collect::<GuardrailsResult<Vec<_>>>()
    }

    /// Update the mutable fields of a policy. Type and scoping are fixed at
    /// creation.
    pub async fn update_policy(&self, policy: &Policy) -> GuardrailsResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE policies
            SET name = ?, description = ?, rule_json = ?, enabled = ?
            WHERE id = ?
            "#,
        )
        .bind(&policy.name)
        .bind(&policy.description)
        .bind(
            policy
                .rule_json
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(policy.enabled)
        .bind(policy.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GuardrailsError::NotFound(format!(
                "Policy {} not found",
                policy.id
            )));
        }

        Ok(())
    }

    /// Delete a policy.
    pub async fn delete_policy(&self, id: Uuid) -> GuardrailsResult<()> {
        let result = sqlx::query("DELETE FROM policies WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GuardrailsError::NotFound(format!("Policy {} not found", id)));
        }

        Ok(())
    }

    // ==================== Audit Logs ====================

    /// Append an audit entry. The row id is assigned by the database.
    pub async fn append_audit_entry(&self, entry: &NewAuditEntry) -> GuardrailsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                agent_id, policy_id, timestamp, input_hash, decision, latency_ms
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.agent_id.to_string())
        .bind(entry.policy_id.map(|id| id.to_string()))
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.input_hash)
        .bind(entry.decision.to_string())
        .bind(entry.latency_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List audit entries newest first, with optional agent and decision
    /// filters. Returns the page and the total matching count.
    pub async fn list_audit_logs(
        &self,
        agent_id: Option<Uuid>,
        decision: Option<Decision>,
        limit: i64,
        offset: i64,
    ) -> GuardrailsResult<(Vec<AuditLogEntry>, i64)> {
        let mut conditions = Vec::new();

        if agent_id.is_some() {
            conditions.push("agent_id = ?");
        }
        if decision.is_some() {
            conditions.push("decision = ?");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            r#"
            SELECT *
            FROM audit_logs
            {}
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            where_clause
        );

        let count_query = format!(r#"SELECT COUNT(*) FROM audit_logs {}"#, where_clause);

        let mut query_builder = sqlx::query_as::<_, AuditLogRow>(&query);
        let mut count_builder = sqlx::query_as::<_, (i64,)>(&count_query);

        if let Some(agent) = agent_id {
            query_builder = query_builder.bind(agent.to_string());
            count_builder = count_builder.bind(agent.to_string());
        }
        if let Some(d) = decision {
            query_builder = query_builder.bind(d.to_string());
            count_builder = count_builder.bind(d.to_string());
        }

        query_builder = query_builder.bind(limit).bind(offset);

        let rows = query_builder.fetch_all(&self.pool).await?;
        let (total,) = count_builder.fetch_one(&self.pool).await?;

        let logs = rows
            .into_iter()
            .map(|r| r.try_into())
            .collect::<GuardrailsResult<Vec<_>>>()?;

        Ok((logs, total))
    }
}
