//! Compiled-policy cache.
//!
//! Holds an immutable snapshot of every enabled, compiled policy, grouped
//! by customer and pre-sorted in resolution order. Readers clone the
//! snapshot handle under a briefly-held lock; rebuilds happen outside the
//! lock and land as a single pointer swap, so in-flight evaluations keep
//! the snapshot they started with. Reload and invalidation run serially,
//! and a swap never carries a store read older than the swap before it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{GuardrailsError, GuardrailsResult};
use crate::storage::GuardrailsRepository;

use super::compiler::{compile, config_hash, CompiledCheck};

#[derive(Default)]
struct Snapshot {
    /// Per customer, sorted by (type priority, created_at, policy id).
    customers: HashMap<Uuid, Vec<Arc<CompiledCheck>>>,
}

/// Snapshot-swapping cache over the policy store.
pub struct PolicyCache {
    repository: GuardrailsRepository,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Held across fetch, compile, and swap by the mutating paths.
    rebuild: Mutex<()>,
}

impl PolicyCache {
    /// Create an empty cache. Call [`reload`](Self::reload) to populate it.
    pub fn new(repository: GuardrailsRepository) -> Self {
        Self {
            repository,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            rebuild: Mutex::new(()),
        }
    }

    /// Rebuild the whole snapshot from the store.
    ///
    /// Policies that fail to compile are skipped with a warning; they never
    /// poison the snapshot or abort evaluation traffic. Returns the number
    /// of compiled checks.
    pub async fn reload(&self) -> GuardrailsResult<usize> {
        let _rebuild = self.rebuild.lock().await;
        let policies = self.repository.list_enabled_policies().await?;

        let mut customers: HashMap<Uuid, Vec<Arc<CompiledCheck>>> = HashMap::new();
        let mut compiled = 0usize;
        let mut skipped = 0usize;

        for policy in &policies {
            match compile(policy) {
                Ok(check) => {
                    customers
                        .entry(policy.customer_id)
                        .or_default()
                        .push(Arc::new(check));
                    compiled += 1;
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        policy_id = %policy.id,
                        policy_name = %policy.name,
                        error = %e,
                        "Skipping policy that failed to compile"
                    );
                }
            }
        }

        for checks in customers.values_mut() {
            checks.sort_by_key(|c| c.sort_key());
        }

        *self.snapshot.write().unwrap() = Arc::new(Snapshot { customers });

        if skipped > 0 {
            tracing::warn!(skipped, "Policies skipped during snapshot reload");
        }
        tracing::info!(compiled, "Policy snapshot reloaded");
        Ok(compiled)
    }

    /// The customer's checks that apply to `agent_id`, in resolution order.
    ///
    /// Unknown agents are served the customer's global policies. The
    /// returned checks belong to the snapshot current at call time and stay
    /// valid across later swaps.
    pub fn resolve(&self, customer_id: Uuid, agent_id: Uuid) -> Vec<Arc<CompiledCheck>> {
        let snapshot = self.snapshot.read().unwrap().clone();

        match snapshot.customers.get(&customer_id) {
            Some(checks) => checks
                .iter()
                .filter(|c| c.applies_to(agent_id))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Recompile one policy from the store and swap in an updated snapshot.
    ///
    /// Covers create, update, disable, and delete: a policy that is gone or
    /// disabled simply drops out. Recompilation is skipped when the rule
    /// configuration, scope, and name are unchanged. Concurrent calls run
    /// serially.
    pub async fn invalidate(&self, policy_id: Uuid) -> GuardrailsResult<()> {
        let _rebuild = self.rebuild.lock().await;
        let policy = match self.repository.get_policy(policy_id).await {
            Ok(policy) => Some(policy),
            Err(GuardrailsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let Some(ref p) = policy {
            if p.enabled && self.is_unchanged(p) {
                tracing::debug!(policy_id = %policy_id, "Policy unchanged, keeping compiled check");
                return Ok(());
            }
        }

        // Compile outside the snapshot lock; the swap below is the only write.
        let compiled = match policy {
            Some(ref p) if p.enabled => match compile(p) {
                Ok(check) => Some((p.customer_id, Arc::new(check))),
                Err(e) => {
                    tracing::warn!(
                        policy_id = %policy_id,
                        error = %e,
                        "Skipping policy that failed to compile"
                    );
                    None
                }
            },
            _ => None,
        };

        let mut guard = self.snapshot.write().unwrap();
        let mut customers = guard.customers.clone();
        for checks in customers.values_mut() {
            checks.retain(|c| c.policy_id != policy_id);
        }
        customers.retain(|_, checks| !checks.is_empty());

        if let Some((customer_id, check)) = compiled {
            let checks = customers.entry(customer_id).or_default();
            checks.push(check);
            checks.sort_by_key(|c| c.sort_key());
        }

        *guard = Arc::new(Snapshot { customers });
        tracing::debug!(policy_id = %policy_id, "Policy snapshot swapped");
        Ok(())
    }

    fn is_unchanged(&self, policy: &crate::domain::Policy) -> bool {
        let snapshot = self.snapshot.read().unwrap().clone();
        let Some(existing) = snapshot
            .customers
            .get(&policy.customer_id)
            .and_then(|checks| checks.iter().find(|c| c.policy_id == policy.id))
        else {
            return false;
        };

        let new_hash = policy.rule_json.as_ref().map(config_hash);
        new_hash.as_deref() == Some(existing.config_hash.as_str())
            && existing.agent_id == policy.agent_id
            && existing.policy_name == policy.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::templates::default_rule_config;
    use crate::domain::{Policy, PolicyType};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use sqlx::sqlite::SqlitePool;

    async fn setup_cache() -> (PolicyCache, GuardrailsRepository) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repository = GuardrailsRepository::new(pool);
        repository.init_schema().await.unwrap();
        (PolicyCache::new(repository.clone()), repository)
    }

    fn make_policy(customer_id: Uuid, policy_type: PolicyType, name: &str) -> Policy {
        Policy::new(
            customer_id,
            None,
            name,
            policy_type,
            Some(default_rule_config(policy_type)),
        )
    }

    #[tokio::test]
    async fn test_resolve_orders_by_type_priority() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        // Insert in reverse priority order to prove sorting is not
        // insertion order.
        for policy_type in [
            PolicyType::Custom,
            PolicyType::ContentSafety,
            PolicyType::PromptInjection,
            PolicyType::Pii,
        ] {
            repository
                .save_policy(&make_policy(customer, policy_type, "ordered"))
                .await
                .unwrap();
        }
        cache.reload().await.unwrap();

        let labels: Vec<String> = cache
            .resolve(customer, Uuid::new_v4())
            .iter()
            .map(|c| c.label.clone())
            .collect();
        assert_eq!(
            labels,
            vec![
                "PII_Detection",
                "Prompt_Injection",
                "Content_Safety",
                "Custom_ordered"
            ]
        );
    }

    #[tokio::test]
    async fn test_created_at_and_id_break_ties() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let mut older = make_policy(customer, PolicyType::Pii, "older");
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = make_policy(customer, PolicyType::Pii, "newer");

        let stamp = Utc::now() + Duration::minutes(1);
        let mut low_id = make_policy(customer, PolicyType::Pii, "low-id");
        low_id.id = Uuid::from_u128(1);
        low_id.created_at = stamp;
        let mut high_id = make_policy(customer, PolicyType::Pii, "high-id");
        high_id.id = Uuid::from_u128(2);
        high_id.created_at = stamp;

        for policy in [&high_id, &newer, &low_id, &older] {
            repository.save_policy(policy).await.unwrap();
        }
        cache.reload().await.unwrap();

        let names: Vec<String> = cache
            .resolve(customer, Uuid::new_v4())
            .iter()
            .map(|c| c.policy_name.clone())
            .collect();
        assert_eq!(names, vec!["older", "newer", "low-id", "high-id"]);
    }

    #[tokio::test]
    async fn test_agent_scoping() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();
        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();

        let global = make_policy(customer, PolicyType::Pii, "global");
        let mut scoped_a = make_policy(customer, PolicyType::Custom, "scoped-a");
        scoped_a.agent_id = Some(agent_a);
        let mut scoped_b = make_policy(customer, PolicyType::Custom, "scoped-b");
        scoped_b.agent_id = Some(agent_b);

        for policy in [&global, &scoped_a, &scoped_b] {
            repository.save_policy(policy).await.unwrap();
        }
        cache.reload().await.unwrap();

        let for_a: Vec<String> = cache
            .resolve(customer, agent_a)
            .iter()
            .map(|c| c.policy_name.clone())
            .collect();
        assert_eq!(for_a, vec!["global", "scoped-a"]);

        // Unknown agent still receives the customer's global policies.
        let for_unknown: Vec<String> = cache
            .resolve(customer, Uuid::new_v4())
            .iter()
            .map(|c| c.policy_name.clone())
            .collect();
        assert_eq!(for_unknown, vec!["global"]);
    }

    #[tokio::test]
    async fn test_customers_are_isolated() {
        let (cache, repository) = setup_cache().await;
        let customer_a = Uuid::new_v4();
        let customer_b = Uuid::new_v4();

        repository
            .save_policy(&make_policy(customer_a, PolicyType::Pii, "a-only"))
            .await
            .unwrap();
        cache.reload().await.unwrap();

        assert_eq!(cache.resolve(customer_a, Uuid::new_v4()).len(), 1);
        assert!(cache.resolve(customer_b, Uuid::new_v4()).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_policies_are_not_resolved() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let mut policy = make_policy(customer, PolicyType::Pii, "disabled");
        policy.enabled = false;
        repository.save_policy(&policy).await.unwrap();
        cache.reload().await.unwrap();

        assert!(cache.resolve(customer, Uuid::new_v4()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_policy_is_skipped() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let mut corrupt = make_policy(customer, PolicyType::Pii, "corrupt");
        corrupt.rule_json = Some(json!({"patterns": "not-an-array"}));
        repository.save_policy(&corrupt).await.unwrap();
        repository
            .save_policy(&make_policy(customer, PolicyType::Custom, "healthy"))
            .await
            .unwrap();

        let compiled = cache.reload().await.unwrap();
        assert_eq!(compiled, 1);

        let names: Vec<String> = cache
            .resolve(customer, Uuid::new_v4())
            .iter()
            .map(|c| c.policy_name.clone())
            .collect();
        assert_eq!(names, vec!["healthy"]);
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_rule_change() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let mut policy = make_policy(customer, PolicyType::Custom, "tuned");
        repository.save_policy(&policy).await.unwrap();
        cache.reload().await.unwrap();
        let before = cache.resolve(customer, Uuid::new_v4())[0].config_hash.clone();

        policy.rule_json = Some(json!({"deny_keywords": ["embargoed"]}));
        repository.update_policy(&policy).await.unwrap();
        cache.invalidate(policy.id).await.unwrap();

        let after = cache.resolve(customer, Uuid::new_v4())[0].config_hash.clone();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_invalidate_drops_deleted_policy() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let policy = make_policy(customer, PolicyType::Pii, "doomed");
        repository.save_policy(&policy).await.unwrap();
        cache.reload().await.unwrap();
        assert_eq!(cache.resolve(customer, Uuid::new_v4()).len(), 1);

        repository.delete_policy(policy.id).await.unwrap();
        cache.invalidate(policy.id).await.unwrap();
        assert!(cache.resolve(customer, Uuid::new_v4()).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_invalidations_converge_on_latest_rules() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let mut policy = make_policy(customer, PolicyType::Custom, "contended");
        repository.save_policy(&policy).await.unwrap();
        cache.reload().await.unwrap();

        let cache = Arc::new(cache);
        let mut handles = Vec::new();

        // Invalidations already in flight when the rules change must not
        // leave a stale check behind.
        for _ in 0..4 {
            let cache = cache.clone();
            let id = policy.id;
            handles.push(tokio::spawn(async move { cache.invalidate(id).await }));
        }

        policy.rule_json = Some(json!({"deny_keywords": ["embargoed"]}));
        repository.update_policy(&policy).await.unwrap();
        let expected = config_hash(policy.rule_json.as_ref().unwrap());

        for _ in 0..4 {
            let cache = cache.clone();
            let id = policy.id;
            handles.push(tokio::spawn(async move { cache.invalidate(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let resolved = cache.resolve(customer, Uuid::new_v4());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].config_hash, expected);
    }

    #[tokio::test]
    async fn test_resolved_checks_survive_swap() {
        let (cache, repository) = setup_cache().await;
        let customer = Uuid::new_v4();

        let policy = make_policy(customer, PolicyType::Pii, "stable");
        repository.save_policy(&policy).await.unwrap();
        cache.reload().await.unwrap();

        let held = cache.resolve(customer, Uuid::new_v4());
        let held_hash = held[0].config_hash.clone();

        repository.delete_policy(policy.id).await.unwrap();
        cache.invalidate(policy.id).await.unwrap();

        // The evaluation that started before the swap still has its checks.
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].config_hash, held_hash);
        assert!(cache.resolve(customer, Uuid::new_v4()).is_empty());
    }
}
