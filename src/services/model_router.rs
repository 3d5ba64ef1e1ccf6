//! Model routing over the local endpoint pool.
//!
//! Maps `(role, attempt)` to an endpoint. The preferred model (per-role
//! config override, then the role's own preference) is pinned to attempt
//! 0; later attempts advance a fallback ladder ordered by capability
//! descending. Per-endpoint concurrency is capped with counting
//! semaphores; saturated endpoints are skipped after a bounded wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::errors::{DelegationError, DelegationResult};
use crate::domain::models::{AgentDef, Config, ModelPoolEntry};

/// One pool endpoint with its concurrency gate.
#[derive(Debug, Clone)]
struct Endpoint {
    entry: ModelPoolEntry,
    semaphore: Arc<Semaphore>,
}

/// A routing decision holding a concurrency permit for the call's
/// duration. Dropping the decision releases the endpoint slot.
pub struct RouteDecision {
    pub url: String,
    pub model: String,
    pub capability: u32,
    /// Timeout for the model call itself.
    pub timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDecision")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

/// Router over the configured model pool.
pub struct ModelRouter {
    /// Ladder order: capability descending.
    endpoints: Vec<Endpoint>,
    /// Per-role model overrides from configuration.
    overrides: HashMap<String, String>,
    /// Timeout applied to each model call.
    model_timeout: Duration,
    /// How long to wait on a saturated endpoint before trying the next rung.
    acquire_timeout: Duration,
}

impl ModelRouter {
    pub fn new(
        pool: Vec<ModelPoolEntry>,
        overrides: HashMap<String, String>,
        model_timeout: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        let mut endpoints: Vec<Endpoint> = pool
            .into_iter()
            .map(|entry| Endpoint {
                semaphore: Arc::new(Semaphore::new(entry.max_concurrent.max(1))),
                entry,
            })
            .collect();
        endpoints.sort_by(|a, b| b.entry.capability.cmp(&a.entry.capability));
        Self {
            endpoints,
            overrides,
            model_timeout,
            acquire_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let overrides = config
            .agents
            .iter()
            .filter_map(|(role, o)| o.model.clone().map(|m| (role.to_lowercase(), m)))
            .collect();
        Self::new(
            config.model_pool.clone(),
            overrides,
            Duration::from_millis(config.task.model_timeout_ms),
            Duration::from_secs(10),
        )
    }

    /// Total concurrent capacity across the pool.
    pub fn pool_capacity(&self) -> usize {
        self.endpoints.iter().map(|e| e.entry.max_concurrent).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The fallback ladder for a role: preferred model first, then the
    /// remaining endpoints by capability descending, honouring the
    /// role's minimum capability.
    fn ladder(&self, def: &AgentDef) -> Vec<&Endpoint> {
        let preferred = self
            .overrides
            .get(&def.agent_type)
            .cloned()
            .or_else(|| def.preferred_model.clone());

        let mut ladder: Vec<&Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.entry.capability >= def.min_capability)
            .collect();

        if let Some(ref tag) = preferred {
            ladder.sort_by_key(|e| if &e.entry.model == tag { 0 } else { 1 });
        }
        ladder
    }

    /// Route `(role, attempt)` to an endpoint, acquiring a concurrency
    /// permit. Attempt N starts at rung N; saturated rungs are skipped
    /// after `acquire_timeout`.
    pub async fn route(&self, def: &AgentDef, attempt: u32) -> DelegationResult<RouteDecision> {
        let ladder = self.ladder(def);
        let start = attempt as usize;
        if start >= ladder.len() {
            return Err(DelegationError::NoEligibleModel {
                role: def.agent_type.clone(),
                attempt,
            });
        }

        for endpoint in &ladder[start..] {
            let acquired = tokio::time::timeout(
                self.acquire_timeout,
                endpoint.semaphore.clone().acquire_owned(),
            )
            .await;

            match acquired {
                Ok(Ok(permit)) => {
                    if attempt > 0 {
                        tracing::info!(
                            role = %def.agent_type,
                            attempt,
                            model = %endpoint.entry.model,
                            "Routing to fallback rung"
                        );
                    }
                    return Ok(RouteDecision {
                        url: endpoint.entry.url.clone(),
                        model: endpoint.entry.model.clone(),
                        capability: endpoint.entry.capability,
                        timeout: self.model_timeout,
                        _permit: permit,
                    });
                }
                Ok(Err(_)) | Err(_) => {
                    tracing::debug!(
                        model = %endpoint.entry.model,
                        "Endpoint saturated, trying next rung"
                    );
                }
            }
        }

        Err(DelegationError::NoEligibleModel {
            role: def.agent_type.clone(),
            attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(model: &str, capability: u32, max_concurrent: usize) -> ModelPoolEntry {
        ModelPoolEntry {
            url: format!("http://localhost:11434/{model}"),
            model: model.to_string(),
            max_concurrent,
            capability,
        }
    }

    fn router(pool: Vec<ModelPoolEntry>) -> ModelRouter {
        ModelRouter::new(
            pool,
            HashMap::new(),
            Duration::from_secs(120),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_ladder_orders_by_capability() {
        let router = router(vec![entry("small", 30, 2), entry("big", 90, 2)]);
        let def = AgentDef::new("executor", "p");
        let decision = router.route(&def, 0).await.unwrap();
        assert_eq!(decision.model, "big");
    }

    #[tokio::test]
    async fn test_preferred_model_wins_attempt_zero() {
        let router = router(vec![entry("small", 30, 2), entry("big", 90, 2)]);
        let def = AgentDef::new("executor", "p").with_preferred_model("small");
        let decision = router.route(&def, 0).await.unwrap();
        assert_eq!(decision.model, "small");

        // Attempt 1 advances past the preferred rung.
        let decision = router.route(&def, 1).await.unwrap();
        assert_eq!(decision.model, "big");
    }

    #[tokio::test]
    async fn test_role_override_beats_preferred() {
        let overrides = HashMap::from([("executor".to_string(), "big".to_string())]);
        let router = ModelRouter::new(
            vec![entry("small", 30, 2), entry("big", 90, 2)],
            overrides,
            Duration::from_secs(120),
            Duration::from_millis(50),
        );
        let def = AgentDef::new("executor", "p").with_preferred_model("small");
        let decision = router.route(&def, 0).await.unwrap();
        assert_eq!(decision.model, "big");
    }

    #[tokio::test]
    async fn test_ladder_exhaustion() {
        let router = router(vec![entry("only", 50, 1)]);
        let def = AgentDef::new("executor", "p");
        let err = router.route(&def, 1).await.unwrap_err();
        assert!(matches!(err, DelegationError::NoEligibleModel { attempt: 1, .. }));
    }

    #[tokio::test]
    async fn test_min_capability_filters_pool() {
        let router = router(vec![entry("small", 30, 2), entry("big", 90, 2)]);
        let mut def = AgentDef::new("coder", "p");
        def.min_capability = 50;
        let decision = router.route(&def, 0).await.unwrap();
        assert_eq!(decision.model, "big");
        // Only one eligible rung, so attempt 1 has nowhere to go.
        assert!(router.route(&def, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_saturated_endpoint_skipped() {
        let router = router(vec![entry("busy", 90, 1), entry("spare", 40, 1)]);
        let def = AgentDef::new("executor", "p");

        let held = router.route(&def, 0).await.unwrap();
        assert_eq!(held.model, "busy");

        // First rung saturated; the router falls through to the spare.
        let second = router.route(&def, 0).await.unwrap();
        assert_eq!(second.model, "spare");

        drop(held);
        let third = router.route(&def, 0).await.unwrap();
        assert_eq!(third.model, "busy");
        drop(second);
        drop(third);
    }

    #[test]
    fn test_pool_capacity() {
        let router = router(vec![entry("a", 50, 2), entry("b", 40, 3)]);
        assert_eq!(router.pool_capacity(), 5);
    }
}
