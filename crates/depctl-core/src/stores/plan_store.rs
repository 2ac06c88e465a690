//! In-memory `PlanStore` implementation.
//!
//! Thread-safe, last-writer-wins on `plan_id`. Suitable for tests and for
//! running the orchestrator standalone; a durable backend (sqlite/postgres)
//! would implement the same `PlanStore` trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use depctl_kernel::error::{DepctlError, DepctlResult};
use depctl_kernel::model::{DeploymentPlan, PlanStatus};
use depctl_kernel::traits::{PlanFilter, PlanStore};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe in-memory plan store.
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<HashMap<Uuid, DeploymentPlan>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self { plans: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }
}

impl Default for InMemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn get(&self, plan_id: Uuid) -> DepctlResult<Option<DeploymentPlan>> {
        Ok(self.plans.read().await.get(&plan_id).cloned())
    }

    async fn put(&self, plan: DeploymentPlan) -> DepctlResult<()> {
        self.plans.write().await.insert(plan.plan_id, plan);
        Ok(())
    }

    async fn list(&self, filter: PlanFilter) -> DepctlResult<Vec<DeploymentPlan>> {
        let plans = self.plans.read().await;
        let mut result: Vec<DeploymentPlan> = plans
            .values()
            .filter(|p| filter.include_deleted || p.status != PlanStatus::Deleted)
            .filter(|p| filter.status.map(|s| s == p.status).unwrap_or(true))
            .filter(|p| filter.user_id.as_deref().map(|u| u == p.user_id).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by_key(|p| p.created_at);
        Ok(result)
    }

    async fn delete(&self, plan_id: Uuid, hard: bool) -> DepctlResult<()> {
        let mut plans = self.plans.write().await;
        if hard {
            plans
                .remove(&plan_id)
                .ok_or(DepctlError::PlanNotFound(plan_id))?;
        } else {
            let plan = plans.get_mut(&plan_id).ok_or(DepctlError::PlanNotFound(plan_id))?;
            plan.status = PlanStatus::Deleted;
            plan.touch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depctl_kernel::model::{Constraints, Environment};

    fn new_plan() -> DeploymentPlan {
        DeploymentPlan::new("user-1", "deploy something", Environment::Dev, Constraints::default())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryPlanStore::new();
        let plan = new_plan();
        let id = plan.plan_id;
        store.put(plan.clone()).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.plan_id, plan.plan_id);
        assert_eq!(fetched.intent, plan.intent);
    }

    #[tokio::test]
    async fn put_is_last_writer_wins() {
        let store = InMemoryPlanStore::new();
        let mut plan = new_plan();
        let id = plan.plan_id;
        store.put(plan.clone()).await.unwrap();
        plan.status = PlanStatus::Deploying;
        store.put(plan).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, PlanStatus::Deploying);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn soft_delete_filters_default_listing() {
        let store = InMemoryPlanStore::new();
        let plan = new_plan();
        let id = plan.plan_id;
        store.put(plan).await.unwrap();
        store.delete(id, false).await.unwrap();

        let default_list = store.list(PlanFilter::default()).await.unwrap();
        assert!(default_list.is_empty());

        let including_deleted =
            store.list(PlanFilter { include_deleted: true, ..Default::default() }).await.unwrap();
        assert_eq!(including_deleted.len(), 1);
        assert_eq!(including_deleted[0].status, PlanStatus::Deleted);
    }

    #[tokio::test]
    async fn hard_delete_removes_row() {
        let store = InMemoryPlanStore::new();
        let plan = new_plan();
        let id = plan.plan_id;
        store.put(plan).await.unwrap();
        store.delete(id, true).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = InMemoryPlanStore::new();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
