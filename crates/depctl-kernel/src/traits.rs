//! External collaborator contracts.
//!
//! These traits define the boundary of the agentic execution engine. The
//! language model, the retrieval/rerank service, and the cloud deployment
//! backend are opaque capabilities to this crate — concrete adapters (real
//! or in-memory defaults) live in `depctl-core`.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DepctlResult;
use crate::model::{AuditRecord, DeploymentArtifact, Evidence, MemoryEntry, DeploymentPlan};

/// `Retrieve(query, k) -> ordered sequence of Evidence`.
///
/// Implementations must return at most `k` items, ordered by
/// non-increasing score with document id as the lexicographic tie-break
/// (§4.5, §9 Open Questions).
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize, timeout: Duration) -> Vec<Evidence>;
}

/// `Synthesize(prompt, context) -> Artifact`.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> DepctlResult<DeploymentArtifact>;
}

/// Outcome of a single `DeploymentBackend` call.
#[derive(Debug, Clone)]
pub struct BackendResult {
    pub ok: bool,
    pub resource_id: Option<String>,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub message: Option<String>,
}

impl BackendResult {
    pub fn ok(resource_id: impl Into<String>) -> Self {
        Self { ok: true, resource_id: Some(resource_id.into()), error_kind: None, message: None }
    }

    pub fn err(kind: crate::error::ErrorKind, message: impl Into<String>) -> Self {
        Self { ok: false, resource_id: None, error_kind: Some(kind), message: Some(message.into()) }
    }
}

/// Observed status of an endpoint as reported by `DescribeEndpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Creating,
    InService,
    Failed,
    Deleting,
}

/// The cloud model-hosting backend: model/endpoint-config/endpoint CRUD,
/// monitor alarms. Assumed idempotent on `(model_name, endpoint_name)`.
#[async_trait]
pub trait DeploymentBackend: Send + Sync {
    async fn create_model(&self, artifact: &DeploymentArtifact) -> BackendResult;
    async fn create_endpoint_config(&self, artifact: &DeploymentArtifact) -> BackendResult;
    async fn create_endpoint(&self, artifact: &DeploymentArtifact) -> BackendResult;
    async fn describe_endpoint(&self, endpoint_name: &str) -> (BackendResult, Option<EndpointStatus>);
    async fn configure_monitor(&self, artifact: &DeploymentArtifact) -> BackendResult;
    async fn delete_endpoint(&self, endpoint_name: &str) -> BackendResult;
}

/// Filter applied by `ListPlans`.
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub status: Option<crate::model::PlanStatus>,
    pub user_id: Option<String>,
    pub include_deleted: bool,
}

/// Durable persistence of plans keyed by id.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, plan_id: Uuid) -> DepctlResult<Option<DeploymentPlan>>;
    /// Last-writer-wins on `plan_id`.
    async fn put(&self, plan: DeploymentPlan) -> DepctlResult<()>;
    async fn list(&self, filter: PlanFilter) -> DepctlResult<Vec<DeploymentPlan>>;
    /// `hard = true` permanently removes the row; `hard = false` is expected
    /// to be applied by the caller setting `status = Deleted` via `put`, but
    /// this method also removes the row outright for `Delete(hard=true)`.
    async fn delete(&self, plan_id: Uuid, hard: bool) -> DepctlResult<()>;
}

/// Persist episodic/semantic agent memories; similarity recall.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn put(&self, entry: MemoryEntry) -> DepctlResult<Uuid>;
    async fn recall(&self, agent: crate::model::AgentKind, query: &str, limit: usize) -> Vec<MemoryEntry>;
    async fn list(&self, agent: crate::model::AgentKind, since: Option<chrono::DateTime<chrono::Utc>>) -> Vec<MemoryEntry>;
    /// Count of memories of `kind` for `agent` whose outcome/context matches
    /// `predicate`-style lookups used by `MonitorAgent`/kernel heuristics.
    async fn count_matching(&self, agent: crate::model::AgentKind, action: &str, resolved_by: &str) -> usize;
    /// Remove entries whose context references `plan_id` (hard delete support).
    async fn purge_for_plan(&self, plan_id: Uuid) -> DepctlResult<usize>;
}

/// Append-only, at-least-once audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> DepctlResult<()>;
    /// Diagnostic read-back, used by tests to assert on the recorded
    /// sequence. Not part of the production contract but present on every
    /// sink shipped in this crate.
    async fn records_for(&self, plan_id: Uuid) -> Vec<AuditRecord>;
}
