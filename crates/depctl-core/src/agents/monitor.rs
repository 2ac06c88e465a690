//! `MonitorAgent` — owns the `configure_monitoring`/`verify_deployment`
//! steps and classifies step outcomes into retry/replan/fail decisions
//! (§4.4).

use std::sync::Arc;
use std::time::Instant;

use depctl_kernel::error::ErrorKind;
use depctl_kernel::model::{AgentKind, Decision, DeploymentArtifact, StepOutcome};
use depctl_kernel::traits::{DeploymentBackend, EndpointStatus};
use depctl_kernel::OrchestratorConfig;
use serde_json::json;
use tracing::instrument;

use super::kernel::AgentKernel;

pub struct MonitorAgent {
    backend: Arc<dyn DeploymentBackend>,
    kernel: Arc<AgentKernel>,
    config: OrchestratorConfig,
}

impl MonitorAgent {
    pub fn new(backend: Arc<dyn DeploymentBackend>, kernel: Arc<AgentKernel>, config: OrchestratorConfig) -> Self {
        Self { backend, kernel, config }
    }

    /// `Execute(step, plan) -> StepOutcome` for the monitor-owned actions.
    #[instrument(skip(self, artifact), fields(action = %action))]
    pub async fn execute(&self, action: &str, artifact: &DeploymentArtifact) -> StepOutcome {
        match action {
            "configure_monitoring" => {
                let result = self.backend.configure_monitor(artifact).await;
                if result.ok {
                    StepOutcome::success(json!({ "resource_id": result.resource_id }))
                } else {
                    StepOutcome::error(
                        result.message.unwrap_or_else(|| "configure_monitor failed".into()),
                        result.error_kind.unwrap_or(ErrorKind::Transient),
                    )
                }
            }
            "verify_deployment" => self.verify_deployment(artifact).await,
            other => {
                StepOutcome::error(format!("unknown monitor action: {other}"), ErrorKind::Unrecoverable)
            }
        }
    }

    /// Polls `describe_endpoint` until `InService`, `Failed`, or the
    /// configured verify timeout elapses.
    async fn verify_deployment(&self, artifact: &DeploymentArtifact) -> StepOutcome {
        let deadline = Instant::now() + self.config.verify_timeout();
        loop {
            let (result, status) = self.backend.describe_endpoint(&artifact.endpoint_name).await;
            if !result.ok {
                return StepOutcome::error(
                    result.message.unwrap_or_else(|| "describe_endpoint failed".into()),
                    result.error_kind.unwrap_or(ErrorKind::Transient),
                );
            }
            match status {
                Some(EndpointStatus::InService) => return StepOutcome::success(json!({ "status": "in_service" })),
                Some(EndpointStatus::Failed) => {
                    return StepOutcome::error("endpoint entered Failed status", ErrorKind::Semantic)
                }
                _ => {
                    if Instant::now() >= deadline {
                        return StepOutcome::error("verify_deployment timed out", ErrorKind::Transient);
                    }
                    tokio::time::sleep(self.config.verify_poll()).await;
                }
            }
        }
    }

    /// `Classify(step, outcome, memory_recall) -> Decision` (§4.4).
    #[instrument(skip(self, outcome), fields(action = %action, retry_count = retry_count))]
    pub async fn classify(&self, action: &str, outcome: &StepOutcome, retry_count: u32) -> Decision {
        let Some(kind) = outcome.error_kind else { return Decision::Accept };

        match kind {
            ErrorKind::Unrecoverable | ErrorKind::Validation => Decision::Fail,
            ErrorKind::Transient => {
                if retry_count < self.config.max_retries_per_step {
                    Decision::Retry
                } else {
                    self.replan_or_fail(action).await
                }
            }
            ErrorKind::Semantic => self.replan_or_fail(action).await,
            ErrorKind::StateConflict | ErrorKind::AuditUnavailable | ErrorKind::ReplanBudgetExhausted => {
                Decision::Fail
            }
        }
    }

    async fn replan_or_fail(&self, action: &str) -> Decision {
        let precedent = self.kernel.replan_precedent_count(action).await;
        if precedent as u32 >= self.config.memory_replan_threshold {
            Decision::Replan
        } else {
            Decision::Fail
        }
    }

    pub fn agent_kind() -> AgentKind {
        AgentKind::Monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DryRunBackend;
    use crate::stores::InMemoryMemoryStore;
    use depctl_kernel::model::{MemoryEntry, MemoryOutcome};
    use serde_json::json;

    fn monitor() -> (MonitorAgent, Arc<InMemoryMemoryStore>) {
        let memory = Arc::new(InMemoryMemoryStore::new(90));
        let kernel = Arc::new(AgentKernel::new(memory.clone(), OrchestratorConfig::default()));
        (MonitorAgent::new(Arc::new(DryRunBackend), kernel, OrchestratorConfig::default()), memory)
    }

    #[tokio::test]
    async fn unrecoverable_always_fails() {
        let (monitor, _memory) = monitor();
        let outcome = StepOutcome::error("forbidden", ErrorKind::Unrecoverable);
        assert_eq!(monitor.classify("create_endpoint", &outcome, 0).await, Decision::Fail);
    }

    #[tokio::test]
    async fn transient_retries_under_budget() {
        let (monitor, _memory) = monitor();
        let outcome = StepOutcome::error("timeout", ErrorKind::Transient);
        assert_eq!(monitor.classify("create_endpoint", &outcome, 0).await, Decision::Retry);
    }

    #[tokio::test]
    async fn transient_exhausted_falls_back_to_fail_without_precedent() {
        let (monitor, _memory) = monitor();
        let outcome = StepOutcome::error("timeout", ErrorKind::Transient);
        let retries = OrchestratorConfig::default().max_retries_per_step;
        assert_eq!(monitor.classify("create_endpoint", &outcome, retries).await, Decision::Fail);
    }

    #[tokio::test]
    async fn semantic_replans_when_precedent_meets_threshold() {
        let (monitor, memory) = monitor();
        for _ in 0..2 {
            memory
                .put(MemoryEntry::episodic(
                    AgentKind::Monitor,
                    json!({"action": "create_endpoint"}),
                    MemoryOutcome { status: "resolved".into(), error: Some("resolved by replan".into()) },
                ))
                .await
                .unwrap();
        }
        let outcome = StepOutcome::error("instance type not available in region", ErrorKind::Semantic);
        assert_eq!(monitor.classify("create_endpoint", &outcome, 0).await, Decision::Replan);
    }

    #[tokio::test]
    async fn semantic_fails_without_precedent() {
        let (monitor, _memory) = monitor();
        let outcome = StepOutcome::error("instance type not available in region", ErrorKind::Semantic);
        assert_eq!(monitor.classify("create_endpoint", &outcome, 0).await, Decision::Fail);
    }

    #[tokio::test]
    async fn success_outcome_is_accepted() {
        let (monitor, _memory) = monitor();
        let outcome = StepOutcome::success(json!({}));
        assert_eq!(monitor.classify("create_endpoint", &outcome, 0).await, Decision::Accept);
    }
}
