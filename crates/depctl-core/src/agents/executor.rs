//! `ExecutorAgent` — dispatches a `TaskStep` owned by the `executor` role to
//! the configured `DeploymentBackend`, or to the guardrails validator for
//! `validate_plan` (§4.3 action table).

use std::sync::Arc;

use depctl_kernel::model::{Constraints, DeploymentArtifact, Environment, StepOutcome};
use depctl_kernel::traits::{BackendResult, DeploymentBackend};
use depctl_kernel::OrchestratorConfig;
use serde_json::json;
use tracing::instrument;

use crate::guardrails;

pub struct ExecutorAgent {
    backend: Arc<dyn DeploymentBackend>,
    config: OrchestratorConfig,
}

impl ExecutorAgent {
    pub fn new(backend: Arc<dyn DeploymentBackend>, config: OrchestratorConfig) -> Self {
        Self { backend, config }
    }

    fn from_backend_result(result: BackendResult) -> StepOutcome {
        if result.ok {
            StepOutcome::success(json!({ "resource_id": result.resource_id }))
        } else {
            let message = result.message.unwrap_or_else(|| "backend call failed".to_string());
            StepOutcome::error(message, result.error_kind.unwrap_or(depctl_kernel::error::ErrorKind::Transient))
        }
    }

    /// `Execute(step, plan) -> StepOutcome`.
    #[instrument(skip(self, artifact, env, constraints), fields(action = %action))]
    pub async fn execute(
        &self,
        action: &str,
        artifact: &DeploymentArtifact,
        env: Environment,
        constraints: &Constraints,
    ) -> StepOutcome {
        match action {
            "validate_plan" => {
                let outcome = guardrails::validate(artifact, env, constraints, &self.config);
                if outcome.errors.is_empty() {
                    StepOutcome::success(json!({ "warnings": outcome.warnings }))
                } else {
                    StepOutcome::error(outcome.errors.join("; "), depctl_kernel::error::ErrorKind::Validation)
                }
            }
            "create_model" => Self::from_backend_result(self.backend.create_model(artifact).await),
            "create_endpoint_config" => {
                Self::from_backend_result(self.backend.create_endpoint_config(artifact).await)
            }
            "create_endpoint" => Self::from_backend_result(self.backend.create_endpoint(artifact).await),
            other => StepOutcome::error(
                format!("unknown executor action: {other}"),
                depctl_kernel::error::ErrorKind::Unrecoverable,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DryRunBackend, ScriptedFailureBackend};
    use depctl_kernel::error::ErrorKind;
    use depctl_kernel::model::StepOutcomeStatus;

    fn executor(backend: Arc<dyn DeploymentBackend>) -> ExecutorAgent {
        ExecutorAgent::new(backend, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn validate_plan_rejects_invalid_artifact() {
        let exec = executor(Arc::new(DryRunBackend));
        let mut artifact = crate::test_support::sample_artifact();
        artifact.instance_count = 0;
        let outcome = exec.execute("validate_plan", &artifact, Environment::Staging, &Constraints::default()).await;
        assert_eq!(outcome.status, StepOutcomeStatus::Error);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn validate_plan_accepts_valid_staging_artifact() {
        let exec = executor(Arc::new(DryRunBackend));
        let artifact = crate::test_support::sample_artifact();
        let outcome = exec.execute("validate_plan", &artifact, Environment::Staging, &Constraints::default()).await;
        assert_eq!(outcome.status, StepOutcomeStatus::Success);
    }

    #[tokio::test]
    async fn create_endpoint_surfaces_backend_failure_as_step_error() {
        let backend = ScriptedFailureBackend::new(1, ErrorKind::Transient, "throttled");
        let exec = executor(backend);
        let artifact = crate::test_support::sample_artifact();
        let outcome =
            exec.execute("create_endpoint", &artifact, Environment::Staging, &Constraints::default()).await;
        assert_eq!(outcome.status, StepOutcomeStatus::Error);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Transient));
    }

    #[tokio::test]
    async fn unknown_action_is_unrecoverable() {
        let exec = executor(Arc::new(DryRunBackend));
        let artifact = crate::test_support::sample_artifact();
        let outcome = exec.execute("teleport", &artifact, Environment::Staging, &Constraints::default()).await;
        assert_eq!(outcome.error_kind, Some(ErrorKind::Unrecoverable));
    }
}
