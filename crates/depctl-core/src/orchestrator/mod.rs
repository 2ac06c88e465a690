//! The orchestrator state machine: `Submit`, `Approve`, `Pause`, `Restart`,
//! `Delete`, and the internal step-execution loop that drives a plan from
//! `created` through to `deployed` or `failed` (§4.1).
//!
//! Concurrency shape mirrors a bounded worker pool plus per-key single
//! flight: a `Semaphore` caps how many plans run their execution loop at
//! once, and a `DashMap<Uuid, Mutex<()>>` ensures only one task at a time
//! mutates a given plan.

use std::sync::Arc;

use dashmap::DashMap;
use depctl_kernel::error::{DepctlError, DepctlResult};
use depctl_kernel::model::{
    ApprovalDecision, Approval, Constraints, DeploymentPlan, Environment, EventType, PlanStatus,
    StepStatus, TaskStep,
};
use depctl_kernel::traits::{MemoryStore, PlanFilter, PlanStore, Retriever};
use depctl_kernel::OrchestratorConfig;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::instrument;
use uuid::Uuid;

use crate::agents::{AgentKernel, ExecutorAgent, MonitorAgent, PlannerAgent};
use crate::guardrails;
use depctl_kernel::traits::{AuditSink, DeploymentBackend, Synthesizer};

pub struct Orchestrator {
    plan_store: Arc<dyn PlanStore>,
    memory: Arc<dyn MemoryStore>,
    audit: Arc<dyn AuditSink>,
    retriever: Arc<dyn Retriever>,
    planner: PlannerAgent,
    executor: ExecutorAgent,
    monitor: MonitorAgent,
    config: OrchestratorConfig,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        plan_store: Arc<dyn PlanStore>,
        memory: Arc<dyn MemoryStore>,
        audit: Arc<dyn AuditSink>,
        retriever: Arc<dyn Retriever>,
        synthesizer: Arc<dyn Synthesizer>,
        backend: Arc<dyn DeploymentBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        let kernel = Arc::new(AgentKernel::new(memory.clone(), config.clone()));
        let planner = PlannerAgent::new(synthesizer, kernel.clone(), config.clone());
        let executor = ExecutorAgent::new(backend.clone(), config.clone());
        let monitor = MonitorAgent::new(backend, kernel, config.clone());
        let permits = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));

        Self { plan_store, memory, audit, retriever, planner, executor, monitor, config, locks: DashMap::new(), permits }
    }

    fn lock_handle(&self, plan_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(plan_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn lock(&self, plan_id: Uuid) -> OwnedMutexGuard<()> {
        self.lock_handle(plan_id).lock_owned().await
    }

    async fn record(
        &self,
        plan_id: Uuid,
        event_type: EventType,
        actor: impl Into<String>,
        metadata: serde_json::Value,
    ) -> DepctlResult<()> {
        let record = depctl_kernel::model::AuditRecord::new(plan_id, event_type, actor).with_metadata(metadata);
        self.audit.append(record).await
    }

    async fn load(&self, plan_id: Uuid) -> DepctlResult<DeploymentPlan> {
        self.plan_store.get(plan_id).await?.ok_or(DepctlError::PlanNotFound(plan_id))
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> DepctlResult<Option<DeploymentPlan>> {
        self.plan_store.get(plan_id).await
    }

    pub async fn list_plans(&self, filter: PlanFilter) -> DepctlResult<Vec<DeploymentPlan>> {
        self.plan_store.list(filter).await
    }

    /// `Submit(user_id, intent, env, constraints) -> plan_id`.
    #[instrument(skip(self, constraints), fields(intent = %intent.as_ref()))]
    pub async fn submit(
        &self,
        user_id: impl Into<String>,
        intent: impl AsRef<str> + Into<String>,
        env: Environment,
        constraints: Constraints,
    ) -> DepctlResult<Uuid> {
        let plan = DeploymentPlan::new(user_id, intent, env, constraints);
        let plan_id = plan.plan_id;

        self.record(plan_id, EventType::IntentSubmitted, "system", json!({"intent": plan.intent})).await?;
        self.plan_store.put(plan).await?;

        let _permit = self.permits.clone().acquire_owned().await.map_err(|e| DepctlError::Store(e.to_string()))?;
        // The per-plan lock covers only the synchronous planning/validation
        // transition below, never the multi-step execution run that may
        // follow: `run_execution` takes the lock itself, one step boundary
        // at a time, so a concurrent Pause/Delete can interleave with it.
        let should_execute = {
            let _guard = self.lock(plan_id).await;
            self.advance_from_created(plan_id).await?
        };
        if should_execute {
            self.run_execution(plan_id).await?;
        }
        Ok(plan_id)
    }

    /// Runs retrieval, planning, and guardrail validation; either lands the
    /// plan at `awaiting_approval`/`validation_failed`, or returns `true` to
    /// tell the caller to proceed into execution when no approval is
    /// required.
    async fn advance_from_created(&self, plan_id: Uuid) -> DepctlResult<bool> {
        let mut plan = self.load(plan_id).await?;
        plan.status = PlanStatus::Validating;
        plan.touch();
        self.plan_store.put(plan.clone()).await?;

        let evidence = self.retriever.retrieve(&plan.intent, self.config.top_k_initial, self.config.retrieve_timeout()).await;
        plan.evidence = evidence.clone();

        let planning = match self.planner.plan(&plan.intent, plan.env, &evidence, &plan.constraints).await {
            Ok(p) => p,
            Err(e) => {
                plan.validation_errors = vec![e.to_string()];
                plan.status = PlanStatus::ValidationFailed;
                plan.touch();
                self.record(plan_id, EventType::ValidationFailed, "planner", json!({"error": e.to_string()})).await?;
                self.plan_store.put(plan).await?;
                return Ok(false);
            }
        };

        let outcome = guardrails::validate(&planning.artifact, plan.env, &plan.constraints, &self.config);
        plan.artifact = Some(planning.artifact.clone());
        plan.execution_plan = Some(planning.execution_plan);
        plan.validation_warnings = outcome.warnings.clone();

        if !outcome.errors.is_empty() {
            plan.validation_errors = outcome.errors.clone();
            plan.status = PlanStatus::ValidationFailed;
            plan.touch();
            self.record(plan_id, EventType::ValidationFailed, "guardrails", json!({"errors": outcome.errors})).await?;
            self.plan_store.put(plan).await?;
            return Ok(false);
        }

        self.record(plan_id, EventType::ValidationPassed, "guardrails", json!({"estimated_cost_usd_per_hour": outcome.estimated_cost_usd_per_hour})).await?;

        if guardrails::requires_approval(&planning.artifact, plan.env, outcome.estimated_cost_usd_per_hour, &self.config) {
            plan.status = PlanStatus::AwaitingApproval;
            plan.touch();
            self.record(
                plan_id,
                EventType::ApprovalRequested,
                "orchestrator",
                json!({"estimated_cost_usd_per_hour": outcome.estimated_cost_usd_per_hour}),
            )
            .await?;
            self.plan_store.put(plan).await?;
            return Ok(false);
        }

        plan.status = PlanStatus::Approved;
        plan.touch();
        self.plan_store.put(plan).await?;
        Ok(true)
    }

    /// `Approve(plan_id, approver, decision, reason)`.
    #[instrument(skip(self, reason))]
    pub async fn approve(
        &self,
        plan_id: Uuid,
        approver: impl Into<String>,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> DepctlResult<()> {
        let _permit = self.permits.clone().acquire_owned().await.map_err(|e| DepctlError::Store(e.to_string()))?;

        // As in `submit`, the lock covers only the synchronous approval
        // transition; `run_execution` acquires it itself per step boundary.
        let should_execute = {
            let _guard = self.lock(plan_id).await;
            let mut plan = self.load(plan_id).await?;

            if plan.status != PlanStatus::AwaitingApproval {
                return Err(DepctlError::StateConflict(format!(
                    "plan {plan_id} is not awaiting approval (status: {:?})",
                    plan.status
                )));
            }

            plan.approval = Some(Approval { approver: approver.into(), decision, timestamp: chrono::Utc::now(), reason });
            plan.touch();

            match decision {
                ApprovalDecision::Approved => {
                    plan.status = PlanStatus::Approved;
                    self.record(plan_id, EventType::Approved, plan.approval.as_ref().unwrap().approver.clone(), json!({})).await?;
                    self.plan_store.put(plan).await?;
                    true
                }
                ApprovalDecision::Rejected => {
                    plan.status = PlanStatus::Rejected;
                    self.record(plan_id, EventType::Rejected, plan.approval.as_ref().unwrap().approver.clone(), json!({})).await?;
                    self.plan_store.put(plan).await?;
                    false
                }
            }
        };

        if should_execute {
            self.run_execution(plan_id).await
        } else {
            Ok(())
        }
    }

    /// `Pause(plan_id)` — only valid on a non-terminal, non-paused plan.
    pub async fn pause(&self, plan_id: Uuid) -> DepctlResult<()> {
        let _guard = self.lock(plan_id).await;
        let mut plan = self.load(plan_id).await?;
        if plan.status.is_terminal() || plan.status == PlanStatus::Paused {
            return Err(DepctlError::StateConflict(format!("plan {plan_id} cannot be paused from {:?}", plan.status)));
        }
        plan.status = PlanStatus::Paused;
        plan.touch();
        self.record(plan_id, EventType::Paused, "system", json!({})).await?;
        self.plan_store.put(plan).await
    }

    /// `Restart(plan_id)` — resumes a paused plan's execution loop from its
    /// next pending step. A plan that is already `deployed` has nothing left
    /// to restart and that attempt is a state conflict rather than a no-op,
    /// since restart is defined as resuming unfinished work.
    pub async fn restart(&self, plan_id: Uuid) -> DepctlResult<()> {
        let _permit = self.permits.clone().acquire_owned().await.map_err(|e| DepctlError::Store(e.to_string()))?;
        {
            let _guard = self.lock(plan_id).await;
            let mut plan = self.load(plan_id).await?;
            if plan.status != PlanStatus::Paused && plan.status != PlanStatus::Failed {
                return Err(DepctlError::StateConflict(format!("plan {plan_id} cannot be restarted from {:?}", plan.status)));
            }
            plan.status = PlanStatus::Approved;
            plan.touch();
            self.record(plan_id, EventType::Restarted, "system", json!({})).await?;
            self.plan_store.put(plan).await?;
        }
        self.run_execution(plan_id).await
    }

    /// `Delete(plan_id, hard)`.
    pub async fn delete(&self, plan_id: Uuid, hard: bool) -> DepctlResult<()> {
        let _guard = self.lock(plan_id).await;
        let mut plan = self.load(plan_id).await?;
        self.record(plan_id, EventType::Deleted, "system", json!({"hard": hard})).await?;
        if hard {
            self.plan_store.delete(plan_id, true).await?;
            self.memory.purge_for_plan(plan_id).await?;
        } else {
            plan.status = PlanStatus::Deleted;
            plan.touch();
            self.plan_store.put(plan).await?;
        }
        Ok(())
    }

    /// The step-execution loop: advances a plan in `approved` status one
    /// step at a time, honoring retry/backoff, replanning, and the terminal
    /// failure semantics of §4.1.
    ///
    /// The per-plan lock is held only for the boundary around each step —
    /// claiming it before dispatch, recording its outcome after — never
    /// across the dispatch call itself or a retry's backoff sleep. That
    /// lets a concurrent `pause`/`delete` acquire the lock and persist a
    /// `Paused`/`Deleted` status while a step is in flight; this loop
    /// re-reads plan status from the store at every such boundary and, once
    /// it sees a status other than `Approved`/`Deploying`, lets the
    /// in-flight step's own outcome get recorded and then exits without
    /// clobbering the cancellation (§4.1 "Cancellation").
    async fn run_execution(&self, plan_id: Uuid) -> DepctlResult<()> {
        loop {
            let claimed = {
                let _guard = self.lock(plan_id).await;
                let mut plan = self.load(plan_id).await?;
                if plan.status != PlanStatus::Approved && plan.status != PlanStatus::Deploying {
                    // A non-runnable status observed at this boundary — in
                    // particular Paused/Deleted landed here by a concurrent
                    // call while no step was in flight — stops the loop.
                    return Ok(());
                }
                plan.status = PlanStatus::Deploying;

                let Some(execution_plan) = plan.execution_plan.clone() else {
                    plan.status = PlanStatus::Failed;
                    self.plan_store.put(plan).await?;
                    return Ok(());
                };

                let Some(idx) = execution_plan.next_pending_index() else {
                    plan.status = PlanStatus::Deployed;
                    plan.touch();
                    self.record(plan_id, EventType::Deployed, "orchestrator", json!({})).await?;
                    self.plan_store.put(plan).await?;
                    return Ok(());
                };

                let mut step = execution_plan.steps[idx].clone();
                let Some(artifact) = plan.artifact.clone() else {
                    plan.status = PlanStatus::Failed;
                    self.plan_store.put(plan).await?;
                    return Ok(());
                };

                step.status = StepStatus::Executing;
                step.touch();
                self.put_step(&mut plan, idx, step.clone()).await?;
                self.plan_store.put(plan.clone()).await?;
                self.record(plan_id, EventType::StepStarted, "orchestrator", json!({"step_id": step.step_id, "action": step.action})).await?;

                (idx, step, artifact, plan.env, plan.constraints.clone())
            };
            let (idx, mut step, artifact, env, constraints) = claimed;

            // No lock held here: the in-flight step runs concurrently with
            // whatever `pause`/`delete`/`approve` calls land in the meantime.
            let outcome = self.dispatch(&step, &artifact, env, &constraints).await;

            let _guard = self.lock(plan_id).await;
            let mut plan = self.load(plan_id).await?;
            let cancelled = matches!(plan.status, PlanStatus::Paused | PlanStatus::Deleted);

            if outcome.status == depctl_kernel::model::StepOutcomeStatus::Success {
                step.status = StepStatus::Completed;
                step.output = outcome.output;
                step.error = None;
                step.touch();
                self.put_step(&mut plan, idx, step.clone()).await?;
                self.record(plan_id, EventType::StepCompleted, "orchestrator", json!({"step_id": step.step_id})).await?;
                self.plan_store.put(plan).await?;
                if cancelled {
                    return Ok(());
                }
                continue;
            }

            if cancelled {
                // The step failed while the plan was being cancelled: record
                // the failure on the step but leave the Paused/Deleted
                // status the cancelling call already persisted in place,
                // rather than driving retry/replan/fail from here.
                step.error = outcome.error.clone();
                step.touch();
                self.put_step(&mut plan, idx, step.clone()).await?;
                self.plan_store.put(plan).await?;
                return Ok(());
            }

            let Some(execution_plan) = plan.execution_plan.clone() else {
                plan.status = PlanStatus::Failed;
                self.plan_store.put(plan).await?;
                return Ok(());
            };

            let retry_count_used = step.retry_count;
            let decision = self.monitor.classify(&step.action, &outcome, retry_count_used).await;
            step.error = outcome.error.clone();

            match decision {
                depctl_kernel::model::Decision::Retry => {
                    step.retry_count += 1;
                    step.status = StepStatus::Retrying;
                    step.touch();
                    self.put_step(&mut plan, idx, step.clone()).await?;
                    self.record(plan_id, EventType::StepRetried, "monitor", json!({"step_id": step.step_id, "retry_count": step.retry_count})).await?;
                    self.plan_store.put(plan.clone()).await?;
                    drop(_guard);

                    let delay = depctl_kernel::backoff::backoff(step.retry_count, self.config.backoff_base_ms, self.config.backoff_max_ms);
                    tokio::time::sleep(delay).await;

                    let _guard = self.lock(plan_id).await;
                    let mut plan = self.load(plan_id).await?;
                    step.status = StepStatus::Pending;
                    step.touch();
                    self.put_step(&mut plan, idx, step.clone()).await?;
                    self.plan_store.put(plan).await?;
                }
                depctl_kernel::model::Decision::Replan => {
                    if plan.replan_count >= self.config.max_replans {
                        step.status = StepStatus::FailedPermanently;
                        step.touch();
                        self.put_step(&mut plan, idx, step.clone()).await?;
                        plan.status = PlanStatus::Failed;
                        plan.touch();
                        self.record(
                            plan_id,
                            EventType::Failed,
                            "orchestrator",
                            json!({"reason": "replan_budget_exhausted", "step_id": step.step_id}),
                        )
                        .await?;
                        self.plan_store.put(plan).await?;
                        return Ok(());
                    }

                    plan.replan_count += 1;
                    self.record(plan_id, EventType::Replan, "planner", json!({"failed_step": step.step_id, "replan_count": plan.replan_count})).await?;

                    match self.planner.replan(&plan.intent, plan.env, &execution_plan, &step, &plan.evidence).await {
                        Ok(replanned) => {
                            plan.artifact = Some(replanned.artifact);
                            plan.execution_plan = Some(replanned.execution_plan);
                            plan.touch();
                            self.plan_store.put(plan).await?;
                        }
                        Err(e) => {
                            plan.status = PlanStatus::Failed;
                            plan.touch();
                            self.record(plan_id, EventType::Failed, "planner", json!({"reason": e.to_string()})).await?;
                            self.plan_store.put(plan).await?;
                            return Ok(());
                        }
                    }
                }
                depctl_kernel::model::Decision::Fail => {
                    step.status = StepStatus::FailedPermanently;
                    step.touch();
                    self.put_step(&mut plan, idx, step.clone()).await?;
                    plan.status = PlanStatus::Failed;
                    plan.touch();
                    self.record(plan_id, EventType::StepFailed, "monitor", json!({"step_id": step.step_id, "error": step.error})).await?;
                    self.record(plan_id, EventType::Failed, "orchestrator", json!({"step_id": step.step_id})).await?;
                    self.plan_store.put(plan).await?;
                    return Ok(());
                }
                depctl_kernel::model::Decision::Accept => {
                    // `classify` never returns Accept for an error outcome.
                    self.plan_store.put(plan).await?;
                }
            }
        }
    }

    async fn put_step(&self, plan: &mut DeploymentPlan, idx: usize, step: TaskStep) -> DepctlResult<()> {
        if let Some(execution_plan) = plan.execution_plan.as_mut() {
            execution_plan.steps[idx] = step;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        step: &TaskStep,
        artifact: &depctl_kernel::model::DeploymentArtifact,
        env: Environment,
        constraints: &Constraints,
    ) -> depctl_kernel::model::StepOutcome {
        use depctl_kernel::model::{AgentKind, StepOutcome};
        match step.agent {
            AgentKind::Retriever => StepOutcome::success(json!({"evidence_retrieved": true})),
            AgentKind::Planner => StepOutcome::success(json!({"artifact_generated": true})),
            AgentKind::Executor => self.executor.execute(&step.action, artifact, env, constraints).await,
            AgentKind::Monitor => self.monitor.execute(&step.action, artifact).await,
        }
    }
}
