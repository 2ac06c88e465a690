//! Core data model: artifacts, evidence, reasoning, task steps, plans, memory.
//!
//! Entities and invariants follow the specification's data model section
//! exactly. Opaque step input/output maps are `serde_json::Value` objects,
//! addressed by small, agent-local tagged keys rather than ad-hoc strings at
//! the boundary (see `TaskStep::input`/`output` helpers).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Deployment target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

/// Known instance type enumeration (static price table keys double as the
/// enumeration source — see `depctl_core::guardrails::INSTANCE_PRICES`).
pub type InstanceType = String;

/// The synthesized, validated deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentArtifact {
    pub model_name: String,
    pub endpoint_name: String,
    pub instance_type: InstanceType,
    pub instance_count: u32,
    pub max_payload_mb: u32,
    pub autoscaling_min: u32,
    pub autoscaling_max: u32,
    pub rollback_alarms: HashSet<String>,
    pub budget_usd_per_hour: f64,
}

/// A retrieved policy snippet with a relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub title: String,
    pub snippet: String,
    pub source: String,
    /// Relevance score in `[0, 1]`.
    pub score: f64,
    /// Stable document id, used as the tie-break when scores are equal.
    pub doc_id: String,
}

/// A single step in a `ReasoningChain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub thought: String,
    pub reasoning: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub alternatives: Vec<String>,
}

/// An ordered sequence of reasoning steps plus an overall confidence and the
/// agent that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub agent: String,
    pub steps: Vec<ReasoningStep>,
    pub overall_confidence: f64,
}

impl ReasoningChain {
    pub fn new(agent: impl Into<String>) -> Self {
        Self { agent: agent.into(), steps: Vec::new(), overall_confidence: 1.0 }
    }

    /// Normalizes confidence to `[0, 1]` and recomputes the overall
    /// confidence as the minimum of individual step confidences (§4.2
    /// "Confidence reporting").
    pub fn push(&mut self, step: ReasoningStep) {
        let clamped = ReasoningStep { confidence: step.confidence.clamp(0.0, 1.0), ..step };
        self.steps.push(clamped);
        self.overall_confidence =
            self.steps.iter().map(|s| s.confidence).fold(1.0_f64, f64::min);
    }
}

/// Agent roles that can own a `TaskStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Executor,
    Monitor,
    Retriever,
}

/// Lifecycle status of a `TaskStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Thinking,
    Executing,
    Retrying,
    Completed,
    Failed,
    FailedPermanently,
    Skipped,
}

/// A unit of work within an `ExecutionPlan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub step_id: String,
    pub agent: AgentKind,
    pub action: String,
    pub status: StepStatus,
    pub input: Value,
    pub output: Value,
    pub error: Option<String>,
    pub retry_count: u32,
    pub needs_replan: bool,
    pub reasoning_chain: Option<ReasoningChain>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskStep {
    pub fn new(step_id: impl Into<String>, agent: AgentKind, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            agent,
            action: action.into(),
            status: StepStatus::Pending,
            input: Value::Object(Default::default()),
            output: Value::Object(Default::default()),
            error: None,
            retry_count: 0,
            needs_replan: false,
            reasoning_chain: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The ordered sequence of `TaskStep`s that realizes an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub steps: Vec<TaskStep>,
    pub reasoning_chain: ReasoningChain,
}

impl ExecutionPlan {
    /// Index of the first step that is not `Completed`/`Skipped`, if any.
    pub fn next_pending_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| !matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }

    /// True once every step is `Completed` or `Skipped`.
    pub fn is_complete(&self) -> bool {
        self.next_pending_index().is_none()
    }
}

/// Durable lifecycle status of a `DeploymentPlan` (see §4.1 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Created,
    Validating,
    ValidationFailed,
    AwaitingApproval,
    Approved,
    Rejected,
    Deploying,
    Deployed,
    Failed,
    Paused,
    Deleted,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::ValidationFailed
                | PlanStatus::Rejected
                | PlanStatus::Deployed
                | PlanStatus::Failed
                | PlanStatus::Deleted
        )
    }
}

/// Decision recorded by an `Approve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub decision: ApprovalDecision,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Submission-time constraints (budget ceiling, etc.).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    pub budget_usd_per_hour: Option<f64>,
}

/// The durable aggregate: intent, artifact, evidence, status, execution
/// plan, approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub plan_id: Uuid,
    pub user_id: String,
    pub intent: String,
    pub env: Environment,
    pub artifact: Option<DeploymentArtifact>,
    pub evidence: Vec<Evidence>,
    pub validation_errors: Vec<String>,
    pub validation_warnings: Vec<String>,
    pub constraints: Constraints,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub execution_plan: Option<ExecutionPlan>,
    pub approval: Option<Approval>,
    pub replan_count: u32,
    /// Propagated through every tracing span and audit record for this plan.
    pub correlation_id: Uuid,
}

impl DeploymentPlan {
    pub fn new(
        user_id: impl Into<String>,
        intent: impl Into<String>,
        env: Environment,
        constraints: Constraints,
    ) -> Self {
        let now = Utc::now();
        let plan_id = Uuid::new_v4();
        Self {
            plan_id,
            user_id: user_id.into(),
            intent: intent.into(),
            env,
            artifact: None,
            evidence: Vec::new(),
            validation_errors: Vec::new(),
            validation_warnings: Vec::new(),
            constraints,
            created_at: now,
            updated_at: now,
            status: PlanStatus::Created,
            execution_plan: None,
            approval: None,
            replan_count: 0,
            correlation_id: plan_id,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derived projection of a plan in `awaiting_approval`; identity = `plan_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub plan_id: Uuid,
    pub intent: String,
    pub env: Environment,
    pub artifact: DeploymentArtifact,
    pub estimated_cost_usd_per_hour: f64,
}

/// Kind of memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Episodic,
    Semantic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryOutcome {
    pub status: String,
    pub error: Option<String>,
}

/// A single memory record written by an agent through `AgentKernel`. Never
/// mutated after write; expires by TTL (episodic only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub memory_id: Uuid,
    pub agent: AgentKind,
    pub kind: MemoryKind,
    pub context: Value,
    pub outcome: MemoryOutcome,
    pub timestamp: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    /// Semantic entries only.
    pub pattern: Option<String>,
    pub lesson: Option<String>,
}

impl MemoryEntry {
    pub fn episodic(agent: AgentKind, context: Value, outcome: MemoryOutcome) -> Self {
        Self {
            memory_id: Uuid::new_v4(),
            agent,
            kind: MemoryKind::Episodic,
            context,
            outcome,
            timestamp: Utc::now(),
            embedding: None,
            pattern: None,
            lesson: None,
        }
    }

    pub fn semantic(
        agent: AgentKind,
        context: Value,
        outcome: MemoryOutcome,
        pattern: impl Into<String>,
        lesson: impl Into<String>,
    ) -> Self {
        Self {
            memory_id: Uuid::new_v4(),
            agent,
            kind: MemoryKind::Semantic,
            context,
            outcome,
            timestamp: Utc::now(),
            embedding: None,
            pattern: Some(pattern.into()),
            lesson: Some(lesson.into()),
        }
    }
}

/// Audit event types (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IntentSubmitted,
    ValidationPassed,
    ValidationFailed,
    ApprovalRequested,
    Approved,
    Rejected,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetried,
    Replan,
    Deployed,
    Failed,
    Paused,
    Restarted,
    Deleted,
}

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub plan_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub actor: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: Value,
}

impl AuditRecord {
    pub fn new(plan_id: Uuid, event_type: EventType, actor: impl Into<String>) -> Self {
        Self {
            plan_id,
            timestamp: Utc::now(),
            event_type,
            actor: actor.into(),
            before: None,
            after: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured outcome of a single step execution, returned by
/// `ExecutorAgent::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: StepOutcomeStatus,
    pub output: Value,
    pub error: Option<String>,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub needs_replan: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcomeStatus {
    Success,
    Error,
}

impl StepOutcome {
    pub fn success(output: Value) -> Self {
        Self { status: StepOutcomeStatus::Success, output, error: None, error_kind: None, needs_replan: false }
    }

    pub fn error(message: impl Into<String>, kind: crate::error::ErrorKind) -> Self {
        Self {
            status: StepOutcomeStatus::Error,
            output: Value::Object(Default::default()),
            error: Some(message.into()),
            error_kind: Some(kind),
            needs_replan: matches!(kind, crate::error::ErrorKind::Semantic),
        }
    }
}

/// Decision returned by `MonitorAgent::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Retry,
    Replan,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_chain_confidence_is_minimum_of_steps() {
        let mut chain = ReasoningChain::new("planner");
        chain.push(ReasoningStep { thought: "a".into(), reasoning: "x".into(), confidence: 0.9, alternatives: vec![] });
        chain.push(ReasoningStep { thought: "b".into(), reasoning: "y".into(), confidence: 0.4, alternatives: vec![] });
        assert_eq!(chain.overall_confidence, 0.4);
    }

    #[test]
    fn reasoning_chain_clamps_confidence() {
        let mut chain = ReasoningChain::new("planner");
        chain.push(ReasoningStep { thought: "a".into(), reasoning: "x".into(), confidence: 1.5, alternatives: vec![] });
        assert_eq!(chain.steps[0].confidence, 1.0);
    }

    #[test]
    fn execution_plan_next_pending_index() {
        let mut plan = ExecutionPlan {
            plan_id: Uuid::new_v4(),
            steps: vec![
                TaskStep::new("s1", AgentKind::Executor, "create_model"),
                TaskStep::new("s2", AgentKind::Executor, "create_endpoint"),
            ],
            reasoning_chain: ReasoningChain::new("planner"),
        };
        assert_eq!(plan.next_pending_index(), Some(0));
        plan.steps[0].status = StepStatus::Completed;
        assert_eq!(plan.next_pending_index(), Some(1));
        plan.steps[1].status = StepStatus::Completed;
        assert_eq!(plan.next_pending_index(), None);
        assert!(plan.is_complete());
    }

    #[test]
    fn plan_status_terminal_classification() {
        assert!(PlanStatus::Deployed.is_terminal());
        assert!(PlanStatus::Failed.is_terminal());
        assert!(!PlanStatus::Deploying.is_terminal());
        assert!(!PlanStatus::AwaitingApproval.is_terminal());
    }
}
