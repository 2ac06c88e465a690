//! `PlannerAgent` — ReAct loop (think → act → observe → reflect) that
//! produces an `ExecutionPlan` from an intent, or a replanned suffix after a
//! step failure.

use std::sync::Arc;

use depctl_kernel::error::{DepctlError, DepctlResult};
use depctl_kernel::model::{
    AgentKind, Constraints, DeploymentArtifact, Environment, Evidence, ExecutionPlan, MemoryEntry,
    MemoryOutcome, ReasoningStep, StepStatus, TaskStep,
};
use depctl_kernel::traits::Synthesizer;
use depctl_kernel::OrchestratorConfig;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use super::kernel::AgentKernel;

/// Output of `Plan`/`Replan`: the synthesized artifact alongside the
/// execution plan built to realize it. The orchestrator persists both onto
/// the owning `DeploymentPlan`.
pub struct PlanningResult {
    pub artifact: DeploymentArtifact,
    pub execution_plan: ExecutionPlan,
}

pub struct PlannerAgent {
    synthesizer: Arc<dyn Synthesizer>,
    kernel: Arc<AgentKernel>,
    config: OrchestratorConfig,
}

impl PlannerAgent {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, kernel: Arc<AgentKernel>, config: OrchestratorConfig) -> Self {
        Self { synthesizer, kernel, config }
    }

    /// The default step template produced by `Plan` (§4.2).
    fn default_step_template() -> Vec<(AgentKind, &'static str)> {
        vec![
            (AgentKind::Retriever, "retrieve_policies"),
            (AgentKind::Planner, "generate_config"),
            (AgentKind::Executor, "validate_plan"),
            (AgentKind::Executor, "create_model"),
            (AgentKind::Executor, "create_endpoint_config"),
            (AgentKind::Executor, "create_endpoint"),
            (AgentKind::Monitor, "configure_monitoring"),
            (AgentKind::Monitor, "verify_deployment"),
        ]
    }

    fn build_steps(template: Vec<(AgentKind, &'static str)>, start_index: usize, id_suffix: &str) -> Vec<TaskStep> {
        template
            .into_iter()
            .enumerate()
            .map(|(i, (agent, action))| {
                TaskStep::new(format!("step-{}{id_suffix}", start_index + i), agent, action)
            })
            .collect()
    }

    fn prompt(
        intent: &str,
        env: Environment,
        evidence: &[Evidence],
        semantic_lessons: &[String],
        failed_step_error: Option<&str>,
    ) -> String {
        let mut prompt = format!("intent: {intent}\nenv: {}\n", env.as_str());
        prompt.push_str("evidence:\n");
        for e in evidence {
            prompt.push_str(&format!("- [{:.2}] {}: {}\n", e.score, e.title, e.snippet));
        }
        if !semantic_lessons.is_empty() {
            prompt.push_str("learned lessons:\n");
            for lesson in semantic_lessons {
                prompt.push_str(&format!("- {lesson}\n"));
            }
        }
        if let Some(err) = failed_step_error {
            prompt.push_str(&format!("previous attempt failed: {err}\navoid repeating this failure.\n"));
        }
        prompt
    }

    /// Structural self-validation (§4.2 "Observe"): required fields present,
    /// ranges sane. Returns the gaps found, if any.
    fn self_validate(artifact: &DeploymentArtifact) -> Vec<String> {
        let mut gaps = Vec::new();
        if artifact.model_name.trim().is_empty() {
            gaps.push("model_name is empty".to_string());
        }
        if artifact.endpoint_name.trim().is_empty() {
            gaps.push("endpoint_name is empty".to_string());
        }
        if !(1..=4).contains(&artifact.instance_count) {
            gaps.push(format!("instance_count {} out of [1,4]", artifact.instance_count));
        }
        if artifact.autoscaling_min > artifact.autoscaling_max {
            gaps.push("autoscaling_min exceeds autoscaling_max".to_string());
        }
        if artifact.budget_usd_per_hour < 0.0 {
            gaps.push("budget_usd_per_hour is negative".to_string());
        }
        gaps
    }

    async fn synthesize_with_one_retry(
        &self,
        base_prompt: &str,
    ) -> DepctlResult<(DeploymentArtifact, ReasoningStep)> {
        let first = self.synthesizer.synthesize(base_prompt, self.config.synthesize_timeout()).await;

        let (artifact, attempt) = match first {
            Ok(artifact) => {
                let gaps = Self::self_validate(&artifact);
                if gaps.is_empty() {
                    return Ok((
                        artifact,
                        ReasoningStep {
                            thought: "synthesized artifact on first attempt".into(),
                            reasoning: "structural self-validation passed".into(),
                            confidence: 0.9,
                            alternatives: vec![],
                        },
                    ));
                }
                (Some(artifact), gaps)
            }
            Err(e) => (None, vec![e.to_string()]),
        };

        // Retry once with the validation gaps appended to the prompt.
        let retry_prompt = format!("{base_prompt}\nvalidation gaps from previous attempt: {:?}\n", attempt);
        let retried = self.synthesizer.synthesize(&retry_prompt, self.config.synthesize_timeout()).await?;
        let gaps = Self::self_validate(&retried);
        if !gaps.is_empty() {
            return Err(DepctlError::SynthesisFailed(format!("synthesis_invalid after retry: {gaps:?}")));
        }

        let _ = artifact; // first attempt's artifact, if any, is discarded in favor of the retry
        Ok((
            retried,
            ReasoningStep {
                thought: "synthesized artifact after one retry".into(),
                reasoning: format!("first attempt had gaps: {attempt:?}"),
                confidence: 0.6,
                alternatives: vec![],
            },
        ))
    }

    /// `Plan(intent, env, evidence, constraints) -> (Artifact, ExecutionPlan)`.
    #[instrument(skip(self, evidence, constraints), fields(intent = %intent))]
    pub async fn plan(
        &self,
        intent: &str,
        env: Environment,
        evidence: &[Evidence],
        constraints: &Constraints,
    ) -> DepctlResult<PlanningResult> {
        let _ = constraints;

        // Think: recall similar prior experience.
        let recalled = self.kernel.recall(AgentKind::Planner, intent, self.config.memory_recall_limit).await;
        let semantic_lessons: Vec<String> =
            recalled.iter().filter_map(|m| m.lesson.clone()).collect();

        let mut think_step = ReasoningStep {
            thought: format!("planning for intent '{intent}' in {}", env.as_str()),
            reasoning: format!("recalled {} prior memories", recalled.len()),
            confidence: 0.8,
            alternatives: vec!["skip memory recall".to_string()],
        };
        if !semantic_lessons.is_empty() {
            think_step.reasoning.push_str(&format!("; {} applicable lessons", semantic_lessons.len()));
        }

        // Act: synthesize the artifact.
        let prompt = Self::prompt(intent, env, evidence, &semantic_lessons, None);
        let synth_result = self.synthesize_with_one_retry(&prompt).await;

        let mut chain_thoughts = vec![think_step];

        let artifact = match synth_result {
            Ok((artifact, act_step)) => {
                chain_thoughts.push(act_step);
                artifact
            }
            Err(e) => {
                self.reflect(intent, env, false, Some(e.to_string())).await;
                return Err(e);
            }
        };

        let steps = Self::build_steps(Self::default_step_template(), 0, "");
        let reasoning_chain = AgentKernel::build_reasoning_chain("planner", chain_thoughts);

        // Reflect: write an episodic memory entry.
        self.reflect(intent, env, true, None).await;

        let execution_plan = ExecutionPlan { plan_id: Uuid::new_v4(), steps, reasoning_chain };
        Ok(PlanningResult { artifact, execution_plan })
    }

    /// `Replan(intent, current_plan, failed_step, evidence) -> (Artifact, ExecutionPlan)`.
    ///
    /// Preserves the identity and status of every completed step; new steps
    /// replace the suffix beginning at the failed step, with fresh
    /// `step_id`s.
    #[instrument(skip(self, current_plan, evidence), fields(intent = %intent, failed_step = %failed_step.step_id))]
    pub async fn replan(
        &self,
        intent: &str,
        env: Environment,
        current_plan: &ExecutionPlan,
        failed_step: &TaskStep,
        evidence: &[Evidence],
    ) -> DepctlResult<PlanningResult> {
        let recalled = self.kernel.recall(AgentKind::Planner, intent, self.config.memory_recall_limit).await;
        let semantic_lessons: Vec<String> = recalled.iter().filter_map(|m| m.lesson.clone()).collect();

        let prompt = Self::prompt(intent, env, evidence, &semantic_lessons, failed_step.error.as_deref());
        let (artifact, act_step) = self.synthesize_with_one_retry(&prompt).await?;

        let completed_prefix: Vec<TaskStep> = current_plan
            .steps
            .iter()
            .take_while(|s| matches!(s.status, StepStatus::Completed))
            .cloned()
            .collect();

        let failed_index = current_plan
            .steps
            .iter()
            .position(|s| s.step_id == failed_step.step_id)
            .unwrap_or(completed_prefix.len());

        // New steps may only appear at or after the failed step's position:
        // start the fresh suffix from the failed step's own action onward.
        let remaining_template: Vec<(AgentKind, &'static str)> = Self::default_step_template()
            .into_iter()
            .skip(failed_index)
            .collect();
        // Position alone can't distinguish a replanned step_id from the one it
        // replaces (the failed step's index always equals the completed
        // prefix's length), so tag the suffix with this replan's generation.
        let generation = current_plan
            .reasoning_chain
            .steps
            .iter()
            .filter(|s| s.thought.starts_with("replanning after failure"))
            .count()
            + 1;
        let new_suffix =
            Self::build_steps(remaining_template, completed_prefix.len(), &format!("-r{generation}"));

        let mut steps = completed_prefix;
        steps.extend(new_suffix);

        let mut reasoning_chain = current_plan.reasoning_chain.clone();
        reasoning_chain.push(ReasoningStep {
            thought: format!("replanning after failure of step {}", failed_step.step_id),
            reasoning: format!(
                "failed step error: {:?}; new artifact instance_type={}",
                failed_step.error, artifact.instance_type
            ),
            confidence: act_step.confidence,
            alternatives: vec![],
        });

        self.reflect(intent, env, true, None).await;

        let execution_plan = ExecutionPlan { plan_id: current_plan.plan_id, steps, reasoning_chain };
        Ok(PlanningResult { artifact, execution_plan })
    }

    async fn reflect(&self, intent: &str, env: Environment, observation_passed: bool, error: Option<String>) {
        let entry = MemoryEntry::episodic(
            AgentKind::Planner,
            json!({"intent": intent, "env": env.as_str(), "observation_passed": observation_passed}),
            MemoryOutcome { status: if observation_passed { "ok".into() } else { "failed".into() }, error },
        );
        let _ = self.kernel.remember(entry).await;
    }
}
