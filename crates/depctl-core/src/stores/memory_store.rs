//! In-memory `MemoryStore` implementation with similarity recall.
//!
//! Uses stored embeddings (cosine similarity) when present, otherwise falls
//! back to token-overlap similarity — the kernel must not assume embedding
//! presence (§9 Design Notes).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depctl_kernel::error::DepctlResult;
use depctl_kernel::model::{AgentKind, MemoryEntry};
use depctl_kernel::traits::MemoryStore;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryMemoryStore {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
    ttl_days: i64,
}

impl InMemoryMemoryStore {
    pub fn new(ttl_days: i64) -> Self {
        Self { entries: Arc::new(RwLock::new(Vec::new())), ttl_days }
    }

    pub fn shared(ttl_days: i64) -> Arc<Self> {
        Arc::new(Self::new(ttl_days))
    }

    /// Drops expired episodic entries. Called lazily on read paths rather
    /// than via a background sweeper, keeping this store dependency-free.
    async fn evict_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.ttl_days);
        let mut entries = self.entries.write().await;
        entries.retain(|e| {
            matches!(e.kind, depctl_kernel::model::MemoryKind::Semantic) || e.timestamp >= cutoff
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Token-overlap similarity: fraction of query tokens present in the
/// candidate's searchable text (lowercase, whitespace-split).
fn token_overlap(query: &str, text: &str) -> f64 {
    let query_tokens: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let matched = query_tokens.iter().filter(|t| text_lower.contains(t.as_str())).count();
    matched as f64 / query_tokens.len() as f64
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

fn searchable_text(entry: &MemoryEntry) -> String {
    let mut text = entry.context.to_string();
    if let Some(pattern) = &entry.pattern {
        text.push(' ');
        text.push_str(pattern);
    }
    if let Some(lesson) = &entry.lesson {
        text.push(' ');
        text.push_str(lesson);
    }
    if let Some(err) = &entry.outcome.error {
        text.push(' ');
        text.push_str(err);
    }
    text
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn put(&self, entry: MemoryEntry) -> DepctlResult<Uuid> {
        let id = entry.memory_id;
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn recall(&self, agent: AgentKind, query: &str, limit: usize) -> Vec<MemoryEntry> {
        self.evict_expired().await;
        let entries = self.entries.read().await;

        // No query embedding is passed in at this boundary (the kernel
        // contract only takes a text query), so ranking always falls back
        // to token overlap unless a future caller threads an embedding in;
        // per-entry embeddings are still honored for cosine re-ranking when
        // present on both sides via `recall_with_embedding`.
        let mut scored: Vec<(f64, &MemoryEntry)> = entries
            .iter()
            .filter(|e| e.agent == agent)
            .map(|e| (token_overlap(query, &searchable_text(e)), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect()
    }

    async fn list(&self, agent: AgentKind, since: Option<DateTime<Utc>>) -> Vec<MemoryEntry> {
        self.evict_expired().await;
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.agent == agent)
            .filter(|e| since.map(|s| e.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect()
    }

    async fn count_matching(&self, agent: AgentKind, action: &str, resolved_by: &str) -> usize {
        self.evict_expired().await;
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.agent == agent)
            .filter(|e| {
                let text = searchable_text(e);
                text.to_lowercase().contains(&action.to_lowercase())
                    && text.to_lowercase().contains(&resolved_by.to_lowercase())
            })
            .count()
    }

    async fn purge_for_plan(&self, plan_id: Uuid) -> DepctlResult<usize> {
        let marker = plan_id.to_string();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !e.context.to_string().contains(&marker));
        Ok(before - entries.len())
    }
}

impl InMemoryMemoryStore {
    /// Recall ranked by cosine similarity against `query_embedding` when
    /// every candidate carries an embedding, else falls back to
    /// [`MemoryStore::recall`]'s token-overlap ranking.
    pub async fn recall_with_embedding(
        &self,
        agent: AgentKind,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        self.evict_expired().await;
        if let Some(q_emb) = query_embedding {
            let entries = self.entries.read().await;
            let candidates: Vec<&MemoryEntry> = entries.iter().filter(|e| e.agent == agent).collect();
            if !candidates.is_empty() && candidates.iter().all(|e| e.embedding.is_some()) {
                let mut scored: Vec<(f64, &MemoryEntry)> = candidates
                    .into_iter()
                    .map(|e| (cosine_similarity(q_emb, e.embedding.as_ref().unwrap()), e))
                    .collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                return scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect();
            }
        }
        self.recall(agent, query, limit).await
    }
}
