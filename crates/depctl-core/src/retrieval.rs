//! Default `Retriever`: a two-stage pipeline (token-overlap shortlist, then
//! score-threshold rerank) over a small in-process policy corpus, so the
//! engine runs end-to-end without an external retrieval service.
//!
//! Real deployments would swap this for an adapter that calls out to an
//! embedding + cross-encoder service; the trait boundary in
//! `depctl_kernel::traits::Retriever` is what matters, not this
//! implementation.

use async_trait::async_trait;
use depctl_kernel::model::Evidence;
use depctl_kernel::traits::Retriever;
use std::time::Duration;

/// One policy document in the in-memory corpus.
#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub source: String,
}

/// Deterministic, dependency-free retriever backed by an in-memory corpus.
pub struct InMemoryRetriever {
    corpus: Vec<PolicyDocument>,
    min_score: f64,
}

impl InMemoryRetriever {
    pub fn new(corpus: Vec<PolicyDocument>) -> Self {
        Self { corpus, min_score: 0.0 }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// A small default corpus of deployment policy snippets, useful for
    /// demos and tests.
    pub fn default_corpus() -> Self {
        Self::new(vec![
            PolicyDocument {
                doc_id: "pol-001".into(),
                title: "Staging instance policy".into(),
                text: "Staging deployments may use ml.m5.large or ml.m5.xlarge instance types."
                    .into(),
                source: "policy/staging.md".into(),
            },
            PolicyDocument {
                doc_id: "pol-002".into(),
                title: "Production HA policy".into(),
                text: "Production endpoints must run at least two instances and configure rollback alarms."
                    .into(),
                source: "policy/prod.md".into(),
            },
            PolicyDocument {
                doc_id: "pol-003".into(),
                title: "Budget policy".into(),
                text: "Estimated hourly cost must not exceed the environment budget cap or the caller's constraint."
                    .into(),
                source: "policy/budget.md".into(),
            },
            PolicyDocument {
                doc_id: "pol-004".into(),
                title: "Chatbot deployment guidance".into(),
                text: "Chatbot and conversational model deployments should default to ml.m5.large for a balance of latency and cost."
                    .into(),
                source: "policy/chatbot.md".into(),
            },
        ])
    }

    fn shortlist(&self, query: &str) -> Vec<(f64, &PolicyDocument)> {
        let query_tokens: Vec<String> =
            query.to_lowercase().split_whitespace().map(String::from).collect();
        self.corpus
            .iter()
            .map(|doc| {
                let text_lower = format!("{} {}", doc.title, doc.text).to_lowercase();
                let matched =
                    query_tokens.iter().filter(|t| text_lower.contains(t.as_str())).count();
                let score = if query_tokens.is_empty() {
                    0.0
                } else {
                    matched as f64 / query_tokens.len() as f64
                };
                (score, doc)
            })
            .collect()
    }

    /// Rerank: filter by `min_score`, sort by score descending, document id
    /// as the deterministic tie-break (§4.5, §9 Open Questions).
    fn rerank(&self, mut shortlisted: Vec<(f64, &PolicyDocument)>, k: usize) -> Vec<Evidence> {
        shortlisted.retain(|(score, _)| *score >= self.min_score);
        shortlisted.sort_by(|a, b| match b.0.partial_cmp(&a.0) {
            Some(std::cmp::Ordering::Equal) | None => a.1.doc_id.cmp(&b.1.doc_id),
            Some(ordering) => ordering,
        });
        shortlisted
            .into_iter()
            .take(k)
            .map(|(score, doc)| Evidence {
                title: doc.title.clone(),
                snippet: doc.text.clone(),
                source: doc.source.clone(),
                score,
                doc_id: doc.doc_id.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, query: &str, k: usize, _timeout: Duration) -> Vec<Evidence> {
        let shortlisted = self.shortlist(query);
        self.rerank(shortlisted, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retrieve_orders_by_score_descending() {
        let retriever = InMemoryRetriever::default_corpus();
        let evidence = retriever.retrieve("production rollback alarms", 3, Duration::from_secs(1)).await;
        assert!(!evidence.is_empty());
        for pair in evidence.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn retrieve_respects_k() {
        let retriever = InMemoryRetriever::default_corpus();
        let evidence = retriever.retrieve("deployment policy budget staging", 2, Duration::from_secs(1)).await;
        assert!(evidence.len() <= 2);
    }

    #[tokio::test]
    async fn ties_break_on_doc_id() {
        let retriever = InMemoryRetriever::new(vec![
            PolicyDocument { doc_id: "z-doc".into(), title: "t".into(), text: "shared".into(), source: "s".into() },
            PolicyDocument { doc_id: "a-doc".into(), title: "t".into(), text: "shared".into(), source: "s".into() },
        ]);
        let evidence = retriever.retrieve("shared", 2, Duration::from_secs(1)).await;
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].doc_id, "a-doc");
        assert_eq!(evidence[1].doc_id, "z-doc");
    }

    #[tokio::test]
    async fn empty_query_yields_no_strong_matches() {
        let retriever = InMemoryRetriever::default_corpus().with_min_score(0.1);
        let evidence = retriever.retrieve("", 3, Duration::from_secs(1)).await;
        assert!(evidence.is_empty());
    }
}
