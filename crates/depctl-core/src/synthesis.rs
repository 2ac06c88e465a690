//! `Synthesizer` adapters: the language model that turns a prompt plus
//! retrieved evidence into a `DeploymentArtifact`.
//!
//! Two implementations ship here: a deterministic rule-based synthesizer
//! used by default and in tests (so the whole engine runs without network
//! access), and an HTTP adapter that POSTs the prompt to a configured
//! endpoint and parses the JSON response into the artifact schema — parse
//! errors are synthesis failures, per §6.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use depctl_kernel::error::{DepctlError, DepctlResult};
use depctl_kernel::model::DeploymentArtifact;
use depctl_kernel::traits::Synthesizer;

/// Deterministic stand-in for the LLM: derives a plausible artifact from
/// simple keyword heuristics over the prompt. Good enough to drive the
/// orchestrator end-to-end in tests and demos.
pub struct DeterministicSynthesizer;

impl DeterministicSynthesizer {
    pub fn new() -> Self {
        Self
    }

    fn slugify(text: &str) -> String {
        let lower = text.to_lowercase();
        let mut slug = String::new();
        let mut last_was_dash = false;
        for c in lower.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
                last_was_dash = false;
            } else if !last_was_dash && !slug.is_empty() {
                slug.push('-');
                last_was_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        slug.chars().take(63).collect()
    }
}

impl Default for DeterministicSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance types this synthesizer will consider, in preference order, per
/// environment. A replan prompt that flags one of these as unavailable
/// (`"<type> not available"`) rules it out in favor of the next candidate.
fn candidate_instance_types(env_is_prod: bool, env_is_staging: bool) -> &'static [&'static str] {
    if env_is_prod {
        &["ml.m5.large", "ml.m5.xlarge", "ml.m5.2xlarge"]
    } else if env_is_staging {
        &["ml.m5.large", "ml.m5.xlarge"]
    } else {
        &["ml.m5.large"]
    }
}

/// Picks the first candidate the prompt hasn't flagged as unavailable,
/// falling back to the first candidate if every one has been rejected (the
/// caller's retry/replan budget is then what bounds convergence, not this
/// synthesizer looping forever).
fn pick_instance_type(prompt_lower: &str, candidates: &[&'static str]) -> String {
    candidates
        .iter()
        .find(|t| !prompt_lower.contains(&format!("{t} not available")))
        .or_else(|| candidates.first())
        .map(|t| t.to_string())
        .unwrap_or_else(|| "ml.m5.large".to_string())
}

#[async_trait]
impl Synthesizer for DeterministicSynthesizer {
    async fn synthesize(&self, prompt: &str, _timeout: Duration) -> DepctlResult<DeploymentArtifact> {
        let lower = prompt.to_lowercase();

        let env_is_prod = lower.contains("env=prod") || lower.contains("environment: prod");
        let env_is_staging = lower.contains("env=staging") || lower.contains("environment: staging");

        let instance_type =
            pick_instance_type(&lower, candidate_instance_types(env_is_prod, env_is_staging));

        let instance_count: u32 = if env_is_prod { 2 } else { 1 };

        let mut rollback_alarms = HashSet::new();
        if env_is_prod {
            rollback_alarms.insert("high-error-rate".to_string());
            rollback_alarms.insert("high-latency".to_string());
        }

        // Pull a model/endpoint name candidate out of the prompt: prefer the
        // text after "deploy" up to "for"/"to", falling back to a generic slug.
        let model_name = extract_after(&lower, "deploy ", &[" for ", " to ", " in "])
            .map(|s| Self::slugify(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "model".to_string());
        let endpoint_name = extract_after(&lower, " for ", &[" in ", " with "])
            .map(|s| Self::slugify(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("{model_name}-endpoint"));

        let budget_usd_per_hour = if env_is_prod {
            45.0
        } else if env_is_staging {
            12.0
        } else {
            1.5
        };

        Ok(DeploymentArtifact {
            model_name,
            endpoint_name,
            instance_type,
            instance_count,
            max_payload_mb: 10,
            autoscaling_min: 1,
            autoscaling_max: instance_count.max(1),
            rollback_alarms,
            budget_usd_per_hour,
        })
    }
}

fn extract_after(text: &str, marker: &str, stop_markers: &[&str]) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = stop_markers.iter().filter_map(|m| rest.find(m)).min().unwrap_or(rest.len());
    let candidate = rest[..end].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Synthesizer that POSTs `{prompt}` to a configured HTTP endpoint and
/// expects a JSON body parseable into `DeploymentArtifact`.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[derive(serde::Serialize)]
struct SynthesizeRequest<'a> {
    prompt: &'a str,
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, prompt: &str, timeout: Duration) -> DepctlResult<DeploymentArtifact> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&SynthesizeRequest { prompt })
            .send()
            .await
            .map_err(|e| DepctlError::SynthesisFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DepctlError::SynthesisFailed(format!(
                "synthesizer returned status {}",
                response.status()
            )));
        }

        response
            .json::<DeploymentArtifact>()
            .await
            .map_err(|e| DepctlError::SynthesisFailed(format!("parse error: {e}")))
    }
}
