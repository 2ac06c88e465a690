//! Orchestrator configuration: the §6 knob list bundled into a single
//! immutable value, loaded from defaults, an optional file, and
//! `DEPCTL_*` environment variables.
//!
//! No process-wide mutable singletons — the config is constructed once and
//! passed into the `Orchestrator` at construction time.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::Environment;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_replans: u32,
    pub max_retries_per_step: u32,
    pub top_k_initial: usize,
    pub top_k_iterative: usize,
    pub retrieve_timeout_ms: u64,
    pub synthesize_timeout_ms: u64,
    pub backend_timeout_ms: u64,
    pub verify_timeout_ms: u64,
    pub verify_poll_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub audit_retry: u32,
    pub memory_recall_limit: usize,
    pub memory_ttl_days: i64,
    pub memory_retry_threshold: u32,
    pub memory_replan_threshold: u32,
    pub worker_pool_size: usize,
    pub execute_real: bool,
    pub approval_cost_threshold_usd_per_hour: f64,
    pub env_max_budget_usd_per_hour: HashMap<String, f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut env_max_budget_usd_per_hour = HashMap::new();
        env_max_budget_usd_per_hour.insert("dev".to_string(), 2.0);
        env_max_budget_usd_per_hour.insert("staging".to_string(), 15.0);
        env_max_budget_usd_per_hour.insert("prod".to_string(), 50.0);

        Self {
            max_replans: 3,
            max_retries_per_step: 3,
            top_k_initial: 3,
            top_k_iterative: 2,
            retrieve_timeout_ms: 10_000,
            synthesize_timeout_ms: 30_000,
            backend_timeout_ms: 60_000,
            verify_timeout_ms: 15 * 60_000,
            verify_poll_ms: 15_000,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            audit_retry: 5,
            memory_recall_limit: 5,
            memory_ttl_days: 90,
            memory_retry_threshold: 2,
            memory_replan_threshold: 2,
            worker_pool_size: num_cpus(),
            execute_real: false,
            approval_cost_threshold_usd_per_hour: 20.0,
            env_max_budget_usd_per_hour,
        }
    }
}

impl OrchestratorConfig {
    pub fn retrieve_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieve_timeout_ms)
    }
    pub fn synthesize_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesize_timeout_ms)
    }
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
    pub fn verify_poll(&self) -> Duration {
        Duration::from_millis(self.verify_poll_ms)
    }

    pub fn env_max_budget(&self, env: Environment) -> f64 {
        self.env_max_budget_usd_per_hour
            .get(env.as_str())
            .copied()
            .unwrap_or(f64::MAX)
    }

    /// Load defaults, then overlay a config file (YAML/TOML/JSON, detected
    /// from extension) if present, then overlay `DEPCTL_*` environment
    /// variables. Mirrors `mofa-kernel::config`'s layered-merge convention.
    pub fn load(path: Option<&str>) -> Result<Self, crate::error::DepctlError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&OrchestratorConfig::default()).map_err(|e| {
                crate::error::DepctlError::Config(format!("default serialization: {e}"))
            })?);

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| crate::error::DepctlError::Config(format!("reading {path}: {e}")))?;
            let substituted = substitute_env_vars(&raw);
            let format = detect_format(path)?;
            builder = builder.add_source(config::File::from_str(&substituted, format));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DEPCTL").separator("_").try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| crate::error::DepctlError::Config(e.to_string()))?;
        built
            .try_deserialize()
            .map_err(|e| crate::error::DepctlError::Config(e.to_string()))
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Detect configuration format from a file extension.
fn detect_format(path: &str) -> Result<config::FileFormat, crate::error::DepctlError> {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| crate::error::DepctlError::Config("no file extension".into()))?;
    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(config::FileFormat::Yaml),
        "toml" => Ok(config::FileFormat::Toml),
        "json" => Ok(config::FileFormat::Json),
        other => Err(crate::error::DepctlError::Config(format!("unsupported format: {other}"))),
    }
}

/// Substitute `${VAR}` and `$VAR` references with environment variable
/// values, leaving unresolved references untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    result = re_braced
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();
    result = re_simple
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    result
}
