//! `DeploymentBackend` adapters.
//!
//! `DryRunBackend` is the default (§4.3 "dry-run mode, default on"): every
//! `Create*`/`Configure*` call is replaced with a structured log entry and a
//! synthetic successful outcome. A real backend would implement the same
//! trait against the cloud model-hosting API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use depctl_kernel::model::DeploymentArtifact;
use depctl_kernel::traits::{BackendResult, DeploymentBackend, EndpointStatus};
use tokio::sync::{Notify, RwLock};

/// Dry-run backend: logs the call and returns success without touching any
/// real infrastructure. Controlled by the process-wide `execute_real` flag
/// upstream (the orchestrator only ever talks to this trait, never checks
/// the flag itself — callers choose which backend to construct).
pub struct DryRunBackend;

#[async_trait]
impl DeploymentBackend for DryRunBackend {
    async fn create_model(&self, artifact: &DeploymentArtifact) -> BackendResult {
        tracing::info!(model = %artifact.model_name, "dry-run: create_model");
        BackendResult::ok(format!("model-{}", artifact.model_name))
    }

    async fn create_endpoint_config(&self, artifact: &DeploymentArtifact) -> BackendResult {
        tracing::info!(endpoint = %artifact.endpoint_name, "dry-run: create_endpoint_config");
        BackendResult::ok(format!("config-{}", artifact.endpoint_name))
    }

    async fn create_endpoint(&self, artifact: &DeploymentArtifact) -> BackendResult {
        tracing::info!(endpoint = %artifact.endpoint_name, "dry-run: create_endpoint");
        BackendResult::ok(format!("endpoint-{}", artifact.endpoint_name))
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> (BackendResult, Option<EndpointStatus>) {
        tracing::info!(endpoint = %endpoint_name, "dry-run: describe_endpoint");
        (BackendResult::ok(endpoint_name.to_string()), Some(EndpointStatus::InService))
    }

    async fn configure_monitor(&self, artifact: &DeploymentArtifact) -> BackendResult {
        tracing::info!(endpoint = %artifact.endpoint_name, "dry-run: configure_monitor");
        BackendResult::ok(format!("monitor-{}", artifact.endpoint_name))
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> BackendResult {
        tracing::info!(endpoint = %endpoint_name, "dry-run: delete_endpoint");
        BackendResult::ok(endpoint_name.to_string())
    }
}

/// Real HTTP-backed implementation shape: delegates every call to a
/// `reqwest` client against a configured base URL. Left unwired to a real
/// cloud API in this reference implementation (that API is out of scope
/// per §1), but shows the idiomatic shape a production adapter would take.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    async fn post(&self, path: &str, artifact: &DeploymentArtifact) -> BackendResult {
        let url = format!("{}{}", self.base_url, path);
        match self.client.post(&url).json(artifact).send().await {
            Ok(resp) if resp.status().is_success() => BackendResult::ok(url),
            Ok(resp) if resp.status().is_server_error() => {
                BackendResult::err(depctl_kernel::error::ErrorKind::Transient, format!("{} returned {}", path, resp.status()))
            }
            Ok(resp) => BackendResult::err(
                depctl_kernel::error::ErrorKind::Semantic,
                format!("{} returned {}", path, resp.status()),
            ),
            Err(e) if e.is_timeout() => {
                BackendResult::err(depctl_kernel::error::ErrorKind::Transient, format!("{path} timed out: {e}"))
            }
            Err(e) => BackendResult::err(depctl_kernel::error::ErrorKind::Transient, e.to_string()),
        }
    }
}

#[async_trait]
impl DeploymentBackend for HttpBackend {
    async fn create_model(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.post("/models", artifact).await
    }

    async fn create_endpoint_config(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.post("/endpoint-configs", artifact).await
    }

    async fn create_endpoint(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.post("/endpoints", artifact).await
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> (BackendResult, Option<EndpointStatus>) {
        let url = format!("{}/endpoints/{}", self.base_url, endpoint_name);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => (BackendResult::ok(url), Some(EndpointStatus::InService)),
            Ok(resp) => (
                BackendResult::err(depctl_kernel::error::ErrorKind::Semantic, format!("describe returned {}", resp.status())),
                None,
            ),
            Err(e) => (BackendResult::err(depctl_kernel::error::ErrorKind::Transient, e.to_string()), None),
        }
    }

    async fn configure_monitor(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.post("/monitors", artifact).await
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> BackendResult {
        let url = format!("{}/endpoints/{}", self.base_url, endpoint_name);
        match self.client.delete(&url).send().await {
            Ok(resp) if resp.status().is_success() => BackendResult::ok(url),
            Ok(resp) => BackendResult::err(depctl_kernel::error::ErrorKind::Semantic, format!("delete returned {}", resp.status())),
            Err(e) => BackendResult::err(depctl_kernel::error::ErrorKind::Transient, e.to_string()),
        }
    }
}

/// Test/demo backend whose `create_endpoint` can be scripted to fail N
/// times with a given error kind before succeeding — used to exercise the
/// retry and replan paths (§8 scenarios 4-6) without a real network call.
pub struct ScriptedFailureBackend {
    inner: DryRunBackend,
    create_endpoint_failures_remaining: AtomicU32,
    failure_kind: depctl_kernel::error::ErrorKind,
    failure_message: String,
    /// Instance types that should still fail even after the configured
    /// failure count, simulating "not available in this region".
    unavailable_instance_types: RwLock<Vec<String>>,
}

impl ScriptedFailureBackend {
    pub fn new(failures: u32, kind: depctl_kernel::error::ErrorKind, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: DryRunBackend,
            create_endpoint_failures_remaining: AtomicU32::new(failures),
            failure_kind: kind,
            failure_message: message.into(),
            unavailable_instance_types: RwLock::new(Vec::new()),
        })
    }

    /// Marks an instance type as permanently unavailable (used to simulate
    /// the "instance type not available in region" replan scenario, where
    /// even a fresh instance type choice from a replan must eventually
    /// succeed).
    pub async fn mark_unavailable(&self, instance_type: impl Into<String>) {
        self.unavailable_instance_types.write().await.push(instance_type.into());
    }
}

#[async_trait]
impl DeploymentBackend for ScriptedFailureBackend {
    async fn create_model(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.create_model(artifact).await
    }

    async fn create_endpoint_config(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.create_endpoint_config(artifact).await
    }

    async fn create_endpoint(&self, artifact: &DeploymentArtifact) -> BackendResult {
        if self.unavailable_instance_types.read().await.contains(&artifact.instance_type) {
            return BackendResult::err(
                depctl_kernel::error::ErrorKind::Semantic,
                format!("instance type {} not available in region", artifact.instance_type),
            );
        }
        let remaining = self.create_endpoint_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.create_endpoint_failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return BackendResult::err(self.failure_kind, self.failure_message.clone());
        }
        self.inner.create_endpoint(artifact).await
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> (BackendResult, Option<EndpointStatus>) {
        self.inner.describe_endpoint(endpoint_name).await
    }

    async fn configure_monitor(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.configure_monitor(artifact).await
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> BackendResult {
        self.inner.delete_endpoint(endpoint_name).await
    }
}

/// Test double whose `create_endpoint` call blocks mid-flight until the
/// test releases it, with a signal the test can wait on to know the call
/// has been entered. Used to deterministically land a `pause`/`delete`
/// call while a step is executing, without timing-dependent sleeps.
pub struct PausableBackend {
    inner: DryRunBackend,
    entered: Notify,
    release: Notify,
}

impl PausableBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: DryRunBackend, entered: Notify::new(), release: Notify::new() })
    }

    /// Resolves once `create_endpoint` has been entered (but not yet
    /// returned).
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets a blocked `create_endpoint` call proceed to completion.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl DeploymentBackend for PausableBackend {
    async fn create_model(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.create_model(artifact).await
    }

    async fn create_endpoint_config(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.create_endpoint_config(artifact).await
    }

    async fn create_endpoint(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.create_endpoint(artifact).await
    }

    async fn describe_endpoint(&self, endpoint_name: &str) -> (BackendResult, Option<EndpointStatus>) {
        self.inner.describe_endpoint(endpoint_name).await
    }

    async fn configure_monitor(&self, artifact: &DeploymentArtifact) -> BackendResult {
        self.inner.configure_monitor(artifact).await
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> BackendResult {
        self.inner.delete_endpoint(endpoint_name).await
    }
}
