//! depctl-kernel — trait and data-model layer for the autonomous deployment
//! orchestrator.
//!
//! This crate defines *what* the engine needs from the outside world
//! (`Retriever`, `Synthesizer`, `DeploymentBackend`, `PlanStore`,
//! `MemoryStore`, `AuditSink`) and the data it passes around
//! (`DeploymentPlan`, `ExecutionPlan`, `TaskStep`, ...). It depends on
//! nothing concrete — no I/O, no HTTP client, no database driver — so that
//! `depctl-core` can provide in-memory defaults and real adapters without
//! this crate ever depending back on them.

pub mod backoff;
pub mod config;
pub mod error;
pub mod model;
pub mod traits;

pub use config::OrchestratorConfig;
pub use error::{DepctlError, DepctlResult, ErrorKind};
