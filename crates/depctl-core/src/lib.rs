//! Concrete agents, in-memory stores, adapters, and the orchestrator state
//! machine built on top of `depctl_kernel`'s traits and data model.

pub mod agents;
pub mod audit;
pub mod backend;
pub mod guardrails;
pub mod orchestrator;
pub mod retrieval;
pub mod stores;
pub mod synthesis;

#[cfg(test)]
mod test_support;

pub use orchestrator::Orchestrator;
