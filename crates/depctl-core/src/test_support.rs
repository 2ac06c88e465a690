//! Shared test fixtures used across this crate's unit test modules.

#![cfg(test)]

use std::collections::HashSet;

use depctl_kernel::model::DeploymentArtifact;

pub fn sample_artifact() -> DeploymentArtifact {
    DeploymentArtifact {
        model_name: "demo-model".to_string(),
        endpoint_name: "demo-endpoint".to_string(),
        instance_type: "ml.m5.xlarge".to_string(),
        instance_count: 1,
        max_payload_mb: 10,
        autoscaling_min: 1,
        autoscaling_max: 1,
        rollback_alarms: HashSet::new(),
        budget_usd_per_hour: 5.0,
    }
}
