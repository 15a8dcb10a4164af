//! Core data models for the pod monitor

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

/// Identity of a pod, formatted as `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodKey(String);

impl PodKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container state fields inspected by the classifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerObservation {
    pub waiting_reason: Option<String>,
    pub terminated_reason: Option<String>,
}

/// Snapshot of the pod fields the monitor cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodObservation {
    pub namespace: String,
    pub name: String,
    pub phase: Option<String>,
    pub container_statuses: Vec<ContainerObservation>,
}

impl PodObservation {
    pub fn key(&self) -> PodKey {
        PodKey::new(&self.namespace, &self.name)
    }
}

impl From<&Pod> for PodObservation {
    fn from(pod: &Pod) -> Self {
        let status = pod.status.as_ref();

        let container_statuses = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| {
                        let state = cs.state.as_ref();
                        ContainerObservation {
                            waiting_reason: state
                                .and_then(|s| s.waiting.as_ref())
                                .and_then(|w| w.reason.clone()),
                            terminated_reason: state
                                .and_then(|s| s.terminated.as_ref())
                                .and_then(|t| t.reason.clone()),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            phase: status.and_then(|s| s.phase.clone()),
            container_statuses,
        }
    }
}

/// Result of classifying a single observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub is_bad: bool,
    pub reason: String,
}

impl ClassificationResult {
    pub fn bad(reason: impl Into<String>) -> Self {
        Self {
            is_bad: true,
            reason: reason.into(),
        }
    }

    pub fn ok() -> Self {
        Self {
            is_bad: false,
            reason: String::new(),
        }
    }
}

/// Payload sent to the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRequest {
    pub namespace: String,
    pub pod_name: String,
    pub reason: String,
}
