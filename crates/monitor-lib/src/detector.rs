//! Rising-edge detection on pod classifications
//!
//! A candidate alert is produced only when a pod moves from healthy to bad.
//! Newly observed pods are compared against an implicit healthy state, so a
//! pod that is already bad when first seen still yields a candidate.

use crate::classifier::classify;
use crate::models::{AlertRequest, PodKey, PodObservation};

/// A pod that just entered a bad state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCandidate {
    pub key: PodKey,
    pub namespace: String,
    pub pod_name: String,
    pub reason: String,
}

impl AlertCandidate {
    pub fn to_request(&self) -> AlertRequest {
        AlertRequest {
            namespace: self.namespace.clone(),
            pod_name: self.pod_name.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Stateless edge detector; both sides are reclassified on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector;

impl EdgeDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn on_created(&self, new: &PodObservation) -> Option<AlertCandidate> {
        Self::edge(false, new)
    }

    pub fn on_updated(&self, old: &PodObservation, new: &PodObservation) -> Option<AlertCandidate> {
        Self::edge(classify(old).is_bad, new)
    }

    pub fn on_deleted(&self, _obs: &PodObservation) -> Option<AlertCandidate> {
        None
    }

    fn edge(was_bad: bool, new: &PodObservation) -> Option<AlertCandidate> {
        if was_bad {
            return None;
        }

        let result = classify(new);
        if !result.is_bad {
            return None;
        }

        Some(AlertCandidate {
            key: new.key(),
            namespace: new.namespace.clone(),
            pod_name: new.name.clone(),
            reason: result.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerObservation;

    fn healthy() -> PodObservation {
        PodObservation {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            phase: Some("Running".to_string()),
            container_statuses: vec![ContainerObservation::default()],
        }
    }

    fn crashing() -> PodObservation {
        PodObservation {
            container_statuses: vec![ContainerObservation {
                waiting_reason: Some("CrashLoopBackOff".to_string()),
                terminated_reason: None,
            }],
            ..healthy()
        }
    }

    #[test]
    fn test_created_bad_pod_is_candidate() {
        let detector = EdgeDetector::new();
        let candidate = detector.on_created(&crashing()).unwrap();

        assert_eq!(candidate.key.as_str(), "default/web-0");
        assert_eq!(candidate.reason, "CrashLoopBackOff");
        assert_eq!(
            candidate.to_request(),
            AlertRequest {
                namespace: "default".to_string(),
                pod_name: "web-0".to_string(),
                reason: "CrashLoopBackOff".to_string(),
            }
        );
    }

    #[test]
    fn test_created_healthy_pod_is_ignored() {
        assert!(EdgeDetector::new().on_created(&healthy()).is_none());
    }

    #[test]
    fn test_rising_edge_fires_once() {
        let detector = EdgeDetector::new();

        assert!(detector.on_updated(&healthy(), &crashing()).is_some());
        for _ in 0..5 {
            assert!(detector.on_updated(&crashing(), &crashing()).is_none());
        }
    }

    #[test]
    fn test_recovery_then_new_failure_fires_again() {
        let detector = EdgeDetector::new();

        assert!(detector.on_updated(&healthy(), &crashing()).is_some());
        assert!(detector.on_updated(&crashing(), &healthy()).is_none());
        assert!(detector.on_updated(&healthy(), &crashing()).is_some());
    }

    #[test]
    fn test_deleted_never_fires() {
        assert!(EdgeDetector::new().on_deleted(&crashing()).is_none());
    }

    #[test]
    fn test_reason_taken_from_new_observation() {
        let failed = PodObservation {
            phase: Some("Failed".to_string()),
            container_statuses: vec![],
            ..healthy()
        };

        let candidate = EdgeDetector::new()
            .on_updated(&healthy(), &failed)
            .unwrap();
        assert_eq!(candidate.reason, "PodFailed");
    }
}
