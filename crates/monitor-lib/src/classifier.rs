//! Bad-state classification for pod observations
//!
//! Rules are evaluated in order and the first match wins:
//! 1. Pod phase `Failed`
//! 2. A container waiting with `CrashLoopBackOff`, `ImagePullBackOff` or `ErrImagePull`
//! 3. A container terminated with reason `Error`

use crate::models::{ClassificationResult, PodObservation};

/// Reason reported when the pod phase is `Failed`
pub const REASON_POD_FAILED: &str = "PodFailed";

/// Reason reported when a container terminated with `Error`
pub const REASON_TERMINATED_ERROR: &str = "Terminated(Error)";

/// Waiting reasons that mark a container as stuck
pub const BAD_WAITING_REASONS: &[&str] = &["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull"];

const PHASE_FAILED: &str = "Failed";
const TERMINATED_ERROR: &str = "Error";

/// Classify a pod observation. Missing status fields count as healthy.
pub fn classify(obs: &PodObservation) -> ClassificationResult {
    if obs.phase.as_deref() == Some(PHASE_FAILED) {
        return ClassificationResult::bad(REASON_POD_FAILED);
    }

    for container in &obs.container_statuses {
        if let Some(reason) = container.waiting_reason.as_deref() {
            if BAD_WAITING_REASONS.contains(&reason) {
                return ClassificationResult::bad(reason);
            }
        }
        if container.terminated_reason.as_deref() == Some(TERMINATED_ERROR) {
            return ClassificationResult::bad(REASON_TERMINATED_ERROR);
        }
    }

    ClassificationResult::ok()
}
