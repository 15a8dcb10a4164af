//! Health check infrastructure for the pod monitor
//!
//! Tracks the watcher and dispatcher components and whether the initial
//! pod sync has completed, for Kubernetes liveness and readiness probes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is failing intermittently but the monitor keeps running
    Degraded,
    /// Component has failed
    Unhealthy,
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures recorded since the component was last healthy
    pub consecutive_failures: u64,
    /// Unix timestamp of the last status change
    pub since: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            since: chrono::Utc::now().timestamp(),
        }
    }

    fn transition(&mut self, status: ComponentStatus, message: Option<String>) {
        if self.status != status {
            self.since = chrono::Utc::now().timestamp();
        }
        self.status = status;
        self.message = message;
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_sync: Option<SyncInfo>,
}

/// Completed initial pod sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Pods in the initial list
    pub pods: usize,
    /// Unix timestamp of completion
    pub completed_at: i64,
}

/// Component names for health tracking
pub mod components {
    pub const WATCHER: &str = "watcher";
    pub const DISPATCHER: &str = "dispatcher";
}

/// Shared registry of component health and sync state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    synced: Arc<RwLock<Option<SyncInfo>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_healthy(&self, name: &str) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);
        entry.consecutive_failures = 0;
        entry.transition(ComponentStatus::Healthy, None);
    }

    /// Record a non-fatal failure
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, ComponentStatus::Degraded, message.into())
            .await;
    }

    /// Record a fatal failure
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, ComponentStatus::Unhealthy, message.into())
            .await;
    }

    /// Mark the initial pod sync as complete
    pub async fn mark_synced(&self, pods: usize) {
        *self.synced.write().await = Some(SyncInfo {
            pods,
            completed_at: chrono::Utc::now().timestamp(),
        });
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once synced, as long as no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let Some(sync) = *self.synced.read().await else {
            return ReadinessResponse {
                ready: false,
                reason: Some("Initial pod sync not complete".to_string()),
                initial_sync: None,
            };
        };

        let unhealthy = self.health().await.status == ComponentStatus::Unhealthy;
        ReadinessResponse {
            ready: !unhealthy,
            reason: unhealthy.then(|| "Critical component unhealthy".to_string()),
            initial_sync: Some(sync),
        }
    }

    async fn record_failure(&self, name: &str, status: ComponentStatus, message: String) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);
        entry.consecutive_failures += 1;
        entry.transition(status, Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_dispatcher_counts_failures() {
        let registry = HealthRegistry::new();
        registry.register(components::WATCHER).await;
        registry.register(components::DISPATCHER).await;

        registry
            .set_degraded(components::DISPATCHER, "connection refused")
            .await;
        registry
            .set_degraded(components::DISPATCHER, "connection refused")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);

        let dispatcher = registry.component(components::DISPATCHER).await.unwrap();
        assert_eq!(dispatcher.consecutive_failures, 2);
        assert_eq!(dispatcher.message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_recovery_resets_failures() {
        let registry = HealthRegistry::new();
        registry.register(components::DISPATCHER).await;
        registry.set_degraded(components::DISPATCHER, "timeout").await;
        registry.set_healthy(components::DISPATCHER).await;

        let dispatcher = registry.component(components::DISPATCHER).await.unwrap();
        assert_eq!(dispatcher.status, ComponentStatus::Healthy);
        assert_eq!(dispatcher.consecutive_failures, 0);
        assert!(dispatcher.message.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new();
        registry.set_degraded(components::DISPATCHER, "timeout").await;
        registry.set_unhealthy(components::WATCHER, "watch stream lost").await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_not_ready_before_sync() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Initial pod sync not complete")
        );
    }

    #[tokio::test]
    async fn test_ready_after_sync() {
        let registry = HealthRegistry::new();
        registry.register(components::WATCHER).await;
        registry.mark_synced(12).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
        assert_eq!(readiness.initial_sync.map(|s| s.pods), Some(12));
    }

    #[tokio::test]
    async fn test_degraded_still_ready() {
        let registry = HealthRegistry::new();
        registry.mark_synced(0).await;
        registry.set_degraded(components::DISPATCHER, "HTTP 500").await;

        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.mark_synced(0).await;
        registry.set_unhealthy(components::WATCHER, "watch stream lost").await;

        assert!(!registry.readiness().await.ready);
    }
}
