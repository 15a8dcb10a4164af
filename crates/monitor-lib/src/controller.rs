//! Pod controller
//!
//! Receives pod lifecycle events, runs edge detection, consults the
//! suppression cache and hands allowed alerts to the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::detector::{AlertCandidate, EdgeDetector};
use crate::dispatcher::{AlertDispatcher, DispatchOutcome};
use crate::health::{components, HealthRegistry};
use crate::models::PodObservation;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::suppression::{Clock, Decision, SuppressionCache, SystemClock};
use crate::watcher::PodEventHandler;

/// What happened to an alert candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Suppressed,
    Dispatched(DispatchOutcome),
}

/// Event handler wiring detection, suppression and dispatch together
pub struct PodController {
    detector: EdgeDetector,
    cache: Arc<SuppressionCache>,
    dispatcher: Arc<dyn AlertDispatcher>,
    clock: Arc<dyn Clock>,
    window: Duration,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl PodController {
    pub fn new(
        cache: Arc<SuppressionCache>,
        dispatcher: Arc<dyn AlertDispatcher>,
        window: Duration,
        health: HealthRegistry,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            detector: EdgeDetector::new(),
            cache,
            dispatcher,
            clock: Arc::new(SystemClock),
            window,
            health,
            metrics,
            logger,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Gate a candidate through the suppression cache and dispatch it if allowed.
    /// The suppression record stays in place whatever the delivery outcome.
    pub async fn handle_candidate(&self, candidate: AlertCandidate) -> CandidateOutcome {
        let key = candidate.key.as_str();
        self.metrics.inc_alert_candidate(&candidate.reason);
        self.logger.log_candidate(key, &candidate.reason);

        let now = self.clock.now();
        let previous = self.cache.last_alert_at(&candidate.key);
        let decision = self.cache.check_and_mark(&candidate.key, now, self.window);
        self.metrics
            .set_suppression_cache_entries(self.cache.len() as i64);

        if decision == Decision::Suppressed {
            self.metrics.inc_alerts_suppressed();
            self.logger.log_suppressed(
                key,
                &candidate.reason,
                previous.map(|last| now.saturating_duration_since(last)),
                self.window,
            );
            return CandidateOutcome::Suppressed;
        }

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(&candidate.to_request()).await;
        self.metrics
            .observe_dispatch_latency(started.elapsed().as_secs_f64());
        self.metrics.inc_dispatch(outcome.as_str());

        match outcome {
            DispatchOutcome::Delivered { status } => {
                self.logger.log_dispatched(key, &candidate.reason, status);
                self.health.set_healthy(components::DISPATCHER).await;
            }
            DispatchOutcome::Rejected { status } => {
                let message = format!("analysis endpoint returned {}", status);
                self.logger
                    .log_dispatch_failed(key, &candidate.reason, &message);
                self.health
                    .set_degraded(components::DISPATCHER, message)
                    .await;
            }
            DispatchOutcome::Failed => {
                let message = "analysis endpoint unreachable".to_string();
                self.logger
                    .log_dispatch_failed(key, &candidate.reason, &message);
                self.health
                    .set_degraded(components::DISPATCHER, message)
                    .await;
            }
        }

        CandidateOutcome::Dispatched(outcome)
    }
}

#[async_trait]
impl PodEventHandler for PodController {
    async fn on_created(&self, obs: PodObservation) -> Result<()> {
        if let Some(candidate) = self.detector.on_created(&obs) {
            self.handle_candidate(candidate).await;
        }
        Ok(())
    }

    async fn on_updated(&self, old: PodObservation, new: PodObservation) -> Result<()> {
        if let Some(candidate) = self.detector.on_updated(&old, &new) {
            self.handle_candidate(candidate).await;
        }
        Ok(())
    }

    async fn on_deleted(&self, obs: PodObservation) -> Result<()> {
        if let Some(candidate) = self.detector.on_deleted(&obs) {
            self.handle_candidate(candidate).await;
        }
        Ok(())
    }
}
