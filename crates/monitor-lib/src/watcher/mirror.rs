//! Local pod mirror
//!
//! Consumes the typed watch stream, keeps the last observation per pod and
//! synthesizes lifecycle events from it. Nothing is delivered to handlers
//! until the initial list has been received.

use super::{HandlerPool, PodEvent, WatchError};
use crate::health::{components, HealthRegistry};
use crate::models::{PodKey, PodObservation};
use crate::observability::{MonitorMetrics, StructuredLogger};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Event;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Default full resync period (10 minutes)
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Default deadline for the initial list
pub const DEFAULT_INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Configuration for the pod mirror
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Interval between full resyncs; zero disables resync
    pub resync_period: Duration,
    /// Maximum time to wait for the initial list
    pub initial_sync_timeout: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            resync_period: DEFAULT_RESYNC_PERIOD,
            initial_sync_timeout: DEFAULT_INITIAL_SYNC_TIMEOUT,
        }
    }
}

/// Eventually-consistent local view of pods
pub struct PodMirror {
    pods: HashMap<PodKey, PodObservation>,
    config: MirrorConfig,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl PodMirror {
    pub fn new(
        config: MirrorConfig,
        health: HealthRegistry,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            pods: HashMap::new(),
            config,
            health,
            metrics,
            logger,
        }
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn get(&self, key: &PodKey) -> Option<&PodObservation> {
        self.pods.get(key)
    }

    /// Apply one watch event and return the lifecycle events it implies
    pub fn apply(&mut self, event: Event<Pod>) -> Vec<PodEvent> {
        let events = match event {
            Event::Applied(pod) => {
                let new = PodObservation::from(&pod);
                match self.pods.insert(new.key(), new.clone()) {
                    Some(old) => vec![PodEvent::Updated { old, new }],
                    None => vec![PodEvent::Created(new)],
                }
            }
            Event::Deleted(pod) => {
                let obs = PodObservation::from(&pod);
                self.pods.remove(&obs.key());
                vec![PodEvent::Deleted(obs)]
            }
            Event::Restarted(pods) => self.replace(pods),
        };

        self.metrics.set_pods_mirrored(self.pods.len() as i64);
        events
    }

    /// Re-deliver every mirrored pod unchanged
    pub fn resync_events(&self) -> Vec<PodEvent> {
        self.pods
            .values()
            .map(|obs| PodEvent::Updated {
                old: obs.clone(),
                new: obs.clone(),
            })
            .collect()
    }

    /// Run until shutdown. Fails if the initial sync does not complete or the
    /// stream ends. Stream errors after the initial sync are logged only.
    pub async fn run<S, E>(
        self,
        stream: S,
        pool: HandlerPool,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), WatchError>
    where
        S: Stream<Item = Result<Event<Pod>, E>> + Send,
        E: Display + Send,
    {
        let result = self.watch(stream, &pool, shutdown).await;
        pool.join().await;
        result
    }

    async fn watch<S, E>(
        mut self,
        stream: S,
        pool: &HandlerPool,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), WatchError>
    where
        S: Stream<Item = Result<Event<Pod>, E>> + Send,
        E: Display + Send,
    {
        tokio::pin!(stream);

        info!(
            timeout_secs = self.config.initial_sync_timeout.as_secs(),
            "Waiting for initial pod sync"
        );
        let started = Instant::now();
        let sync_timeout = self.config.initial_sync_timeout;

        let initial = tokio::select! {
            res = tokio::time::timeout(sync_timeout, Self::initial_list(&mut stream)) => match res {
                Ok(list) => list?,
                Err(_) => return Err(WatchError::SyncTimeout(sync_timeout)),
            },
            _ = shutdown.recv() => {
                info!("Shutdown requested before initial pod sync");
                return Ok(());
            }
        };

        let events = self.apply(Event::Restarted(initial));
        self.logger.log_initial_sync(self.pods.len(), started.elapsed());
        self.health.set_healthy(components::WATCHER).await;
        self.health.mark_synced(self.pods.len()).await;
        self.deliver(pool, events).await;

        let mut resync = Self::resync_timer(self.config.resync_period);
        let mut degraded = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down pod watch");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if degraded {
                            self.health.set_healthy(components::WATCHER).await;
                            degraded = false;
                        }
                        let events = self.apply(event);
                        self.deliver(pool, events).await;
                    }
                    Some(Err(e)) => {
                        let message = e.to_string();
                        self.metrics.inc_watch_errors();
                        self.logger.log_watch_error(&message);
                        self.health.set_degraded(components::WATCHER, message).await;
                        degraded = true;
                    }
                    None => {
                        self.health
                            .set_unhealthy(components::WATCHER, "Pod watch stream ended")
                            .await;
                        return Err(WatchError::StreamEnded);
                    }
                },
                _ = Self::next_resync(&mut resync) => {
                    debug!(pods = self.pods.len(), "Resyncing pod mirror");
                    let events = self.resync_events();
                    self.deliver(pool, events).await;
                }
            }
        }
    }

    async fn initial_list<S, E>(stream: &mut S) -> Result<Vec<Pod>, WatchError>
    where
        S: Stream<Item = Result<Event<Pod>, E>> + Unpin,
        E: Display,
    {
        loop {
            match stream.next().await {
                Some(Ok(Event::Restarted(pods))) => return Ok(pods),
                Some(Ok(_)) => {
                    // Superseded by the initial list.
                    debug!("Ignoring pod event received before initial list");
                }
                Some(Err(e)) => return Err(WatchError::InitialSync(e.to_string())),
                None => return Err(WatchError::StreamEnded),
            }
        }
    }

    fn replace(&mut self, pods: Vec<Pod>) -> Vec<PodEvent> {
        let mut events = Vec::with_capacity(pods.len());
        let mut seen = HashSet::with_capacity(pods.len());

        for pod in &pods {
            let new = PodObservation::from(pod);
            let key = new.key();
            seen.insert(key.clone());
            match self.pods.insert(key, new.clone()) {
                Some(old) => events.push(PodEvent::Updated { old, new }),
                None => events.push(PodEvent::Created(new)),
            }
        }

        let gone: Vec<PodKey> = self
            .pods
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(obs) = self.pods.remove(&key) {
                events.push(PodEvent::Deleted(obs));
            }
        }

        events
    }

    async fn deliver(&self, pool: &HandlerPool, events: Vec<PodEvent>) {
        for event in events {
            self.metrics.inc_pod_event(event.kind());
            let key = event.key();
            if !pool.submit(event).await {
                debug!(pod = %key, "Handler worker stopped, dropping pod event");
            }
        }
    }

    fn resync_timer(period: Duration) -> Option<Interval> {
        if period.is_zero() {
            None
        } else {
            Some(interval_at(Instant::now() + period, period))
        }
    }

    async fn next_resync(timer: &mut Option<Interval>) {
        match timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::PodEventHandler;
    use anyhow::Result;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tokio_test::{assert_err, assert_ok};

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn crashing(name: &str) -> Pod {
        let mut pod = pod(name, "Running");
        if let Some(status) = pod.status.as_mut() {
            status.container_statuses = Some(vec![ContainerStatus {
                name: "app".to_string(),
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("CrashLoopBackOff".to_string()),
                        message: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        pod
    }

    fn mirror(config: MirrorConfig) -> PodMirror {
        PodMirror::new(
            config,
            HealthRegistry::new(),
            MonitorMetrics::new(),
            StructuredLogger::new("test-node"),
        )
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PodEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<PodEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PodEventHandler for Recorder {
        async fn on_created(&self, obs: PodObservation) -> Result<()> {
            self.events.lock().unwrap().push(PodEvent::Created(obs));
            Ok(())
        }

        async fn on_updated(&self, old: PodObservation, new: PodObservation) -> Result<()> {
            self.events.lock().unwrap().push(PodEvent::Updated { old, new });
            Ok(())
        }

        async fn on_deleted(&self, obs: PodObservation) -> Result<()> {
            self.events.lock().unwrap().push(PodEvent::Deleted(obs));
            Ok(())
        }
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.events().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for pod events");
    }

    #[test]
    fn test_applied_creates_then_updates() {
        let mut mirror = mirror(MirrorConfig::default());

        let events = mirror.apply(Event::Applied(pod("web-0", "Pending")));
        assert!(matches!(events.as_slice(), [PodEvent::Created(obs)] if obs.name == "web-0"));

        let events = mirror.apply(Event::Applied(pod("web-0", "Running")));
        match events.as_slice() {
            [PodEvent::Updated { old, new }] => {
                assert_eq!(old.phase.as_deref(), Some("Pending"));
                assert_eq!(new.phase.as_deref(), Some("Running"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_deleted_removes_pod() {
        let mut mirror = mirror(MirrorConfig::default());
        mirror.apply(Event::Applied(pod("web-0", "Running")));

        let events = mirror.apply(Event::Deleted(pod("web-0", "Running")));
        assert!(matches!(events.as_slice(), [PodEvent::Deleted(_)]));
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_restart_diffs_against_mirror() {
        let mut mirror = mirror(MirrorConfig::default());
        mirror.apply(Event::Applied(pod("kept", "Running")));
        mirror.apply(Event::Applied(pod("gone", "Running")));

        let events = mirror.apply(Event::Restarted(vec![
            pod("kept", "Running"),
            crashing("new"),
        ]));

        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|e| matches!(e, PodEvent::Updated { new, .. } if new.name == "kept")));
        assert!(events
            .iter()
            .any(|e| matches!(e, PodEvent::Created(obs) if obs.name == "new")));
        assert!(events
            .iter()
            .any(|e| matches!(e, PodEvent::Deleted(obs) if obs.name == "gone")));
        assert!(mirror.get(&PodKey::new("default", "gone")).is_none());
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn test_resync_redelivers_unchanged_state() {
        let mut mirror = mirror(MirrorConfig::default());
        mirror.apply(Event::Applied(crashing("web-0")));

        let events = mirror.resync_events();
        match events.as_slice() {
            [PodEvent::Updated { old, new }] => assert_eq!(old, new),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initial_list_delivered_as_created() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let recorder = Arc::new(Recorder::default());
        let pool = HandlerPool::spawn(recorder.clone(), 2, 16, &shutdown_tx, MonitorMetrics::new());
        let health = HealthRegistry::new();

        let stream = tokio_stream::iter(vec![
            Ok::<_, io::Error>(Event::Restarted(vec![crashing("bad"), pod("good", "Running")])),
            Ok(Event::Applied(pod("good", "Failed"))),
        ])
        .chain(tokio_stream::pending());

        let mirror = PodMirror::new(
            MirrorConfig::default(),
            health.clone(),
            MonitorMetrics::new(),
            StructuredLogger::new("test-node"),
        );
        let handle = tokio::spawn(mirror.run(stream, pool, shutdown_tx.subscribe()));

        wait_for(&recorder, 3).await;
        let readiness = health.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.initial_sync.map(|s| s.pods), Some(2));

        shutdown_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        let events = recorder.events();
        let created: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PodEvent::Created(obs) => Some(obs.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 2);
        assert!(created.contains(&"bad") && created.contains(&"good"));
        assert!(events
            .iter()
            .any(|e| matches!(e, PodEvent::Updated { new, .. } if new.phase.as_deref() == Some("Failed"))));
    }

    #[tokio::test]
    async fn test_initial_sync_timeout_is_fatal() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let recorder = Arc::new(Recorder::default());
        let pool = HandlerPool::spawn(recorder.clone(), 1, 4, &shutdown_tx, MonitorMetrics::new());

        let mirror = mirror(MirrorConfig {
            resync_period: DEFAULT_RESYNC_PERIOD,
            initial_sync_timeout: Duration::from_millis(50),
        });
        let stream = tokio_stream::pending::<Result<Event<Pod>, io::Error>>();

        let err = assert_err!(mirror.run(stream, pool, shutdown_tx.subscribe()).await);
        assert!(matches!(err, WatchError::SyncTimeout(_)));
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_error_before_sync_is_fatal() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = HandlerPool::spawn(
            Arc::new(Recorder::default()),
            1,
            4,
            &shutdown_tx,
            MonitorMetrics::new(),
        );

        let stream = tokio_stream::iter(vec![Err::<Event<Pod>, _>(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "pods is forbidden",
        ))]);

        let err = assert_err!(
            mirror(MirrorConfig::default())
                .run(stream, pool, shutdown_tx.subscribe())
                .await
        );
        assert!(matches!(err, WatchError::InitialSync(msg) if msg.contains("forbidden")));
    }

    #[tokio::test]
    async fn test_stream_end_after_sync_is_fatal() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = HandlerPool::spawn(
            Arc::new(Recorder::default()),
            1,
            4,
            &shutdown_tx,
            MonitorMetrics::new(),
        );

        let stream = tokio_stream::iter(vec![Ok::<_, io::Error>(Event::Restarted(vec![]))]);

        let err = assert_err!(
            mirror(MirrorConfig::default())
                .run(stream, pool, shutdown_tx.subscribe())
                .await
        );
        assert!(matches!(err, WatchError::StreamEnded));
    }

    #[tokio::test]
    async fn test_errors_after_sync_degrade_watcher() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let recorder = Arc::new(Recorder::default());
        let pool = HandlerPool::spawn(recorder.clone(), 1, 4, &shutdown_tx, MonitorMetrics::new());
        let health = HealthRegistry::new();

        let stream = tokio_stream::iter(vec![
            Ok(Event::Restarted(vec![])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "watch reset")),
            Ok(Event::Applied(pod("after-error", "Running"))),
        ])
        .chain(tokio_stream::pending());

        let mirror = PodMirror::new(
            MirrorConfig::default(),
            health.clone(),
            MonitorMetrics::new(),
            StructuredLogger::new("test-node"),
        );
        let handle = tokio::spawn(mirror.run(stream, pool, shutdown_tx.subscribe()));

        wait_for(&recorder, 1).await;
        shutdown_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        let watcher = health.component(components::WATCHER).await.unwrap();
        assert_eq!(watcher.consecutive_failures, 0);
        assert!(matches!(
            recorder.events().as_slice(),
            [PodEvent::Created(obs)] if obs.name == "after-error"
        ));
    }

    #[tokio::test]
    async fn test_periodic_resync() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let recorder = Arc::new(Recorder::default());
        let pool = HandlerPool::spawn(recorder.clone(), 1, 16, &shutdown_tx, MonitorMetrics::new());

        let stream = tokio_stream::iter(vec![Ok::<_, io::Error>(Event::Restarted(vec![pod(
            "web-0", "Running",
        )]))])
        .chain(tokio_stream::pending());

        let mirror = mirror(MirrorConfig {
            resync_period: Duration::from_millis(20),
            initial_sync_timeout: DEFAULT_INITIAL_SYNC_TIMEOUT,
        });
        let handle = tokio::spawn(mirror.run(stream, pool, shutdown_tx.subscribe()));

        wait_for(&recorder, 3).await;
        shutdown_tx.send(()).unwrap();
        assert_ok!(handle.await.unwrap());

        let events = recorder.events();
        assert!(matches!(events[0], PodEvent::Created(_)));
        assert!(events[1..]
            .iter()
            .all(|e| matches!(e, PodEvent::Updated { old, new } if old == new)));
    }
}
