//! Handler worker pool
//!
//! Events are sharded by pod key so that one pod's events are handled in
//! order while different pods are handled concurrently. Each event runs in
//! its own task so an error or panic stays contained to that event.

use super::{PodEvent, PodEventHandler};
use crate::models::PodKey;
use crate::observability::MonitorMetrics;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default number of handler workers
pub const DEFAULT_HANDLER_WORKERS: usize = 4;

/// Default per-worker queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Fixed set of workers delivering pod events to a handler
pub struct HandlerPool {
    senders: Vec<mpsc::Sender<PodEvent>>,
    workers: Vec<JoinHandle<()>>,
}

impl HandlerPool {
    /// Spawn `workers` tasks. Workers stop between events once `shutdown` fires.
    pub fn spawn<H: PodEventHandler>(
        handler: Arc<H>,
        workers: usize,
        queue_capacity: usize,
        shutdown: &broadcast::Sender<()>,
        metrics: MonitorMetrics,
    ) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                id,
                handler.clone(),
                rx,
                shutdown.subscribe(),
                metrics.clone(),
            )));
        }

        Self {
            senders,
            workers: handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Queue an event for its pod's worker. Returns false if the worker has stopped.
    pub async fn submit(&self, event: PodEvent) -> bool {
        let shard = self.shard(&event.key());
        self.senders[shard].send(event).await.is_ok()
    }

    /// Close the queues and wait for all workers to exit
    pub async fn join(self) {
        let HandlerPool { senders, workers } = self;
        drop(senders);

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Handler worker terminated abnormally");
            }
        }
    }

    fn shard(&self, key: &PodKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }
}

async fn worker_loop<H: PodEventHandler>(
    id: usize,
    handler: Arc<H>,
    mut rx: mpsc::Receiver<PodEvent>,
    mut shutdown: broadcast::Receiver<()>,
    metrics: MonitorMetrics,
) {
    debug!(worker = id, "Handler worker started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!(worker = id, "Handler worker stopping on shutdown");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => handle_event(handler.clone(), event, &metrics).await,
                None => {
                    debug!(worker = id, "Handler queue closed");
                    break;
                }
            }
        }
    }
}

async fn handle_event<H: PodEventHandler>(handler: Arc<H>, event: PodEvent, metrics: &MonitorMetrics) {
    let key = event.key();
    let kind = event.kind();

    let task = tokio::spawn(async move {
        match event {
            PodEvent::Created(obs) => handler.on_created(obs).await,
            PodEvent::Updated { old, new } => handler.on_updated(old, new).await,
            PodEvent::Deleted(obs) => handler.on_deleted(obs).await,
        }
    });

    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            metrics.inc_handler_failures();
            warn!(pod = %key, kind = kind, error = %e, "Pod event handler failed");
        }
        Err(e) => {
            metrics.inc_handler_failures();
            error!(pod = %key, kind = kind, error = %e, "Pod event handler panicked");
        }
    }
}
