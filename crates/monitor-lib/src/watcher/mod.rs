//! Pod state mirror and event delivery
//!
//! This module turns the Kubernetes pod watch stream into `Created`,
//! `Updated` and `Deleted` events for a [`PodEventHandler`]. The mirror holds
//! the last observed state of every pod; handlers run on a small worker pool
//! that keeps events for the same pod in order.

mod mirror;
mod pool;

pub use mirror::{MirrorConfig, PodMirror, DEFAULT_INITIAL_SYNC_TIMEOUT, DEFAULT_RESYNC_PERIOD};
pub use pool::{HandlerPool, DEFAULT_HANDLER_WORKERS, DEFAULT_QUEUE_CAPACITY};

use crate::models::{PodKey, PodObservation};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

/// Pod lifecycle event delivered to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    Created(PodObservation),
    Updated {
        old: PodObservation,
        new: PodObservation,
    },
    Deleted(PodObservation),
}

impl PodEvent {
    pub fn key(&self) -> PodKey {
        match self {
            PodEvent::Created(obs) | PodEvent::Deleted(obs) => obs.key(),
            PodEvent::Updated { new, .. } => new.key(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PodEvent::Created(_) => "created",
            PodEvent::Updated { .. } => "updated",
            PodEvent::Deleted(_) => "deleted",
        }
    }
}

/// Receiver of pod lifecycle events
#[async_trait]
pub trait PodEventHandler: Send + Sync + 'static {
    async fn on_created(&self, obs: PodObservation) -> Result<()>;

    async fn on_updated(&self, old: PodObservation, new: PodObservation) -> Result<()>;

    async fn on_deleted(&self, obs: PodObservation) -> Result<()>;
}

/// Fatal watch failures
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("initial pod sync did not complete within {0:?}")]
    SyncTimeout(Duration),

    #[error("pod watch failed before initial sync: {0}")]
    InitialSync(String),

    #[error("pod watch stream ended")]
    StreamEnded,
}

/// Build the pod watch stream, optionally scoped to one namespace and a label selector
pub fn pod_watch_stream(
    client: kube::Client,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> impl Stream<Item = Result<watcher::Event<Pod>, watcher::Error>> + Send {
    let api: Api<Pod> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let mut config = watcher::Config::default();
    if let Some(selector) = label_selector {
        config = config.labels(selector);
    }

    watcher(api, config).default_backoff()
}
