//! Alert delivery to the external analysis service
//!
//! Delivery is best-effort: every failure is logged and reported as an
//! outcome, never retried and never propagated to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, error};

use crate::models::AlertRequest;

/// Default analysis endpoint
pub const DEFAULT_ANALYSIS_ENDPOINT: &str = "http://localhost:8000/summarize-pod";

/// Default request timeout
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while delivering an alert
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("failed to serialize alert request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request to analysis endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analysis endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Endpoint answered 200
    Delivered { status: u16 },
    /// Endpoint answered with any other status
    Rejected { status: u16 },
    /// Request could not be built or sent
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Rejected { .. } => "rejected",
            DispatchOutcome::Failed => "failed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Sink for alert requests
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver one alert. Implementations must not panic or retry.
    async fn dispatch(&self, request: &AlertRequest) -> DispatchOutcome;
}

/// Posts alert requests as JSON to the analysis endpoint
pub struct HttpDispatcher {
    client: Client,
    endpoint: String,
}

impl HttpDispatcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DispatchError::Client)?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Send one request, returning the status on HTTP 200
    pub async fn send(&self, request: &AlertRequest) -> Result<u16, DispatchError> {
        let body = serde_json::to_vec(request)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(status.as_u16())
    }
}

#[async_trait]
impl AlertDispatcher for HttpDispatcher {
    async fn dispatch(&self, request: &AlertRequest) -> DispatchOutcome {
        debug!(
            namespace = %request.namespace,
            pod_name = %request.pod_name,
            reason = %request.reason,
            endpoint = %self.endpoint,
            "Triggering analysis"
        );

        match self.send(request).await {
            Ok(status) => DispatchOutcome::Delivered { status },
            Err(DispatchError::Rejected { status, body }) => {
                error!(
                    namespace = %request.namespace,
                    pod_name = %request.pod_name,
                    status = status,
                    body = %body,
                    "Analysis endpoint returned non-200 status"
                );
                DispatchOutcome::Rejected { status }
            }
            Err(e) => {
                error!(
                    namespace = %request.namespace,
                    pod_name = %request.pod_name,
                    error = %e,
                    "Failed to send alert to analysis endpoint"
                );
                DispatchOutcome::Failed
            }
        }
    }
}
