use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::{timeout, Instant};
use shared::protocol::{MEASUREMENTS_PATH, PROBES_PER_LOCATION};
use shared::types::{CheckType, ProbeLocation, Service};
use crate::config::ProviderConfig;

/// Status recorded when the provider could not be reached at all
pub const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// Body of one measurement request: a single location per request
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementRequest {
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub target: String,
    pub locations: Vec<Map<String, Value>>,
}

impl MeasurementRequest {
    pub fn for_location(service: &Service, location: &ProbeLocation) -> Self {
        let mut selector = Map::new();
        selector.insert(location.selector_type.clone(), Value::String(location.value.clone()));
        selector.insert("limit".to_string(), Value::from(PROBES_PER_LOCATION));

        Self {
            check_type: service.check_type,
            target: service.target.clone(),
            locations: vec![selector],
        }
    }
}

/// Provider verdict for one request that reached it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub accepted: bool,
    pub status: u16,
    pub error: Option<String>,
}

/// The external service that runs probes. `Err` means the request never got
/// a response (connection refused, DNS failure, client timeout).
#[async_trait]
pub trait MeasurementProvider: Send + Sync + 'static {
    async fn measure(&self, request: &MeasurementRequest) -> Result<ProviderReply>;
}

/// Globalping REST client
#[derive(Debug, Clone)]
pub struct GlobalpingProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GlobalpingProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.probe_timeout())
            .user_agent(format!("monitord/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", config.base_url.trim_end_matches('/'), MEASUREMENTS_PATH),
            api_key: config.api_key.clone(),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl MeasurementProvider for GlobalpingProvider {
    async fn measure(&self, request: &MeasurementRequest) -> Result<ProviderReply> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await
            .with_context(|| format!("Measurement request to {} failed", self.endpoint))?;
        let status = response.status();

        if status.is_success() {
            return Ok(ProviderReply {
                accepted: true,
                status: status.as_u16(),
                error: None,
            });
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok(ProviderReply {
            accepted: false,
            status: status.as_u16(),
            error: Some(error_message(&body)),
        })
    }
}

/// Provider error bodies carry either `{"error": {"message"}}` or `{"message"}`
fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string()
}

/// Result of probing one location. Lives for a single check cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub location: String,
    pub success: bool,
    pub status_code: u16,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Fans a check out to every configured location at once
#[derive(Clone)]
pub struct ProbeExecutor {
    provider: Arc<dyn MeasurementProvider>,
    probe_timeout: Duration,
}

impl ProbeExecutor {
    pub fn new(provider: Arc<dyn MeasurementProvider>, probe_timeout: Duration) -> Self {
        Self { provider, probe_timeout }
    }

    /// One outcome per location, in no meaningful order. Never fails: every
    /// error is folded into a failed outcome for its location.
    pub async fn probe(&self, service: &Service) -> Vec<ProbeOutcome> {
        if service.locations.is_empty() {
            return Vec::new();
        }

        let probes = service
            .locations
            .iter()
            .map(|location| self.probe_location(service, location));

        join_all(probes).await
    }

    async fn probe_location(&self, service: &Service, location: &ProbeLocation) -> ProbeOutcome {
        let request = MeasurementRequest::for_location(service, location);
        let started = Instant::now();

        let result = timeout(self.probe_timeout, self.provider.measure(&request)).await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(reply)) => ProbeOutcome {
                location: location.value.clone(),
                success: reply.accepted,
                status_code: reply.status,
                elapsed,
                error: reply.error,
            },
            Ok(Err(e)) => ProbeOutcome {
                location: location.value.clone(),
                success: false,
                status_code: TRANSPORT_FAILURE_STATUS,
                elapsed,
                error: Some(format!("{:#}", e)),
            },
            Err(_) => ProbeOutcome {
                location: location.value.clone(),
                success: false,
                status_code: TRANSPORT_FAILURE_STATUS,
                elapsed,
                error: Some(format!("Probe timed out after {:?}", self.probe_timeout)),
            },
        }
    }
}
