use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::fmt;
use std::time::Duration;

use crate::config::Config;
use crate::utils::error::TransportError;

/// HTTP outcome of a push, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendStatus {
    pub status_code: u16,
    pub reason: String,
}

impl SendStatus {
    pub fn new(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code, self.reason)
    }
}

/// Pushes an encoded line protocol payload. One request per call, no retry.
#[async_trait]
pub trait MetricsSender: Send + Sync {
    async fn send(&self, payload: &str) -> Result<SendStatus, TransportError>;
    fn sender_type(&self) -> &str;
    fn destination(&self) -> &str;
}

/// Prints payloads instead of pushing them; used for dry runs.
pub struct ConsoleSender;

#[async_trait]
impl MetricsSender for ConsoleSender {
    async fn send(&self, payload: &str) -> Result<SendStatus, TransportError> {
        println!("{}", payload);
        Ok(SendStatus::new(204, "No Content"))
    }

    fn sender_type(&self) -> &str {
        "console"
    }

    fn destination(&self) -> &str {
        "stdout"
    }
}

/// Stands in for the HTTP sender on a node in setup mode that has no
/// credentials yet. Every push fails, so the cycle still counts it.
pub struct UnconfiguredSender;

#[async_trait]
impl MetricsSender for UnconfiguredSender {
    async fn send(&self, _payload: &str) -> Result<SendStatus, TransportError> {
        Err(TransportError::MissingCredentials)
    }

    fn sender_type(&self) -> &str {
        "unconfigured"
    }

    fn destination(&self) -> &str {
        "none"
    }
}

/// `Authorization` header value for HTTP Basic credentials.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", base64::encode(format!("{}:{}", username, password)))
}

/// Influx write endpoint behind HTTP Basic auth (e.g. Grafana Cloud).
pub struct HttpMetricsSender {
    client: reqwest::Client,
    endpoint: String,
    authorization: HeaderValue,
}

impl HttpMetricsSender {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        let mut authorization = HeaderValue::from_str(&basic_authorization(username, password))?;
        authorization.set_sensitive(true);

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        info!("📡 Metrics endpoint: {}", endpoint);
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            authorization,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let (username, password) = config
            .metrics_credentials()
            .ok_or(TransportError::MissingCredentials)?;
        Self::new(&config.metrics_instance, username, password, Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl MetricsSender for HttpMetricsSender {
    async fn send(&self, payload: &str) -> Result<SendStatus, TransportError> {
        debug!("📤 Sending {} bytes to {}:\n{}", payload.len(), self.endpoint, payload);

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(payload.to_string())
            .send()
            .await?;

        let status = response.status();
        let outcome = SendStatus::new(status.as_u16(), status.canonical_reason().unwrap_or(""));
        info!("📨 Received {}", outcome);
        Ok(outcome)
    }

    fn sender_type(&self) -> &str {
        "http"
    }

    fn destination(&self) -> &str {
        &self.endpoint
    }
}
