use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook dispatch failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Contract to the webhook delivery collaborator. Subscription storage,
/// signing and retries live on the other side of this boundary; the engine
/// invokes `dispatch` exactly once per completed verification.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        workspace_id: i64,
        event: &str,
        payload: Value,
    ) -> Result<(), WebhookError>;
}

/// Forwards events to the internal dispatcher service over HTTP.
pub struct HttpWebhookForwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpWebhookForwarder {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookForwarder {
    async fn dispatch(
        &self,
        workspace_id: i64,
        event: &str,
        payload: Value,
    ) -> Result<(), WebhookError> {
        self.client
            .post(&self.endpoint)
            .json(&json!({
                "workspace_id": workspace_id,
                "event": event,
                "payload": payload,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Used when no dispatcher endpoint is configured: events are visible in the
/// operational logs and nothing else happens.
pub struct NullWebhookDispatcher;

#[async_trait]
impl WebhookDispatcher for NullWebhookDispatcher {
    async fn dispatch(
        &self,
        workspace_id: i64,
        event: &str,
        payload: Value,
    ) -> Result<(), WebhookError> {
        debug!(workspace_id, event, %payload, "webhook event dropped (no dispatcher configured)");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) struct CapturingDispatcher {
    pub events: std::sync::Mutex<Vec<(i64, String, Value)>>,
}

#[cfg(test)]
impl CapturingDispatcher {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl WebhookDispatcher for CapturingDispatcher {
    async fn dispatch(
        &self,
        workspace_id: i64,
        event: &str,
        payload: Value,
    ) -> Result<(), WebhookError> {
        self.events
            .lock()
            .unwrap()
            .push((workspace_id, event.to_string(), payload));
        Ok(())
    }
}
