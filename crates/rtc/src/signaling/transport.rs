//! Gateway transport seam.
//!
//! The gateway client speaks through [`SignalingTransport`] so tests
//! can script responses; [`HttpSignalingTransport`] is the production
//! implementation (POST for messages, GET long-poll for events).

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use airwave_core::{Error, Result};

/// Raw request/poll surface of a Janus-style gateway.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// POST `body` to the gateway. `path` is `""` for the gateway
    /// root, `"/{session}"`, or `"/{session}/{handle}"`.
    async fn send(&self, path: &str, body: Value) -> Result<Value>;

    /// Long-poll the session endpoint for one asynchronous event.
    async fn poll(&self, session_id: u64) -> Result<Value>;
}

/// HTTP transport carrying the room credential on every request.
pub struct HttpSignalingTransport {
    client: reqwest::Client,
    base_url: String,
    credential: String,
}

impl HttpSignalingTransport {
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            credential: credential.into(),
        }
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn send(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        trace!(%url, "gateway send");
        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.credential)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::signaling(
                format!("gateway{path}"),
                format!("status {status}"),
            ));
        }
        Ok(response.json().await?)
    }

    async fn poll(&self, session_id: u64) -> Result<Value> {
        let url = format!("{}/{}?maxev=1", self.base_url, session_id);
        trace!(%url, "gateway poll");
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.credential)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::signaling(
                "gateway poll",
                format!("status {status}"),
            ));
        }
        Ok(response.json().await?)
    }
}
