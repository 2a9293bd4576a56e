//! HTTP transport for the remote client.
//!
//! Requires the `http` feature. Uses reqwest.
//!
//! - `GET` / `DELETE` send `parameters` (a JSON object) as the query string.
//! - `POST` / `PUT` / `PATCH` send `parameters` as a JSON body.
//! - Non-2xx statuses map to [`RemoteFailure::Status`]; an empty 2xx body is `null`.
//!
//! ## Example
//!
//! ```ignore
//! use data_access::{HttpRemoteClient, RemoteConfig, StaticToken};
//!
//! let client = HttpRemoteClient::new(&RemoteConfig::new("https://api.example.com"))?
//!     .with_token_provider(StaticToken::new("secret"));
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteClient, RemoteFailure, TokenProvider};
use crate::config::RemoteConfig;
use crate::request::{Method, RemoteOperation};

/// [`RemoteClient`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteFailure> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RemoteFailure::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens: None,
        })
    }

    pub fn with_token_provider(mut self, tokens: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build(&self, operation: &RemoteOperation) -> Result<reqwest::RequestBuilder, RemoteFailure> {
        let url = self.url(&operation.path);
        let mut builder = match operation.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };

        if let Some(parameters) = &operation.parameters {
            if operation.method.uses_query_string() {
                builder = builder.query(&query_pairs(parameters)?);
            } else {
                builder = builder.json(parameters);
            }
        }

        if let Some(token) = self.tokens.as_ref().and_then(|t| t.token()) {
            builder = builder.bearer_auth(token);
        }

        Ok(builder)
    }
}

/// Flatten a JSON object into query-string pairs.
fn query_pairs(parameters: &Value) -> Result<Vec<(String, String)>, RemoteFailure> {
    let Value::Object(map) = parameters else {
        return Err(RemoteFailure::Payload(
            "query parameters must be a JSON object".into(),
        ));
    };
    Ok(map
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect())
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn execute(&self, operation: &RemoteOperation) -> Result<Value, RemoteFailure> {
        let response = self
            .build(operation)?
            .send()
            .await
            .map_err(|e| RemoteFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%operation, status = status.as_u16(), "remote call rejected");
            return Err(RemoteFailure::from_status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteFailure::Network(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| RemoteFailure::Payload(e.to_string()))
    }
}
