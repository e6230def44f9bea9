//! ---
//! netorch_section: "02-compute-backends"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Compute node handles and REST transports."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use netorch_common::config::ComputeConfig;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::handle::Credentials;
use crate::transport::{ComputeResponse, ComputeTransport, HttpMethod, Result, TransportError};

/// reqwest-backed transport talking to a compute's REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    /// Build a transport for the configured compute.
    pub fn new(
        config: &ComputeConfig,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = format!(
            "{}://{}:{}{}",
            config.protocol,
            config.host,
            config.port,
            config.api_prefix.trim_end_matches('/')
        );
        Url::parse(&base_url)
            .map_err(|err| TransportError::InvalidUrl(format!("{}: {}", base_url, err)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Connect(format!("failed to build http client: {}", err)))?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Absolute URL for an API path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ComputeTransport for HttpTransport {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<ComputeResponse> {
        let url = self.url_for(path);
        let mut request = self.client.request(reqwest_method(method), &url);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, creds.password.as_ref());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify_send_error)?;
        classify_response(status, &text)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn classify_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        warn!(error = %err, "compute request failed outside the transport layer");
        TransportError::Server {
            status: err.status().map(|status| status.as_u16()).unwrap_or(0),
            message: err.to_string(),
        }
    }
}

/// Map an HTTP status and raw body onto a response or a classified error.
pub(crate) fn classify_response(status: u16, raw: &str) -> Result<ComputeResponse> {
    match status {
        200..=299 => ComputeResponse::from_body(status, raw),
        400..=499 => Err(TransportError::Rejected {
            status,
            message: error_message(raw),
        }),
        _ => Err(TransportError::Server {
            status,
            message: error_message(raw),
        }),
    }
}

// Compute errors are JSON objects carrying a `message`; fall back to the raw text.
fn error_message(raw: &str) -> String {
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = body.get("message") {
            return message.clone();
        }
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "empty response".to_owned()
    } else {
        trimmed.to_owned()
    }
}
