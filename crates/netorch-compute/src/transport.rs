//! ---
//! netorch_section: "02-compute-backends"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Compute node handles and REST transports."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde_json::{Map, Value};
use strum::Display;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// HTTP verbs used against the compute REST API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

/// Failures surfaced by a [`ComputeTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The compute could not be reached (connection refused, DNS, TLS handshake...).
    #[error("compute unreachable: {0}")]
    Connect(String),
    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The compute rejected the request with a 4xx status.
    #[error("compute rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the compute.
        message: String,
    },
    /// The compute failed with a 5xx or otherwise unexpected status.
    #[error("compute error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the compute.
        message: String,
    },
    /// The response body was not a JSON object.
    #[error("undecodable compute response: {0}")]
    Decode(String),
    /// The compute address does not form a valid URL.
    #[error("invalid compute url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Transport-level failures that a caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }

    /// True when the compute answered `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Rejected { status: 404, .. })
    }
}

/// Structured response returned by the compute: a status and a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body; empty when the compute sent no content.
    pub body: Map<String, Value>,
}

impl ComputeResponse {
    /// Build a response from an already-decoded body.
    pub fn new(status: u16, body: Map<String, Value>) -> Self {
        Self { status, body }
    }

    /// A `204 No Content` style response.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Map::new(),
        }
    }

    /// Decode a raw body. Empty bodies become an empty object; anything other than a
    /// JSON object is a [`TransportError::Decode`].
    pub fn from_body(status: u16, raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::empty(status));
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(body)) => Ok(Self { status, body }),
            Ok(other) => Err(TransportError::Decode(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(err) => Err(TransportError::Decode(err.to_string())),
        }
    }

    /// Access the body as a JSON object.
    pub fn json(&self) -> &Map<String, Value> {
        &self.body
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Transport abstraction used by every [`crate::ComputeHandle`].
#[async_trait]
pub trait ComputeTransport: Send + Sync + 'static {
    /// Issue a request against `path` (relative to the compute API root).
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<ComputeResponse>;

    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_body_decodes_to_empty_object() {
        let response = ComputeResponse::from_body(204, "  ").expect("empty body");
        assert_eq!(response.status, 204);
        assert!(response.json().is_empty());
    }

    #[test]
    fn object_body_keeps_key_order() {
        let response =
            ComputeResponse::from_body(201, r#"{"name": "r1", "console": 5000, "ram": 256}"#)
                .expect("object body");
        let keys: Vec<&str> = response.json().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "console", "ram"]);
        assert_eq!(response.json()["console"], json!(5000));
    }

    #[test]
    fn non_object_body_is_a_decode_error() {
        let err = ComputeResponse::from_body(200, "[1, 2]").expect_err("array body");
        assert!(matches!(err, TransportError::Decode(ref msg) if msg.contains("an array")));
        assert!(ComputeResponse::from_body(200, "{not json").is_err());
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::Timeout("30s".into()).is_retryable());
        let rejected = TransportError::Rejected {
            status: 409,
            message: "conflict".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(!TransportError::Decode("bad".into()).is_retryable());
    }

    #[test]
    fn not_found_detection() {
        let missing = TransportError::Rejected {
            status: 404,
            message: "no such vm".into(),
        };
        assert!(missing.is_not_found());
        let server = TransportError::Server {
            status: 404,
            message: String::new(),
        };
        assert!(!server.is_not_found());
    }

    #[test]
    fn methods_render_uppercase() {
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }
}
