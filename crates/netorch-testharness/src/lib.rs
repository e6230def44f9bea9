//! ---
//! netorch_section: "08-testing"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Scriptable compute transport and fixtures for orchestrator tests."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! A [`ComputeTransport`] double that records every call and answers from a script.
//!
//! Unscripted calls get the echo behaviour of a well-behaved compute: `POST`/`PUT`
//! return their body, action endpoints and `DELETE` return an empty body, and
//! `GET /version` reports a version.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netorch_common::config::ComputeProtocol;
use netorch_compute::{
    ComputeAddress, ComputeDirectory, ComputeHandle, ComputeResponse, ComputeTransport,
    HttpMethod, Result, TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::trace;

/// Canned answer for a scripted call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `200` with the given JSON object.
    Json(Value),
    /// Bare status; 4xx and 5xx become the matching transport errors.
    Status(u16),
    /// Connection refused.
    ConnectError,
    /// Request timed out.
    Timeout,
    /// Default echo behaviour.
    Echo,
    /// Wait, then answer.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    /// Delay `self` by `delay`.
    pub fn after(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug)]
struct Rule {
    method: HttpMethod,
    fragment: String,
    reply: Reply,
    remaining: Option<usize>,
}

/// One request observed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// HTTP verb.
    pub method: HttpMethod,
    /// Path relative to the API root.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

/// Scriptable, call-recording compute transport.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    /// Transport that echoes every call.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay applied to every call before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Answer every matching call with `reply`. Later rules take precedence.
    pub fn on(&self, method: HttpMethod, fragment: &str, reply: Reply) {
        self.push_rule(method, fragment, reply, None);
    }

    /// Answer the next matching call with `reply`, then fall through.
    pub fn once(&self, method: HttpMethod, fragment: &str, reply: Reply) {
        self.push_rule(method, fragment, reply, Some(1));
    }

    fn push_rule(&self, method: HttpMethod, fragment: &str, reply: Reply, remaining: Option<usize>) {
        self.rules.lock().push(Rule {
            method,
            fragment: fragment.to_owned(),
            reply,
            remaining,
        });
    }

    /// Every call seen so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of calls seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls with `method` whose path contains `fragment`.
    pub fn count_matching(&self, method: HttpMethod, fragment: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method && call.path.contains(fragment))
            .count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Forget recorded calls; the script is kept.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn scripted(&self, method: HttpMethod, path: &str) -> Reply {
        let mut rules = self.rules.lock();
        let position = rules.iter().rposition(|rule| {
            rule.method == method
                && path.contains(&rule.fragment)
                && rule.remaining.map_or(true, |left| left > 0)
        });
        match position {
            Some(index) => {
                let rule = &mut rules[index];
                if let Some(left) = rule.remaining.as_mut() {
                    *left -= 1;
                }
                rule.reply.clone()
            }
            None => Reply::Echo,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComputeTransport for RecordingTransport {
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<ComputeResponse> {
        self.calls.lock().push(RecordedCall {
            method,
            path: path.to_owned(),
            body: body.clone(),
        });
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut reply = self.scripted(method, path);
        trace!(%method, path, ?reply, "scripted compute reply");
        loop {
            match reply {
                Reply::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                }
                other => return answer(other, method, path, body),
            }
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn answer(reply: Reply, method: HttpMethod, path: &str, body: Option<Value>) -> Result<ComputeResponse> {
    match reply {
        Reply::Json(value) => match value {
            Value::Object(map) => Ok(ComputeResponse::new(200, map)),
            other => Err(TransportError::Decode(format!("scripted non-object body: {other}"))),
        },
        Reply::Status(status @ 400..=499) => Err(TransportError::Rejected {
            status,
            message: format!("scripted rejection of {method} {path}"),
        }),
        Reply::Status(status @ 500..=599) => Err(TransportError::Server {
            status,
            message: format!("scripted failure of {method} {path}"),
        }),
        Reply::Status(status) => Ok(ComputeResponse::empty(status)),
        Reply::ConnectError => Err(TransportError::Connect(format!("scripted refusal of {path}"))),
        Reply::Timeout => Err(TransportError::Timeout(format!("scripted timeout of {path}"))),
        Reply::Echo | Reply::Delayed(..) => Ok(echo(method, path, body)),
    }
}

fn echo(method: HttpMethod, path: &str, body: Option<Value>) -> ComputeResponse {
    match (method, body) {
        (HttpMethod::Get, _) if path == "/version" => {
            ComputeResponse::new(200, object(json!({"version": "2.2.0", "local": false})))
        }
        (HttpMethod::Post, Some(body)) => ComputeResponse::new(201, object(body)),
        (HttpMethod::Put, Some(body)) => ComputeResponse::new(200, object(body)),
        _ => ComputeResponse::empty(204),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Handle named `id` at `host` backed by `transport`.
pub fn compute_handle(id: &str, host: &str, transport: Arc<RecordingTransport>) -> ComputeHandle {
    let address = ComputeAddress {
        protocol: ComputeProtocol::Http,
        host: host.to_owned(),
        port: 3080,
    };
    ComputeHandle::new(id, address, None, transport)
}

/// Directory with one recording-backed compute per `(id, host, transport)`.
pub fn directory<'a, I>(computes: I) -> ComputeDirectory
where
    I: IntoIterator<Item = (&'a str, &'a str, Arc<RecordingTransport>)>,
{
    let mut directory = ComputeDirectory::new();
    for (id, host, transport) in computes {
        directory.insert(compute_handle(id, host, transport));
    }
    directory
}
