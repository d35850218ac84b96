//! Tower middleware that puts the [`AdmissionGate`] in front of HTTP capability routes.
//!
//! For every request whose path is not on the open allow-list the layer:
//! 1. reads the `key` query parameter and runs [`AdmissionGate::admit`];
//! 2. forwards the request, bounded by the gate's handler timeout, with the key attached as an
//!    [`AdmittedKey`] extension;
//! 3. commits usage iff the inner response is 2xx.
//!
//! If the client goes away mid-request the future is dropped together with its admission, so
//! nothing is charged.

use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderValue, Request, Uri};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, error, warn};

use crate::error::GateError;
use crate::gate::{redact, AdmissionGate};

/// Response header carrying the key's limit after a charged request.
pub const QUOTA_LIMIT_HEADER: &str = "x-quota-limit";
/// Response header carrying the key's remaining requests after a charged request.
pub const QUOTA_REMAINING_HEADER: &str = "x-quota-remaining";

/// Which paths bypass the gate.
///
/// Entries match a path exactly, or as a prefix when they end in `*`. Everything else is gated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatePolicy {
    open: Vec<String>,
}

impl GatePolicy {
    pub fn new<I, S>(open: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { open: open.into_iter().map(Into::into).collect() }
    }

    /// Gate every path.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == entry,
        })
    }

    pub fn open_paths(&self) -> &[String] {
        &self.open
    }
}

/// Key of an admitted request, available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedKey(pub String);

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Extract the `key` query parameter. A malformed query string counts as no key.
pub fn key_from_uri(uri: &Uri) -> Option<String> {
    Query::<KeyQuery>::try_from_uri(uri).ok().and_then(|Query(q)| q.key)
}

/// A layer that meters requests through an [`AdmissionGate`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    gate: Arc<AdmissionGate>,
    policy: Arc<GatePolicy>,
}

impl AdmissionLayer {
    pub fn new(gate: Arc<AdmissionGate>, policy: GatePolicy) -> Self {
        Self { gate, policy: Arc::new(policy) }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService { inner, gate: self.gate.clone(), policy: self.policy.clone() }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    gate: Arc<AdmissionGate>,
    policy: Arc<GatePolicy>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if self.policy.is_open(req.uri().path()) {
            return Box::pin(self.inner.call(req));
        }

        // Keep the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = self.gate.clone();

        Box::pin(async move {
            let key = key_from_uri(req.uri());
            let admission = match gate.admit(key.as_deref()).await {
                Ok(admission) => admission,
                Err(err) => return Ok(err.into_response()),
            };
            let path = req.uri().path().to_owned();
            req.extensions_mut().insert(AdmittedKey(admission.key().to_owned()));

            let mut response = match gate.handler_timeout().execute(inner.call(req)).await {
                Ok(Ok(response)) => response,
                Ok(Err(never)) => match never {},
                Err(elapsed) => {
                    warn!(
                        key = %redact(admission.key()),
                        path = %path,
                        error = %elapsed,
                        "handler timed out"
                    );
                    return Ok(GateError::HandlerFailure(elapsed.to_string()).into_response());
                }
            };

            if !response.status().is_success() {
                debug!(
                    key = %redact(admission.key()),
                    path = %path,
                    status = response.status().as_u16(),
                    "handler did not succeed; usage not charged"
                );
                return Ok(response);
            }

            let key = admission.key().to_owned();
            match gate.commit(admission).await {
                Ok(record) => {
                    let headers = response.headers_mut();
                    headers.insert(QUOTA_LIMIT_HEADER, HeaderValue::from(record.limit));
                    headers.insert(QUOTA_REMAINING_HEADER, HeaderValue::from(record.remaining()));
                    Ok(response)
                }
                Err(err) => {
                    error!(key = %redact(&key), path = %path, error = %err, "usage commit failed");
                    Ok(err.into_response())
                }
            }
        })
    }
}
