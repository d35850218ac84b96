//! HTTP surface: routes, handlers and error rendering.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::warn;

use crate::capability::{CapabilityError, CapabilityParams, CapabilityRegistry};
use crate::error::GateError;
use crate::gate::{AdmissionGate, Usage};
use crate::middleware::{AdmissionLayer, GatePolicy};

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub gate: Arc<AdmissionGate>,
    pub capabilities: Arc<CapabilityRegistry>,
}

impl AppState {
    pub fn new(gate: AdmissionGate, capabilities: CapabilityRegistry) -> Self {
        Self { gate: Arc::new(gate), capabilities: Arc::new(capabilities) }
    }
}

/// Build the gateway router.
///
/// `GET /{capability}` is metered through the [`AdmissionLayer`] unless `policy` opens it;
/// `GET /usage` (also `/uso`) validates the key itself and is never metered.
pub fn router(state: AppState, policy: GatePolicy) -> Router {
    let admission = AdmissionLayer::new(state.gate.clone(), policy);

    let metered = Router::new()
        .route("/", get(index))
        .route("/{capability}", get(invoke_capability))
        .layer(admission);

    Router::new()
        .route("/usage", get(usage))
        .route("/uso", get(usage))
        .merge(metered)
        .with_state(state)
}

/// JSON error payload: machine-readable kind plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (status, Json(ErrorBody { error: kind.to_owned(), message })).into_response()
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match &self {
            GateError::MissingKey | GateError::InvalidKey => StatusCode::UNAUTHORIZED,
            GateError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::HandlerFailure(_) => StatusCode::BAD_GATEWAY,
        };
        error_response(status, self.kind(), self.to_string())
    }
}

/// Failures of a capability route.
#[derive(Debug)]
pub enum ApiError {
    UnknownCapability(String),
    Capability(CapabilityError),
}

impl From<CapabilityError> for ApiError {
    fn from(err: CapabilityError) -> Self {
        Self::Capability(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownCapability(name) => error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("no capability named `{name}`"),
            ),
            Self::Capability(err) => {
                let (status, kind) = match &err {
                    CapabilityError::MissingParam(_) | CapabilityError::InvalidParam { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_input")
                    }
                    CapabilityError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    _ => (StatusCode::BAD_GATEWAY, "handler_failure"),
                };
                error_response(status, kind, err.to_string())
            }
        }
    }
}

async fn index(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "status": true,
        "service": env!("CARGO_PKG_NAME"),
        "capabilities": state.capabilities.names(),
    }))
}

#[derive(Debug, Deserialize)]
struct KeyParam {
    key: Option<String>,
}

async fn usage(
    State(state): State<AppState>,
    Query(params): Query<KeyParam>,
) -> Result<Json<Usage>, GateError> {
    state.gate.usage(params.key.as_deref()).await.map(Json)
}

async fn invoke_capability(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(mut params): Query<CapabilityParams>,
) -> Result<Json<JsonValue>, ApiError> {
    params.remove("key");
    let capability =
        state.capabilities.get(&name).ok_or_else(|| ApiError::UnknownCapability(name.clone()))?;

    match capability.invoke(&params).await {
        Ok(payload) => Ok(Json(with_status(payload))),
        Err(err) => {
            if !err.is_client_error() {
                warn!(capability = %name, error = %err, "capability failed");
            }
            Err(err.into())
        }
    }
}

/// Wrap a payload as `{"status": true, ...}`; non-object payloads go under `data`.
fn with_status(payload: JsonValue) -> JsonValue {
    match payload {
        JsonValue::Object(mut map) => {
            map.insert("status".into(), JsonValue::Bool(true));
            JsonValue::Object(map)
        }
        other => json!({ "status": true, "data": other }),
    }
}
