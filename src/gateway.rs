//! ==============================================================================
//! gateway.rs - http ingestion of remotely reported measurements
//! ==============================================================================
//!
//! purpose:
//!     network-attached sensors classify their own readings and push the
//!     result here. the gateway validates the report and hands it to the same
//!     store the local workers use. there is no debounce and no dedup on this
//!     path: every accepted report becomes a new record.
//!
//! route:
//!     PUT /v1/{sensorId}/measure
//!         body:  {"sensorName": "Tank A", "sensorStatus": "empty|ok|stuck"}
//!         200    {"status": "success"}
//!         400    {"status": "invalid request", "messages": [...]}
//!         400    {"error": "Invalid JSON format"}
//!         500    {"status": "error", "error": "failed to store measurement"}
//!
//! relationships:
//!     - uses: store.rs (MeasurementStore)
//!     - used by: lifecycle.rs (serves the router)
//!
//! ==============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::put,
    Router,
};
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use crate::domain::{Measurement, Status};
use crate::error::{StoreError, ValidationError};
use crate::store::MeasurementStore;

/// Handle injected into every request handler.
#[derive(Clone)]
pub struct IngestState {
    store: Arc<dyn MeasurementStore>,
}

impl IngestState {
    pub fn new(store: Arc<dyn MeasurementStore>) -> Self {
        Self { store }
    }
}

pub fn router(state: IngestState) -> Router {
    Router::new()
        .route("/v1/:sensor_id/measure", put(measure_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// everything that can go wrong with one report
#[derive(Debug, thiserror::Error)]
enum IngestError {
    #[error("body is not a JSON object")]
    InvalidFormat,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to store measurement: {0}")]
    Store(String),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::InvalidFormat => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON format" })),
            )
                .into_response(),
            IngestError::Invalid(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "invalid request", "messages": e.messages })),
            )
                .into_response(),
            IngestError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": "failed to store measurement" })),
            )
                .into_response(),
        }
    }
}

async fn measure_handler(
    State(state): State<IngestState>,
    Path(sensor_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, IngestError> {
    let payload = parse_json_object(&headers, &body).ok_or(IngestError::InvalidFormat)?;
    let (sensor_name, status) = validate_report(&payload)?;

    let measurement = Measurement::now(sensor_id.clone(), sensor_name, status);
    let store = state.store.clone();
    let stored = tokio::task::spawn_blocking(move || store.append(&measurement))
        .await
        .map_err(|e| IngestError::Store(format!("store task failed: {}", e)))?;

    match stored {
        Ok(key) => {
            tracing::info!(sensor_id = %sensor_id, status = %status, record = %key.name, "Accepted remote measurement");
            Ok(Json(json!({ "status": "success" })))
        }
        Err(StoreError::InvalidSensorId(id)) => Err(IngestError::Invalid(ValidationError {
            messages: vec![format!("Invalid sensor id '{}'", id)],
        })),
        Err(e) => {
            tracing::error!(sensor_id = %sensor_id, operation = "append", error = %e, "Failed to store remote measurement");
            Err(IngestError::Store(e.to_string()))
        }
    }
}

/// the body must be declared as JSON and decode to an object
fn parse_json_object(headers: &HeaderMap, body: &[u8]) -> Option<Map<String, Value>> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false);
    if !is_json {
        return None;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// check both fields and report every violation at once
pub fn validate_report(payload: &Map<String, Value>) -> Result<(String, Status), ValidationError> {
    let mut messages = Vec::new();

    let name = match payload.get("sensorName") {
        None | Some(Value::Null) => {
            messages.push("Missing 'sensorName' attribute".to_string());
            None
        }
        Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
        Some(_) => {
            messages.push("'sensorName' must be a non-empty string".to_string());
            None
        }
    };

    let status = match payload.get("sensorStatus") {
        None | Some(Value::Null) => {
            messages.push("Missing 'sensorStatus' attribute".to_string());
            None
        }
        Some(value) => {
            let parsed = value.as_str().and_then(|s| s.parse::<Status>().ok());
            if parsed.is_none() {
                let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                messages.push(format!(
                    "Provided 'sensorStatus' is {} and must be one of 'empty', 'ok' or 'stuck'",
                    shown
                ));
            }
            parsed
        }
    };

    match (name, status) {
        (Some(name), Some(status)) => Ok((name, status)),
        _ => Err(ValidationError { messages }),
    }
}
