use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::broker::BrokerInstance;
use crate::error::BrokerError;
use crate::gps::{GpsStore, DEFAULT_HISTORY_LIMIT};

/// State shared by one broker instance's routes.
#[derive(Clone)]
pub struct InstanceState {
    pub broker: Arc<BrokerInstance>,
    pub metrics: Option<PrometheusHandle>,
}

/// State shared by one GPS listener's routes.
#[derive(Clone)]
pub struct GpsState {
    pub store: Arc<GpsStore>,
    pub port: u16,
    pub label: &'static str,
}

pub async fn list_streams(State(state): State<InstanceState>) -> impl IntoResponse {
    Json(state.broker.list_sessions())
}

pub async fn get_stream(
    State(state): State<InstanceState>,
    Path(stream_id): Path<String>,
) -> Response {
    match state.broker.get_session(&stream_id) {
        Ok(summary) => Json(summary).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Stream not found" })),
        )
            .into_response(),
    }
}

pub async fn instance_health(State(state): State<InstanceState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "instance": state.broker.name(),
        "timestamp": Utc::now(),
    }))
}

pub async fn debug_stats(State(state): State<InstanceState>) -> impl IntoResponse {
    Json(state.broker.stats())
}

pub async fn render_metrics(State(state): State<InstanceState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

pub async fn submit_gps(State(state): State<GpsState>, Json(report): Json<Value>) -> Response {
    match state.store.record(report) {
        Ok(_) => Json(json!({
            "success": true,
            "message": "GPS data received successfully",
            "timestamp": Utc::now(),
        }))
        .into_response(),
        Err(BrokerError::MalformedRequest(message)) => {
            warn!(error = %message, "rejected gps report");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Failed to process GPS data",
                "message": err.to_string(),
            })),
        )
            .into_response(),
    }
}

pub async fn gps_health(State(state): State<GpsState>) -> impl IntoResponse {
    Json(json!({
        "status": format!("{} Running", state.label),
        "port": state.port,
        "timestamp": Utc::now(),
    }))
}

pub async fn latest_gps(State(state): State<GpsState>) -> Response {
    match state.store.latest() {
        Some(sample) => Json(json!({ "success": true, "data": sample })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "No GPS data available",
                "message": "No GPS data has been received yet",
            })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<String>,
}

impl HistoryQuery {
    /// Anything that is not a positive integer falls back to the default.
    fn limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

pub async fn gps_history(
    State(state): State<GpsState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let history = state.store.history(query.limit());
    Json(json!({
        "success": true,
        "count": history.len(),
        "data": history,
    }))
}

pub async fn gps_status(State(state): State<GpsState>) -> impl IntoResponse {
    let latest = state.store.latest();
    Json(json!({
        "success": true,
        "status": format!("{} Running", state.label),
        "port": state.port,
        "hasData": latest.is_some(),
        "lastUpdate": latest.map(|sample| sample.timestamp),
        "historyCount": state.store.len(),
        "timestamp": Utc::now(),
    }))
}
