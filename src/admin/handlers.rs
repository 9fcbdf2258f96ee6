use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::breakpoint::Breakpoint;
use crate::capture::ExternalRecord;
use crate::http::server::AppState;
use crate::routing::RouteRule;

type Rejection = (StatusCode, Json<Value>);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: usize,
    pub viewers: usize,
    pub in_flight: usize,
    pub held: Vec<u64>,
    pub relay_ports: Vec<u16>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        routes: state.routes.snapshot().len(),
        viewers: state.bus.viewer_count(),
        in_flight: state.correlator.in_flight(),
        held: state.gate.pending().iter().map(|m| m.sequence_number).collect(),
        relay_ports: state.relays.ports(),
    })
}

pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteRule>> {
    Json(state.routes.snapshot().to_vec())
}

/// Full-set replace, same as a viewer's `proxyConfig` event.
pub async fn put_routes(
    State(state): State<AppState>,
    Json(rules): Json<Vec<RouteRule>>,
) -> Result<Json<Vec<RouteRule>>, Rejection> {
    state.replace_routes(rules.clone()).map_err(|errors| {
        let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
        (StatusCode::BAD_REQUEST, Json(json!({ "errors": errors })))
    })?;
    Ok(Json(rules))
}

pub async fn get_breakpoints(State(state): State<AppState>) -> Json<Vec<Breakpoint>> {
    Json(state.breakpoints.list())
}

pub async fn put_breakpoints(
    State(state): State<AppState>,
    Json(breakpoints): Json<Vec<Breakpoint>>,
) -> Result<Json<Vec<Breakpoint>>, Rejection> {
    state
        .replace_breakpoints(breakpoints)
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum Ingest {
    One(Box<ExternalRecord>),
    Many(Vec<ExternalRecord>),
}

/// Accept records from external protocol decoders.
pub async fn post_ingest(State(state): State<AppState>, Json(ingest): Json<Ingest>) -> Json<Value> {
    let records = match ingest {
        Ingest::One(record) => vec![*record],
        Ingest::Many(records) => records,
    };

    let mut sequence_numbers = Vec::with_capacity(records.len());
    for record in records {
        let message = state.correlator.record(record);
        sequence_numbers.push(message.sequence_number);
        state.bus.publish(&message);
    }
    tracing::debug!(count = sequence_numbers.len(), "External records ingested");

    Json(json!({ "sequenceNumbers": sequence_numbers }))
}
