use crate::instance_group::InstanceGroup;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use fleet_common::{AbstractState, FleetError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Parses `FLEET_UPDATE_INTERVAL`. Unset or blank means the default.
pub fn update_interval(raw: Option<&str>) -> anyhow::Result<Duration> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_UPDATE_INTERVAL);
    };
    let interval = humantime::parse_duration(raw)
        .with_context(|| format!("invalid update interval '{}'", raw))?;
    if interval.is_zero() {
        anyhow::bail!("update interval must be greater than zero");
    }
    Ok(interval)
}

/// Outcome of the last reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub updated_at: Option<DateTime<Utc>>,
    pub instances: BTreeMap<String, AbstractState>,
    pub error: Option<String>,
}

pub struct AdminState {
    group: InstanceGroup,
    status: RwLock<StatusSnapshot>,
}

impl AdminState {
    pub fn new(group: InstanceGroup) -> Self {
        Self {
            group,
            status: RwLock::new(StatusSnapshot::default()),
        }
    }

    pub fn group(&self) -> &InstanceGroup {
        &self.group
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    /// Runs one pass and records it. A listing failure keeps the previous instances.
    pub async fn refresh(&self) {
        let (states, result) = self.group.states().await;
        let mut status = self.status.write().await;
        status.updated_at = Some(Utc::now());
        status.error = result.as_ref().err().map(|e| e.to_string());

        match result {
            Err(FleetError::List(e)) => {
                warn!(error = %e, "reconciliation aborted, server listing failed");
            }
            other => {
                if let Err(e) = other {
                    warn!(error = %e, "reconciliation finished with errors");
                }
                status.instances = states.into_iter().collect();
                debug!(instances = status.instances.len(), "reconciliation finished");
            }
        }
    }

    pub async fn shutdown(self) {
        self.group.shutdown().await;
    }
}

/// Refreshes the snapshot every `period` until `shutdown` flips.
pub async fn run_update_loop(
    state: Arc<AdminState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("update loop shutting down");
                break;
            }
            _ = ticker.tick() => state.refresh().await,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IncreaseRequest {
    pub delta: usize,
}

#[derive(Debug, Deserialize)]
pub struct DecreaseRequest {
    pub instances: Vec<String>,
}

fn batch_status(failed: bool, succeeded: usize) -> StatusCode {
    match (failed, succeeded) {
        (false, _) => StatusCode::OK,
        (true, 0) => StatusCode::BAD_GATEWAY,
        (true, _) => StatusCode::MULTI_STATUS,
    }
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/admin/status", get(get_status))
        .route("/admin/increase", post(increase))
        .route("/admin/decrease", post(decrease))
        .with_state(state)
}

async fn root() -> &'static str {
    "Fleet Orchestrator Online"
}

async fn get_status(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = state.status().await;
    Json(json!({
        "fleet": state.group().settings().name,
        "updated_at": status.updated_at,
        "instances": status.instances,
        "error": status.error,
    }))
}

async fn increase(
    State(state): State<Arc<AdminState>>,
    Json(req): Json<IncreaseRequest>,
) -> impl IntoResponse {
    info!(delta = req.delta, "admin increase requested");
    let (succeeded, result) = state.group().increase(req.delta).await;
    let error = result.err().map(|e| e.to_string());
    (
        batch_status(error.is_some(), succeeded),
        Json(json!({
            "requested": req.delta,
            "succeeded": succeeded,
            "error": error,
        })),
    )
}

async fn decrease(
    State(state): State<Arc<AdminState>>,
    Json(req): Json<DecreaseRequest>,
) -> impl IntoResponse {
    info!(instances = ?req.instances, "admin decrease requested");
    let (succeeded, result) = state.group().decrease(&req.instances).await;
    let error = result.err().map(|e| e.to_string());
    (
        batch_status(error.is_some(), succeeded.len()),
        Json(json!({
            "requested": req.instances,
            "succeeded": succeeded,
            "error": error,
        })),
    )
}
