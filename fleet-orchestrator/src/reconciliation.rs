use crate::boot_log;
use crate::client_handle::ClientHandle;
use chrono::{DateTime, Utc};
use fleet_common::{AbstractState, BootMechanism, ErrorList, FleetError, FleetResult};
use fleet_providers::{inventory::Instance, CloudApi, CONSOLE_OUTPUT_LINES};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maps a Nova status to the host's vocabulary.
///
/// Returns `None` for `ACTIVE`, which needs boot evidence before it can be
/// reported as running. Statuses outside the table stay `Creating`.
pub fn state_for_status(status: &str) -> Option<AbstractState> {
    match status {
        "ACTIVE" => None,
        "BUILD" | "MIGRATING" | "PAUSED" | "REBUILD" => Some(AbstractState::Creating),
        "DELETED" | "SHUTOFF" | "UNKNOWN" => Some(AbstractState::Deleting),
        "ERROR" => Some(AbstractState::Timeout),
        _ => Some(AbstractState::Creating),
    }
}

/// Lists the fleet's servers and derives an abstract state for each.
pub struct FleetReconciler {
    fleet: String,
    mechanism: BootMechanism,
    /// `None` means console logs are scanned for as long as the server is ACTIVE.
    boot_window: Option<Duration>,
    client: ClientHandle,
}

impl FleetReconciler {
    pub fn new(
        fleet: impl Into<String>,
        mechanism: BootMechanism,
        boot_window: Option<Duration>,
        client: ClientHandle,
    ) -> Self {
        Self {
            fleet: fleet.into(),
            mechanism,
            boot_window,
            client,
        }
    }

    pub fn fleet(&self) -> &str {
        &self.fleet
    }

    fn boot_window_elapsed(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(window) = self.boot_window else {
            return false;
        };
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|window| created_at.checked_add_signed(window))
            .map_or(false, |deadline| deadline < now)
    }

    /// One reconciliation pass.
    ///
    /// `update` is called once per member server, in listing order. A listing
    /// failure aborts before any call. A failed console fetch skips that
    /// server only; those failures come back together as `FleetError::Multiple`.
    pub async fn reconcile<F>(&self, mut update: F) -> FleetResult<()>
    where
        F: FnMut(&str, AbstractState),
    {
        let cloud = self.client.snapshot();
        let servers = cloud.list_instances().await.map_err(FleetError::List)?;
        let now = Utc::now();
        let mut errors = ErrorList::new();

        for srv in servers
            .iter()
            .filter(|srv| srv.fleet() == Some(self.fleet.as_str()))
        {
            let state = match state_for_status(&srv.status) {
                Some(AbstractState::Timeout) => {
                    warn!(
                        server_id = %srv.id,
                        created = %srv.created_at,
                        status = %srv.status,
                        "instance is in ERROR state, marking as timeout"
                    );
                    AbstractState::Timeout
                }
                Some(state) => state,
                None => match self.active_state(cloud.as_ref(), srv, now).await {
                    Ok(state) => state,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                },
            };

            update(&srv.id, state);
        }

        errors.into_result()
    }

    /// Runs a pass and returns the reported states alongside its outcome.
    pub async fn reconcile_collect(&self) -> (Vec<(String, AbstractState)>, FleetResult<()>) {
        let mut states = Vec::new();
        let result = self
            .reconcile(|id, state| states.push((id.to_string(), state)))
            .await;
        (states, result)
    }

    async fn active_state(
        &self,
        cloud: &dyn CloudApi,
        srv: &Instance,
        now: DateTime<Utc>,
    ) -> FleetResult<AbstractState> {
        if self.boot_window_elapsed(srv.created_at, now) {
            return Ok(AbstractState::Running);
        }

        let log = cloud
            .get_console_output(&srv.id, CONSOLE_OUTPUT_LINES)
            .await
            .map_err(|source| FleetError::ConsoleFetch {
                instance_id: srv.id.clone(),
                source,
            })?;

        if boot_log::is_boot_finished(self.mechanism, &log) {
            info!(
                server_id = %srv.id,
                created = %srv.created_at,
                mechanism = %self.mechanism,
                "instance boot finished"
            );
            Ok(AbstractState::Running)
        } else {
            debug!(
                server_id = %srv.id,
                created = %srv.created_at,
                boot_time = ?self.boot_window,
                "boot window not passed and boot not finished"
            );
            Ok(AbstractState::Creating)
        }
    }
}
