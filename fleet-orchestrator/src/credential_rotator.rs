use crate::client_handle::ClientHandle;
use fleet_common::{FleetError, FleetResult};
use fleet_providers::Authenticator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default credential lifetime on Keystone is one hour.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Running rotation loop. Must be shut down explicitly.
pub struct RotatorTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RotatorTask {
    /// Signals the loop and waits for it to exit.
    ///
    /// A rotation already in progress completes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "credential rotator task failed");
        }
    }
}

/// Re-authenticates once and swaps the handle on success.
///
/// The handshake runs without touching the handle; only the swap takes the lock.
pub async fn rotate_once(authenticator: &dyn Authenticator, client: &ClientHandle) -> FleetResult<()> {
    let fresh = authenticator.authenticate().await.map_err(FleetError::Auth)?;
    client.replace(fresh);
    Ok(())
}

/// Starts rotating every `period`, first tick one period from now.
pub fn spawn(
    authenticator: Arc<dyn Authenticator>,
    client: ClientHandle,
    period: Duration,
) -> RotatorTask {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(run(authenticator, client, period, shutdown_rx));
    RotatorTask {
        shutdown_tx,
        handle,
    }
}

async fn run(
    authenticator: Arc<dyn Authenticator>,
    client: ClientHandle,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(period = %humantime::format_duration(period), "credential rotator starting");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("credential rotator shutting down");
                break;
            }
            _ = ticker.tick() => {
                match rotate_once(authenticator.as_ref(), &client).await {
                    Ok(()) => info!("cloud credentials rotated"),
                    Err(e) => warn!(error = %e, "credential rotation failed, keeping previous client"),
                }
            }
        }
    }
}
