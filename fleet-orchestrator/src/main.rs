use anyhow::Context;
use fleet_orchestrator::admin::{self, AdminState};
use fleet_orchestrator::provider_manager::ProviderManager;
use fleet_orchestrator::{FleetSettings, InstanceGroup};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = env::var("FLEET_CONFIG").unwrap_or_else(|_| "fleet.json".to_string());
    let settings = FleetSettings::load(&config_path)
        .with_context(|| format!("failed to load fleet settings from {}", config_path))?;

    let provider = ProviderManager::current_provider_name();
    let authenticator = ProviderManager::get_authenticator(&provider, &settings)?;
    info!(%provider, name = %settings.name, "starting fleet orchestrator");

    let (group, provider_info) = InstanceGroup::init(settings, authenticator)
        .await
        .context("fleet initialization failed")?;
    info!(
        id = %provider_info.id,
        max_size = provider_info.max_size,
        version = %provider_info.version,
        build_info = %provider_info.build_info,
        "fleet ready"
    );

    let update_interval = admin::update_interval(env::var("FLEET_UPDATE_INTERVAL").ok().as_deref())
        .context("invalid FLEET_UPDATE_INTERVAL")?;

    let state = Arc::new(AdminState::new(group));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater = tokio::spawn(admin::run_update_loop(
        state.clone(),
        update_interval,
        shutdown_rx,
    ));

    let addr: SocketAddr = env::var("FLEET_ADMIN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8001".to_string())
        .parse()
        .context("invalid FLEET_ADMIN_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "admin API listening");

    axum::serve(listener, admin::router(state.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        })
        .await
        .context("admin server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = updater.await {
        error!(error = %e, "update loop task failed");
    }

    match Arc::try_unwrap(state) {
        Ok(state) => state.shutdown().await,
        Err(_) => warn!("fleet state still shared at exit, skipping rotator shutdown"),
    }
    Ok(())
}
