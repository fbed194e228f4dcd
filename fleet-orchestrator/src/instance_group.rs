//! Host-facing fleet object: init, update, increase, decrease, connect info, shutdown.

use crate::client_handle::ClientHandle;
use crate::credential_rotator::{self, RotatorTask};
use crate::instance_factory::InstanceFactory;
use crate::login_key::LoginKey;
use crate::reconciliation::FleetReconciler;
use crate::settings::FleetSettings;
use crate::version;
use fleet_common::{
    AbstractState, BootMechanism, ConnectInfo, ErrorList, FleetError, FleetResult, Protocol,
    ProviderInfo,
};
use fleet_providers::inventory::{ImageProperties, Instance};
use fleet_providers::Authenticator;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct InstanceGroup {
    settings: FleetSettings,
    client: ClientHandle,
    reconciler: FleetReconciler,
    factory: InstanceFactory,
    image: Option<ImageProperties>,
    ssh_username: Option<String>,
    /// Private half of a generated login key.
    ssh_private_key: Option<String>,
    rotator: RotatorTask,
}

/// Protocol, OS and architecture advertised for the fleet's image.
pub fn platform(image: Option<&ImageProperties>) -> (Protocol, String, String) {
    let Some(image) = image else {
        return (Protocol::Ssh, "linux".to_string(), "amd64".to_string());
    };

    let (protocol, os) = match image.os_type.as_str() {
        "" | "linux" => (Protocol::Ssh, "linux".to_string()),
        "windows" => {
            warn!("windows images are not really supported");
            (Protocol::Winrm, image.os_type.clone())
        }
        other => {
            warn!(os_type = %other, "unknown image os_type");
            (Protocol::Ssh, other.to_string())
        }
    };

    let arch = match image.architecture.as_str() {
        "" | "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => {
            warn!(arch = %other, "unknown image architecture");
            other.to_string()
        }
    };

    (protocol, os, arch)
}

/// `accessIPv4` when set, else the last address over networks in name order.
pub fn connect_address(srv: &Instance) -> String {
    if let Some(ip) = srv.access_ipv4.as_deref().filter(|ip| !ip.is_empty()) {
        return ip.to_string();
    }
    let mut address = String::new();
    for (network, addrs) in &srv.addresses {
        for addr in addrs {
            debug!(server_id = %srv.id, %network, ip_address = %addr.address, "candidate address");
            address = addr.address.clone();
        }
    }
    address
}

impl InstanceGroup {
    /// Validates settings, authenticates and checks access before starting
    /// credential rotation. Any failure here is fatal.
    pub async fn init(
        settings: FleetSettings,
        authenticator: Arc<dyn Authenticator>,
    ) -> FleetResult<(Self, ProviderInfo)> {
        settings.validate()?;
        let mechanism = settings.boot_mechanism();
        let boot_window = settings.boot_window()?;
        let rotation_interval = settings.rotation_interval()?;
        info!(
            name = %settings.name,
            cloud = %settings.cloud,
            boot_mechanism = %mechanism,
            "initializing fleet"
        );

        let cloud = authenticator
            .authenticate()
            .await
            .map_err(FleetError::Auth)?;

        settings
            .server_spec
            .to_create_body()
            .map_err(|e| FleetError::Config(format!("failed to check server_spec: {:#}", e)))?;

        let image_ref = settings.server_spec.image_ref.as_str();
        let image = if image_ref.is_empty() {
            None
        } else {
            cloud
                .get_image_properties(image_ref)
                .await
                .map_err(|source| FleetError::Image {
                    image_ref: image_ref.to_string(),
                    source,
                })?
        };

        let ssh_username = settings
            .ssh_username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .or_else(|| {
                image
                    .as_ref()
                    .map(|p| p.os_admin_user.as_str())
                    .filter(|u| !u.is_empty())
            })
            .map(str::to_string);

        let client = ClientHandle::new(cloud);
        let mut factory = InstanceFactory::new(
            settings.name.clone(),
            settings.server_spec.clone(),
            client.clone(),
        );
        let mut ssh_private_key = None;
        if mechanism == BootMechanism::Ignition {
            let username = ssh_username.clone().ok_or_else(|| {
                FleetError::Config(
                    "ignition requires ssh_username or an image with os_admin_user".to_string(),
                )
            })?;
            let public_key = match settings.public_key()? {
                Some(key) => key,
                None => {
                    info!("generating dynamic SSH key");
                    let key = LoginKey::generate(&settings.name);
                    debug!(public_key = %key.public_key(), "generated login key");
                    ssh_private_key = Some(key.private_key().to_string());
                    key.public_key().to_string()
                }
            };
            factory = factory.with_ignition_key(username, public_key);
        }

        let reconciler =
            FleetReconciler::new(settings.name.clone(), mechanism, boot_window, client.clone());

        let members = client
            .snapshot()
            .list_instances()
            .await
            .map_err(FleetError::List)?
            .iter()
            .filter(|srv| srv.fleet() == Some(settings.name.as_str()))
            .count();
        debug!(members, "initial listing succeeded");

        let rotator = credential_rotator::spawn(authenticator, client.clone(), rotation_interval);

        let info = ProviderInfo {
            id: settings.provider_id(),
            max_size: settings.max_size,
            version: version::VERSION.to_string(),
            build_info: version::build_info(),
        };

        Ok((
            Self {
                settings,
                client,
                reconciler,
                factory,
                image,
                ssh_username,
                ssh_private_key,
                rotator,
            },
            info,
        ))
    }

    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    pub fn factory(&self) -> &InstanceFactory {
        &self.factory
    }

    pub fn image_properties(&self) -> Option<&ImageProperties> {
        self.image.as_ref()
    }

    pub fn ssh_username(&self) -> Option<&str> {
        self.ssh_username.as_deref()
    }

    /// Generated login key handed to the host through [`connect_info`](Self::connect_info).
    pub fn ssh_private_key(&self) -> Option<&str> {
        self.ssh_private_key.as_deref()
    }

    /// Reports the state of every fleet member through `update`.
    pub async fn update<F>(&self, update: F) -> FleetResult<()>
    where
        F: FnMut(&str, AbstractState),
    {
        self.reconciler.reconcile(update).await
    }

    /// Same pass as [`update`](Self::update), collected into a list.
    pub async fn states(&self) -> (Vec<(String, AbstractState)>, FleetResult<()>) {
        self.reconciler.reconcile_collect().await
    }

    /// Requests `delta` new instances one after the other.
    pub async fn increase(&self, delta: usize) -> (usize, FleetResult<()>) {
        let mut succeeded = 0;
        let mut errors = ErrorList::new();

        for _ in 0..delta {
            match self.factory.create().await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    error!(error = %e, "failed to create instance");
                    errors.push(e);
                }
            }
        }

        info!(delta, succeeded, "Increase");
        (succeeded, errors.into_result())
    }

    /// Requests deletion of each id, returning the ones that were accepted.
    pub async fn decrease(&self, instances: &[String]) -> (Vec<String>, FleetResult<()>) {
        if instances.is_empty() {
            return (Vec::new(), Ok(()));
        }

        let cloud = self.client.snapshot();
        let mut succeeded = Vec::with_capacity(instances.len());
        let mut errors = ErrorList::new();

        for id in instances {
            match cloud.delete_instance(id).await {
                Ok(()) => {
                    info!(server_id = %id, "instance deletion request successful");
                    succeeded.push(id.clone());
                }
                Err(source) => {
                    error!(server_id = %id, error = %source, "failed to delete instance");
                    errors.push(FleetError::Delete {
                        instance_id: id.clone(),
                        source,
                    });
                }
            }
        }

        info!(instances = ?instances, "Decrease");
        (succeeded, errors.into_result())
    }

    pub async fn connect_info(&self, instance_id: &str) -> FleetResult<ConnectInfo> {
        let srv = self
            .client
            .snapshot()
            .get_instance(instance_id)
            .await
            .map_err(|source| FleetError::Get {
                instance_id: instance_id.to_string(),
                source,
            })?;

        if srv.status != "ACTIVE" {
            return Err(FleetError::NotReady {
                instance_id: instance_id.to_string(),
                status: srv.status,
            });
        }

        let address = connect_address(&srv);
        let (protocol, os, arch) = platform(self.image.as_ref());

        Ok(ConnectInfo {
            id: instance_id.to_string(),
            internal_addr: address.clone(),
            external_addr: address,
            protocol,
            os,
            arch,
            username: self.ssh_username.clone(),
            key: self.ssh_private_key.clone(),
        })
    }

    /// Stops credential rotation.
    pub async fn shutdown(self) {
        info!(name = %self.settings.name, "shutting down fleet");
        self.rotator.shutdown().await;
    }
}
