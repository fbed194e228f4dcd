//! Fleet reconciliation for an autoscaler host.
//!
//! [`instance_group::InstanceGroup`] is the entry point: it wires the
//! [`reconciliation::FleetReconciler`], the [`instance_factory::InstanceFactory`]
//! and the [`credential_rotator`] around one shared [`client_handle::ClientHandle`].

pub mod admin;
pub mod boot_log;
pub mod client_handle;
pub mod credential_rotator;
pub mod ignition;
pub mod instance_factory;
pub mod instance_group;
pub mod login_key;
pub mod provider_manager;
pub mod reconciliation;
pub mod settings;
pub mod version;

pub use client_handle::ClientHandle;
pub use instance_group::InstanceGroup;
pub use settings::FleetSettings;
