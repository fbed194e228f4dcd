use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod server_spec;

pub use server_spec::{Network, SchedulerHints, ServerSpec};

/// Lines at the start of the console log scanned for boot progress.
pub const CONSOLE_OUTPUT_LINES: usize = 100;

/// First `max_lines` lines of a console log.
///
/// Boot markers are printed early, so the head stays stable while the tail
/// keeps scrolling.
pub fn console_head(output: &str, max_lines: usize) -> String {
    output.lines().take(max_lines).collect::<Vec<_>>().join("\n")
}

/// Train+ compute microversion: tags, descriptions and `servers_links` paging.
pub const DEFAULT_COMPUTE_API_VERSION: &str = "2.79";

/// An authenticated handle on the remote compute API.
///
/// Implementations are cheap to share behind an `Arc`; the orchestrator never
/// mutates one in place; credential rotation swaps in a new value instead.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Every server visible to the credentials, across all pages.
    async fn list_instances(&self) -> Result<Vec<inventory::Instance>>;

    async fn get_instance(&self, server_id: &str) -> Result<inventory::Instance>;

    /// Submits a create request. The returned instance may only carry the
    /// identifier and whatever the `ServerSpec` carried.
    async fn create_instance(&self, spec: &ServerSpec) -> Result<inventory::Instance>;

    async fn delete_instance(&self, server_id: &str) -> Result<()>;

    /// The first `max_lines` lines of the server's console log.
    async fn get_console_output(&self, server_id: &str, max_lines: usize) -> Result<String>;

    // Optional: image metadata used to derive connection OS/arch and the default login user.
    // Default implementation returns None (caller falls back to linux/amd64).
    async fn get_image_properties(
        &self,
        _image_ref: &str,
    ) -> Result<Option<inventory::ImageProperties>> {
        Ok(None)
    }
}

/// Performs the full authentication handshake and yields a fresh client.
///
/// Called once at startup and then on every credential rotation tick.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Arc<dyn CloudApi>>;
}


pub mod inventory {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};

    use crate::ServerSpec;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Instance {
        pub id: String,
        pub name: String,
        /// Remote status vocabulary (`ACTIVE`, `BUILD`, `ERROR`, ...).
        pub status: String,
        pub created_at: DateTime<Utc>,
        #[serde(default)]
        pub metadata: HashMap<String, String>,
        #[serde(default)]
        pub access_ipv4: Option<String>,
        /// Network name -> addresses on that network.
        #[serde(default)]
        pub addresses: BTreeMap<String, Vec<Address>>,
    }

    impl Instance {
        /// Placeholder built from a create request before the remote side
        /// reports anything but an identifier.
        pub fn from_spec(id: String, spec: &ServerSpec) -> Self {
            Self {
                id,
                name: spec.name.clone(),
                status: "BUILD".to_string(),
                created_at: Utc::now(),
                metadata: spec.metadata.clone().into_iter().collect(),
                access_ipv4: None,
                addresses: BTreeMap::new(),
            }
        }

        pub fn metadata_value(&self, key: &str) -> Option<&str> {
            self.metadata.get(key).map(|s| s.as_str())
        }

        /// Fleet name this instance is tagged with, if any.
        pub fn fleet(&self) -> Option<&str> {
            self.metadata_value(fleet_common::MEMBERSHIP_KEY)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Address {
        #[serde(default)]
        pub version: u8,
        #[serde(rename = "addr")]
        pub address: String,
        #[serde(
            rename = "OS-EXT-IPS-MAC:mac_addr",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        pub mac_addr: Option<String>,
        #[serde(
            rename = "OS-EXT-IPS:type",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        pub kind: Option<String>,
    }

    /// Well-known image properties.
    ///
    /// See https://docs.openstack.org/glance/latest/admin/useful-image-properties.html
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ImageProperties {
        /// Architecture that must be supported by the hypervisor.
        #[serde(default)]
        pub architecture: String,
        /// Operating system installed on the image.
        #[serde(default)]
        pub os_type: String,
        #[serde(default)]
        pub os_distro: String,
        #[serde(default)]
        pub os_version: String,
        /// Default admin user name for the operating system.
        #[serde(default)]
        pub os_admin_user: String,
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "openstack")]
pub mod clouds;
#[cfg(feature = "openstack")]
pub mod openstack;
