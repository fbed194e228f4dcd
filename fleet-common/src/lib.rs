use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod errors;

pub use errors::{ErrorList, FleetError, FleetResult};

/// Metadata key carrying the fleet name on every instance we create.
/// An instance belongs to a fleet iff `metadata[MEMBERSHIP_KEY] == fleet name`.
pub const MEMBERSHIP_KEY: &str = "fleeting-cluster";

// --- Enums ---

/// Lifecycle state reported to the host autoscaler.
///
/// Derived on every reconciliation pass, never stored.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AbstractState {
    Creating, // Still provisioning or booting
    Running,  // Booted and ready for work
    Deleting, // Gone, or on its way out
    Timeout,  // Unrecoverable, caller should replace it
}

impl AbstractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbstractState::Creating => "creating",
            AbstractState::Running => "running",
            AbstractState::Deleting => "deleting",
            AbstractState::Timeout => "timeout",
        }
    }
}

impl fmt::Display for AbstractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First-boot configuration method of the instance image.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootMechanism {
    #[default]
    #[serde(rename = "cloud-init")]
    CloudInit,
    #[serde(rename = "ignition")]
    Ignition,
}

impl BootMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootMechanism::CloudInit => "cloud-init",
            BootMechanism::Ignition => "ignition",
        }
    }
}

impl fmt::Display for BootMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootMechanism {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud-init" | "cloudinit" => Ok(BootMechanism::CloudInit),
            "ignition" => Ok(BootMechanism::Ignition),
            other => Err(FleetError::Config(format!(
                "unknown boot mechanism '{}' (expected cloud-init or ignition)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Winrm,
}

// --- Host-facing descriptors ---

/// Returned once by `InstanceGroup::init`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: String,
    pub max_size: usize,
    pub version: String,
    pub build_info: String,
}

/// How the host should reach an instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub id: String,
    pub internal_addr: String,
    pub external_addr: String,
    pub protocol: Protocol,
    pub os: String,
    pub arch: String,
    pub username: Option<String>,
    /// OpenSSH private key, set when the fleet generated its own login key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
