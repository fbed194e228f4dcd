use crate::credential_rotator::DEFAULT_ROTATION_INTERVAL;
use crate::instance_factory::{placeholder_count, placeholder_width, MAX_PLACEHOLDER_WIDTH};
use fleet_common::{BootMechanism, FleetError, FleetResult};
use fleet_providers::{ServerSpec, DEFAULT_COMPUTE_API_VERSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_SIZE: usize = 1000;

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

/// Fleet configuration as handed over by the autoscaler host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Fleet name, stored in every member's metadata.
    pub name: String,
    /// Entry of clouds.yaml to authenticate with. Empty falls back to `OS_CLOUD`.
    #[serde(default)]
    pub cloud: String,
    /// Explicit clouds.yaml path.
    #[serde(default)]
    pub clouds_config: Option<String>,
    /// Read `OS_*` variables instead of clouds.yaml.
    #[serde(default)]
    pub auth_from_env: bool,
    #[serde(default)]
    pub boot_mechanism: Option<BootMechanism>,
    /// Older configs select ignition with a flag.
    #[serde(default)]
    pub use_ignition: bool,
    /// Humantime duration; empty means boot is always confirmed from the console.
    #[serde(default)]
    pub boot_time: String,
    #[serde(default)]
    pub credential_rotation_interval: String,
    #[serde(default)]
    pub nova_microversion: String,
    pub server_spec: ServerSpec,
    #[serde(default)]
    pub ssh_username: Option<String>,
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    #[serde(default)]
    pub ssh_public_key_file: Option<String>,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn parse_duration(field: &str, raw: &str) -> FleetResult<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| FleetError::Config(format!("failed to parse {} '{}': {}", field, raw, e)))
}

impl FleetSettings {
    pub fn from_json(raw: &str) -> FleetResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FleetError::Config(format!("invalid fleet settings: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> FleetResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn boot_mechanism(&self) -> BootMechanism {
        match self.boot_mechanism {
            Some(mechanism) => mechanism,
            None if self.use_ignition => BootMechanism::Ignition,
            None => BootMechanism::CloudInit,
        }
    }

    pub fn boot_window(&self) -> FleetResult<Option<Duration>> {
        if self.boot_time.trim().is_empty() {
            return Ok(None);
        }
        parse_duration("boot_time", &self.boot_time).map(Some)
    }

    pub fn rotation_interval(&self) -> FleetResult<Duration> {
        if self.credential_rotation_interval.trim().is_empty() {
            return Ok(DEFAULT_ROTATION_INTERVAL);
        }
        let interval = parse_duration(
            "credential_rotation_interval",
            &self.credential_rotation_interval,
        )?;
        if interval.is_zero() {
            return Err(FleetError::Config(
                "credential_rotation_interval must be greater than zero".to_string(),
            ));
        }
        Ok(interval)
    }

    pub fn microversion(&self) -> &str {
        match self.nova_microversion.trim() {
            "" => DEFAULT_COMPUTE_API_VERSION,
            v => v,
        }
    }

    /// Inline key first, then the key file. Trailing newlines are dropped.
    pub fn public_key(&self) -> FleetResult<Option<String>> {
        if let Some(key) = self.ssh_public_key.as_deref().map(str::trim) {
            if !key.is_empty() {
                return Ok(Some(key.to_string()));
            }
        }
        let Some(path) = self.ssh_public_key_file.as_deref() else {
            return Ok(None);
        };
        let key = fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("failed to read ssh_public_key_file {}: {}", path, e))
        })?;
        let key = key.trim();
        Ok((!key.is_empty()).then(|| key.to_string()))
    }

    /// `openstack/<cloud>/<name>`, skipping an empty cloud.
    pub fn provider_id(&self) -> String {
        ["openstack", self.cloud.trim(), self.name.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.name.trim().is_empty() {
            return Err(FleetError::Config("name is required".to_string()));
        }
        if placeholder_count(&self.server_spec.name) != 1 {
            return Err(FleetError::Config(format!(
                "server_spec.name '{}' must contain exactly one integer placeholder (e.g. %d)",
                self.server_spec.name
            )));
        }
        if placeholder_width(&self.server_spec.name) > MAX_PLACEHOLDER_WIDTH {
            return Err(FleetError::Config(format!(
                "server_spec.name '{}' pads the index wider than {} characters",
                self.server_spec.name, MAX_PLACEHOLDER_WIDTH
            )));
        }
        self.boot_window()?;
        self.rotation_interval()?;
        if self.max_size == 0 {
            return Err(FleetError::Config("max_size must be greater than zero".to_string()));
        }
        // Fails early on an unreadable key file.
        self.public_key()?;
        Ok(())
    }
}
