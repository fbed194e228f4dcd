//! clouds.yaml lookup, the default way OpenStack tooling selects credentials.

use crate::openstack::{env_var, AuthConfig};
use crate::DEFAULT_COMPUTE_API_VERSION;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: HashMap<String, CloudEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudEntry {
    #[serde(default)]
    auth: CloudAuth,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    interface: Option<String>,
    #[serde(default)]
    endpoint_type: Option<String>,
    #[serde(default)]
    compute_api_version: Option<String>,
    #[serde(default)]
    cacert: Option<PathBuf>,
    #[serde(default)]
    verify: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudAuth {
    #[serde(default)]
    auth_url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    tenant_name: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    user_domain_name: Option<String>,
    #[serde(default)]
    user_domain_id: Option<String>,
    #[serde(default)]
    project_domain_name: Option<String>,
    #[serde(default)]
    project_domain_id: Option<String>,
    #[serde(default)]
    domain_name: Option<String>,
    #[serde(default)]
    domain_id: Option<String>,
    #[serde(default)]
    application_credential_id: Option<String>,
    #[serde(default)]
    application_credential_name: Option<String>,
    #[serde(default)]
    application_credential_secret: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl CloudEntry {
    fn into_auth_config(self, cloud: &str) -> Result<AuthConfig> {
        if let Some(auth_type) = self.auth_type.as_deref() {
            if !matches!(auth_type, "password" | "v3password" | "v3applicationcredential") {
                bail!("cloud '{}': unsupported auth_type '{}'", cloud, auth_type);
            }
        }

        let auth = self.auth;
        let auth_url = non_empty(auth.auth_url)
            .ok_or_else(|| anyhow!("cloud '{}' has no auth.auth_url", cloud))?;
        // `domain_*` applies to both the user and the project when the specific keys are absent.
        let domain_name = non_empty(auth.domain_name);
        let domain_id = non_empty(auth.domain_id);

        Ok(AuthConfig {
            auth_url,
            username: non_empty(auth.username),
            user_id: non_empty(auth.user_id),
            password: non_empty(auth.password),
            project_name: non_empty(auth.project_name).or(non_empty(auth.tenant_name)),
            project_id: non_empty(auth.project_id).or(non_empty(auth.tenant_id)),
            user_domain_name: non_empty(auth.user_domain_name).or(domain_name.clone()),
            user_domain_id: non_empty(auth.user_domain_id).or(domain_id.clone()),
            project_domain_name: non_empty(auth.project_domain_name).or(domain_name),
            project_domain_id: non_empty(auth.project_domain_id).or(domain_id),
            application_credential_id: non_empty(auth.application_credential_id),
            application_credential_name: non_empty(auth.application_credential_name),
            application_credential_secret: non_empty(auth.application_credential_secret),
            region_name: non_empty(self.region_name),
            endpoint_type: non_empty(self.interface)
                .or(non_empty(self.endpoint_type))
                .unwrap_or_else(|| "public".to_string()),
            compute_api_version: non_empty(self.compute_api_version)
                .unwrap_or_else(|| DEFAULT_COMPUTE_API_VERSION.to_string()),
            ca_cert: self.cacert,
            insecure: self.verify == Some(false),
        })
    }
}

/// Credentials of `cloud` from clouds.yaml text.
pub fn parse(raw: &str, cloud: &str) -> Result<AuthConfig> {
    let mut file: CloudsFile = serde_yaml::from_str(raw).context("invalid clouds.yaml")?;
    let entry = file
        .clouds
        .remove(cloud)
        .ok_or_else(|| anyhow!("cloud '{}' not found in clouds.yaml", cloud))?;
    entry.into_auth_config(cloud)
}

/// Files searched when no explicit path is given, in order.
pub fn default_locations(home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("clouds.yaml")];
    if let Some(home) = home {
        paths.push(home.join(".config/openstack/clouds.yaml"));
    }
    paths.push(PathBuf::from("/etc/openstack/clouds.yaml"));
    paths
}

/// Loads `cloud` from the first clouds.yaml found.
///
/// `path` wins, then `OS_CLIENT_CONFIG_FILE`, then the usual locations.
/// An empty `cloud` falls back to `OS_CLOUD`. Region, interface and compute
/// version set in the environment override the file.
pub fn load(cloud: &str, path: Option<&str>) -> Result<AuthConfig> {
    let cloud = match cloud.trim() {
        "" => env_var("OS_CLOUD")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("cloud is not set and OS_CLOUD is empty"))?,
        name => name.to_string(),
    };

    let explicit = path
        .map(str::to_string)
        .or_else(|| env_var("OS_CLIENT_CONFIG_FILE"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let candidates = match explicit {
        Some(path) => vec![PathBuf::from(path)],
        None => default_locations(env_var("HOME").as_deref().map(Path::new)),
    };

    let file = candidates
        .iter()
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow!("no clouds.yaml found (searched {:?})", candidates))?;
    debug!(path = %file.display(), %cloud, "using clouds.yaml");

    let raw = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut config = parse(&raw, &cloud)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    config.apply_env_overrides(env_var);
    Ok(config)
}
