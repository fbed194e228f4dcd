use crate::settings::FleetSettings;
use anyhow::{bail, Result};
use fleet_providers::Authenticator;
use std::env;
use std::sync::Arc;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER").unwrap_or_else(|_| "openstack".to_string())
    }

    /// Authenticator for `provider_name`. OpenStack credentials come from
    /// clouds.yaml unless `auth_from_env` is set.
    pub fn get_authenticator(
        provider_name: &str,
        settings: &FleetSettings,
    ) -> Result<Arc<dyn Authenticator>> {
        let _ = settings; // only the OpenStack provider reads it
        match provider_name.trim().to_lowercase().as_str() {
            #[cfg(feature = "provider-openstack")]
            "openstack" => {
                use fleet_providers::clouds;
                use fleet_providers::openstack::{AuthConfig, OpenStackAuthenticator};

                let mut config = if settings.auth_from_env {
                    tracing::debug!("using env vars for auth");
                    AuthConfig::from_env()?
                } else {
                    tracing::debug!(cloud = %settings.cloud, "using clouds.yaml for auth");
                    clouds::load(&settings.cloud, settings.clouds_config.as_deref())?
                };
                // Fleet settings win over OS_COMPUTE_API_VERSION.
                if !settings.nova_microversion.trim().is_empty() {
                    config.compute_api_version = settings.microversion().to_string();
                }
                Ok(Arc::new(OpenStackAuthenticator::new(config)?))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => {
                use fleet_providers::mock::{MockAuthenticator, MockCloud};
                Ok(Arc::new(MockAuthenticator::shared(Arc::new(MockCloud::new()))))
            }
            other => bail!("unknown or disabled provider '{}'", other),
        }
    }
}

#[cfg(all(test, feature = "provider-openstack"))]
mod tests {
    use super::*;
    use std::fs;

    const CLOUDS: &str = "clouds:\n  prod:\n    auth:\n      auth_url: https://keystone.example:5000\n      username: runner\n      password: hunter2\n      project_name: ci\n";

    fn settings(cloud: &str, clouds_config: Option<String>) -> FleetSettings {
        let mut settings = FleetSettings::from_json(
            r#"{"name":"ci","server_spec":{"name":"runner-%d","imageRef":"img","flavorRef":"m1"}}"#,
        )
        .unwrap();
        settings.cloud = cloud.to_string();
        settings.clouds_config = clouds_config;
        settings
    }

    #[test]
    fn openstack_authenticator_reads_clouds_yaml() {
        let path = env::temp_dir().join(format!("fleet-clouds-{}.yaml", std::process::id()));
        fs::write(&path, CLOUDS).unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let found = ProviderManager::get_authenticator("openstack", &settings("prod", Some(path_str.clone())));
        let unknown = ProviderManager::get_authenticator("openstack", &settings("staging", Some(path_str)));
        fs::remove_file(&path).unwrap();

        assert!(found.is_ok());
        assert!(unknown.is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(ProviderManager::get_authenticator("scaleway", &settings("prod", None)).is_err());
    }
}
