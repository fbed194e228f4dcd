use anyhow::{bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Server creation template.
///
/// Mirrors the Nova create body, plus fields that are easier to write by hand
/// (plain-text `user_data`, security group names, top-level scheduler hints).
/// `name` is a printf-style template holding one integer placeholder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    #[serde(rename = "imageRef", default, skip_serializing_if = "String::is_empty")]
    pub image_ref: String,
    #[serde(rename = "flavorRef", default, skip_serializing_if = "String::is_empty")]
    pub flavor_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<String>,
    /// Plain text; base64-encoded when the create body is rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Passed through verbatim (boot-from-volume setups).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_device_mapping_v2: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_hints: Option<SchedulerHints>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerHints {
    /// Server group UUID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub different_host: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub same_host: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServerSpec {
    /// Render the `POST /servers` request body.
    pub fn to_create_body(&self) -> Result<Value> {
        if self.flavor_ref.trim().is_empty() {
            bail!("server_spec: flavorRef is required");
        }
        if self.image_ref.trim().is_empty() && self.block_device_mapping_v2.is_empty() {
            bail!("server_spec: imageRef or block_device_mapping_v2 is required");
        }

        let mut server = Map::new();
        server.insert("name".into(), json!(self.name));
        server.insert("flavorRef".into(), json!(self.flavor_ref));
        if !self.image_ref.is_empty() {
            server.insert("imageRef".into(), json!(self.image_ref));
        }
        if let Some(key_name) = self.key_name.as_deref().filter(|s| !s.is_empty()) {
            server.insert("key_name".into(), json!(key_name));
        }
        if let Some(description) = self.description.as_deref().filter(|s| !s.is_empty()) {
            server.insert("description".into(), json!(description));
        }
        if let Some(az) = self.availability_zone.as_deref().filter(|s| !s.is_empty()) {
            server.insert("availability_zone".into(), json!(az));
        }
        if !self.networks.is_empty() {
            server.insert("networks".into(), serde_json::to_value(&self.networks)?);
        }
        if !self.security_groups.is_empty() {
            let groups: Vec<Value> = self
                .security_groups
                .iter()
                .map(|name| json!({ "name": name }))
                .collect();
            server.insert("security_groups".into(), Value::Array(groups));
        }
        if let Some(user_data) = self.user_data.as_deref().filter(|s| !s.is_empty()) {
            server.insert("user_data".into(), json!(STANDARD.encode(user_data)));
        }
        if !self.metadata.is_empty() {
            server.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        }
        if !self.tags.is_empty() {
            server.insert("tags".into(), json!(self.tags));
        }
        if !self.block_device_mapping_v2.is_empty() {
            server.insert(
                "block_device_mapping_v2".into(),
                Value::Array(self.block_device_mapping_v2.clone()),
            );
        }

        let mut body = Map::new();
        body.insert("server".into(), Value::Object(server));
        if let Some(hints) = &self.scheduler_hints {
            let hints = serde_json::to_value(hints)?;
            if hints.as_object().is_some_and(|o| !o.is_empty()) {
                body.insert("os:scheduler_hints".into(), hints);
            }
        }
        Ok(Value::Object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_JSON: &str = r##"
    {
        "name": "gitlab-runner-%d",
        "description": "podman instance",
        "imageRef": "f2403879-6fbe-49a0-b71f-54b70039f32a",
        "flavorRef": "5",
        "key_name": "gitlab-autoscaler",
        "networks": [{"uuid": "c487d046-80ad-4da0-8b98-4a48ad3c257a"}],
        "security_groups": ["allow_gitlab_runner"],
        "scheduler_hints": {"group": "a5b557be-b7f0-4cb3-8f7c-6b5092f29c2c"},
        "tags": ["podman", "CI"],
        "user_data": "#!cloud-config\npackage_update: true\npackage_upgrade: true\n",
        "metadata": {"foo": "bar"}
    }
    "##;

    #[test]
    fn renders_create_body() {
        let spec: ServerSpec = serde_json::from_str(SPEC_JSON).unwrap();
        assert_eq!(
            spec.scheduler_hints.as_ref().and_then(|h| h.group.as_deref()),
            Some("a5b557be-b7f0-4cb3-8f7c-6b5092f29c2c")
        );

        let body = spec.to_create_body().unwrap();
        let expected = json!({
            "server": {
                "description": "podman instance",
                "flavorRef": "5",
                "imageRef": "f2403879-6fbe-49a0-b71f-54b70039f32a",
                "key_name": "gitlab-autoscaler",
                "metadata": {"foo": "bar"},
                "name": "gitlab-runner-%d",
                "networks": [{"uuid": "c487d046-80ad-4da0-8b98-4a48ad3c257a"}],
                "security_groups": [{"name": "allow_gitlab_runner"}],
                "tags": ["podman", "CI"],
                "user_data": "IyFjbG91ZC1jb25maWcKcGFja2FnZV91cGRhdGU6IHRydWUKcGFja2FnZV91cGdyYWRlOiB0cnVlCg=="
            },
            "os:scheduler_hints": {"group": "a5b557be-b7f0-4cb3-8f7c-6b5092f29c2c"}
        });
        assert_eq!(body, expected);
    }

    #[test]
    fn flavor_is_required() {
        let spec = ServerSpec {
            name: "runner-%d".into(),
            image_ref: "img".into(),
            ..Default::default()
        };
        let err = spec.to_create_body().unwrap_err();
        assert!(err.to_string().contains("flavorRef"));
    }

    #[test]
    fn boot_volume_replaces_image() {
        let spec = ServerSpec {
            name: "runner-%d".into(),
            flavor_ref: "m1.small".into(),
            block_device_mapping_v2: vec![json!({
                "uuid": "vol-1",
                "source_type": "volume",
                "destination_type": "volume",
                "boot_index": 0
            })],
            ..Default::default()
        };
        let body = spec.to_create_body().unwrap();
        assert!(body["server"].get("imageRef").is_none());
        assert_eq!(body["server"]["block_device_mapping_v2"][0]["uuid"], "vol-1");
        assert!(body.get("os:scheduler_hints").is_none());
    }
}
