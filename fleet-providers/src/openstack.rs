use crate::{inventory, Authenticator, CloudApi, ServerSpec, DEFAULT_COMPUTE_API_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Keystone v3 credentials, read from a clouds.yaml entry or the `OS_*` environment.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub auth_url: String,
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub password: Option<String>,
    pub project_name: Option<String>,
    pub project_id: Option<String>,
    pub user_domain_name: Option<String>,
    pub user_domain_id: Option<String>,
    pub project_domain_name: Option<String>,
    pub project_domain_id: Option<String>,
    pub application_credential_id: Option<String>,
    pub application_credential_name: Option<String>,
    pub application_credential_secret: Option<String>,
    pub region_name: Option<String>,
    /// Catalog interface: `public`, `internal` or `admin`.
    pub endpoint_type: String,
    pub compute_api_version: String,
    /// Extra CA bundle (PEM) trusted for every call.
    pub ca_cert: Option<PathBuf>,
    /// Skips TLS verification (`verify: false` in clouds.yaml).
    pub insecure: bool,
}

pub(crate) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn lookup(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    var(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
fn lookup_secret(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(var, &format!("{}_FILE", name))
        .and_then(|path| fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| lookup(var, name))
}

fn domain_ref(id: Option<&str>, name: Option<&str>) -> Value {
    match (id, name) {
        (Some(id), _) => json!({ "id": id }),
        (None, Some(name)) => json!({ "name": name }),
        (None, None) => json!({ "id": "default" }),
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_var)
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&var, name);
        let config = Self {
            auth_url: get("OS_AUTH_URL").unwrap_or_default(),
            username: get("OS_USERNAME"),
            user_id: get("OS_USER_ID"),
            password: lookup_secret(&var, "OS_PASSWORD"),
            project_name: get("OS_PROJECT_NAME").or_else(|| get("OS_TENANT_NAME")),
            project_id: get("OS_PROJECT_ID").or_else(|| get("OS_TENANT_ID")),
            user_domain_name: get("OS_USER_DOMAIN_NAME"),
            user_domain_id: get("OS_USER_DOMAIN_ID"),
            project_domain_name: get("OS_PROJECT_DOMAIN_NAME"),
            project_domain_id: get("OS_PROJECT_DOMAIN_ID"),
            application_credential_id: get("OS_APPLICATION_CREDENTIAL_ID"),
            application_credential_name: get("OS_APPLICATION_CREDENTIAL_NAME"),
            application_credential_secret: lookup_secret(&var, "OS_APPLICATION_CREDENTIAL_SECRET"),
            region_name: get("OS_REGION_NAME"),
            endpoint_type: get("OS_ENDPOINT_TYPE")
                .or_else(|| get("OS_INTERFACE"))
                .unwrap_or_else(|| "public".to_string()),
            compute_api_version: get("OS_COMPUTE_API_VERSION")
                .unwrap_or_else(|| DEFAULT_COMPUTE_API_VERSION.to_string()),
            ca_cert: get("OS_CACERT").map(PathBuf::from),
            insecure: get("OS_INSECURE").is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        };
        if config.auth_url.is_empty() {
            bail!("OS_AUTH_URL must be set");
        }
        Ok(config)
    }

    /// Region, interface and compute version from the environment override
    /// what a clouds.yaml entry says.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(region) = lookup(&var, "OS_REGION_NAME") {
            self.region_name = Some(region);
        }
        if let Some(endpoint_type) = lookup(&var, "OS_ENDPOINT_TYPE") {
            self.endpoint_type = endpoint_type;
        }
        if let Some(version) = lookup(&var, "OS_COMPUTE_API_VERSION") {
            self.compute_api_version = version;
        }
    }

    /// Keystone base URL ending in `/v3`.
    pub fn identity_url(&self) -> String {
        let base = self.auth_url.trim().trim_end_matches('/');
        if base.ends_with("/v3") {
            base.to_string()
        } else {
            format!("{}/v3", base)
        }
    }

    /// Catalog interface name without the legacy `URL` suffix.
    pub fn interface(&self) -> &str {
        match self.endpoint_type.trim() {
            "" | "public" | "publicURL" => "public",
            "internal" | "internalURL" => "internal",
            "admin" | "adminURL" => "admin",
            other => other,
        }
    }

    fn user_ref(&self) -> Result<Value> {
        if let Some(id) = &self.user_id {
            return Ok(json!({ "id": id }));
        }
        let name = self
            .username
            .as_deref()
            .ok_or_else(|| anyhow!("OS_USERNAME or OS_USER_ID must be set"))?;
        Ok(json!({
            "name": name,
            "domain": domain_ref(self.user_domain_id.as_deref(), self.user_domain_name.as_deref()),
        }))
    }

    fn project_scope(&self) -> Option<Value> {
        if let Some(id) = &self.project_id {
            return Some(json!({ "project": { "id": id } }));
        }
        let name = self.project_name.as_deref()?;
        let domain = domain_ref(
            self.project_domain_id
                .as_deref()
                .or(self.user_domain_id.as_deref()),
            self.project_domain_name
                .as_deref()
                .or(self.user_domain_name.as_deref()),
        );
        Some(json!({ "project": { "name": name, "domain": domain } }))
    }

    /// Body of `POST /v3/auth/tokens`.
    pub fn token_request(&self) -> Result<Value> {
        let credential = match (
            &self.application_credential_id,
            &self.application_credential_name,
        ) {
            (Some(id), _) => Some(json!({ "id": id })),
            (None, Some(name)) => Some(json!({ "name": name, "user": self.user_ref()? })),
            (None, None) => None,
        };
        if let Some(mut credential) = credential {
            let secret = self
                .application_credential_secret
                .as_deref()
                .ok_or_else(|| anyhow!("OS_APPLICATION_CREDENTIAL_SECRET must be set"))?;
            credential["secret"] = json!(secret);
            return Ok(json!({
                "auth": {
                    "identity": {
                        "methods": ["application_credential"],
                        "application_credential": credential,
                    }
                }
            }));
        }

        let password = self
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("OS_PASSWORD must be set for password authentication"))?;
        let mut user = self.user_ref()?;
        user["password"] = json!(password);

        let mut auth = json!({
            "identity": {
                "methods": ["password"],
                "password": { "user": user },
            }
        });
        if let Some(scope) = self.project_scope() {
            auth["scope"] = scope;
        }
        Ok(json!({ "auth": auth }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

/// First endpoint of `service_type` on `interface`, restricted to `region` when given.
pub fn endpoint_url(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Option<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == interface
                && region.map_or(true, |r| {
                    ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r)
                })
        })
        .map(|ep| ep.url.trim_end_matches('/').to_string())
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
    #[serde(default)]
    expires_at: Option<String>,
}

fn http_client(config: &AuthConfig) -> Result<Client> {
    // Default reqwest client has no overall timeout. If the cloud stalls, a cycle can hang forever.
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30));
    if let Some(path) = &config.ca_cert {
        let pem = fs::read(path)
            .with_context(|| format!("failed to read CA bundle {}", path.display()))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .with_context(|| format!("invalid CA bundle {}", path.display()))?;
        builder = builder.add_root_certificate(cert);
    }
    if config.insecure {
        warn!("TLS verification disabled for OpenStack API calls");
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().context("failed to build HTTP client")
}

async fn ensure_success(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    bail!("{} failed: status={} body={}", what, status.as_u16(), text)
}

/// Runs the Keystone handshake and builds a compute client from the catalog.
pub struct OpenStackAuthenticator {
    config: AuthConfig,
    client: Client,
}

impl OpenStackAuthenticator {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self { config, client })
    }

    pub async fn login(&self) -> Result<OpenStackProvider> {
        let url = format!("{}/auth/tokens", self.config.identity_url());
        debug!(%url, "requesting keystone token");

        let resp = self
            .client
            .post(&url)
            .json(&self.config.token_request()?)
            .send()
            .await
            .context("failed to connect to OpenStack Keystone")?;
        let resp = ensure_success(resp, "keystone token request").await?;

        let token = resp
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("keystone response carries no X-Subject-Token"))?;
        let body: TokenResponse = resp.json().await.context("keystone token decode")?;

        let interface = self.config.interface();
        let region = self.config.region_name.as_deref();
        let compute_url = endpoint_url(&body.token.catalog, "compute", interface, region)
            .ok_or_else(|| {
                anyhow!(
                    "no compute endpoint in catalog (interface={}, region={:?})",
                    interface,
                    region
                )
            })?;
        let image_url = endpoint_url(&body.token.catalog, "image", interface, region);

        debug!(
            %compute_url,
            image_url = ?image_url,
            expires_at = ?body.token.expires_at,
            "keystone token issued"
        );

        Ok(OpenStackProvider {
            client: self.client.clone(),
            token,
            compute_url,
            image_url,
            microversion: self.config.compute_api_version.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for OpenStackAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn CloudApi>> {
        Ok(Arc::new(self.login().await?))
    }
}

/// Nova + Glance client bound to one Keystone token.
pub struct OpenStackProvider {
    client: Client,
    token: String,
    compute_url: String,
    image_url: Option<String>,
    microversion: String,
}

#[derive(Deserialize)]
struct NovaServer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    created: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(rename = "accessIPv4", default)]
    access_ipv4: Option<String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<inventory::Address>>,
}

impl From<NovaServer> for inventory::Instance {
    fn from(srv: NovaServer) -> Self {
        Self {
            id: srv.id,
            name: srv.name,
            status: srv.status,
            created_at: srv.created,
            metadata: srv.metadata,
            access_ipv4: srv.access_ipv4.filter(|ip| !ip.is_empty()),
            addresses: srv.addresses,
        }
    }
}

#[derive(Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<NovaServer>,
    #[serde(default)]
    servers_links: Vec<Link>,
}

#[derive(Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: NovaServer,
}

#[derive(Deserialize)]
struct CreatedEnvelope {
    server: CreatedServer,
}

#[derive(Deserialize)]
struct CreatedServer {
    id: String,
}

#[derive(Deserialize)]
struct ConsoleOutput {
    #[serde(default)]
    output: String,
}

impl OpenStackProvider {
    pub fn new(
        token: String,
        compute_url: String,
        image_url: Option<String>,
        microversion: String,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(&AuthConfig::default())?,
            token,
            compute_url: compute_url.trim_end_matches('/').to_string(),
            image_url: image_url.map(|u| u.trim_end_matches('/').to_string()),
            microversion,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Auth-Token", HeaderValue::from_str(&self.token)?);
        headers.insert(
            "X-OpenStack-Nova-API-Version",
            HeaderValue::from_str(&self.microversion)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn server_url(&self, server_id: &str) -> String {
        format!("{}/servers/{}", self.compute_url, server_id)
    }
}

#[async_trait]
impl CloudApi for OpenStackProvider {
    async fn list_instances(&self) -> Result<Vec<inventory::Instance>> {
        let mut url = format!("{}/servers/detail", self.compute_url);
        let mut servers = Vec::new();

        loop {
            let resp = self.client.get(&url).headers(self.headers()?).send().await?;
            let page: ServerPage = ensure_success(resp, "server listing")
                .await?
                .json()
                .await
                .context("server listing extract error")?;
            servers.extend(page.servers.into_iter().map(inventory::Instance::from));

            match page.servers_links.into_iter().find(|l| l.rel == "next") {
                Some(next) if next.href != url => url = next.href,
                _ => break,
            }
        }

        Ok(servers)
    }

    async fn get_instance(&self, server_id: &str) -> Result<inventory::Instance> {
        let resp = self
            .client
            .get(self.server_url(server_id))
            .headers(self.headers()?)
            .send()
            .await?;
        let envelope: ServerEnvelope = ensure_success(resp, "server show")
            .await?
            .json()
            .await
            .context("server show decode")?;
        Ok(envelope.server.into())
    }

    async fn create_instance(&self, spec: &ServerSpec) -> Result<inventory::Instance> {
        let url = format!("{}/servers", self.compute_url);
        let body = spec.to_create_body()?;
        debug!(%url, name = %spec.name, "creating server");

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let created: CreatedEnvelope = ensure_success(resp, "server create")
            .await?
            .json()
            .await
            .context("server create decode")?;

        Ok(inventory::Instance::from_spec(created.server.id, spec))
    }

    async fn delete_instance(&self, server_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.server_url(server_id))
            .headers(self.headers()?)
            .send()
            .await?;
        ensure_success(resp, "server delete").await?;
        Ok(())
    }

    async fn get_console_output(&self, server_id: &str, max_lines: usize) -> Result<String> {
        let url = format!("{}/action", self.server_url(server_id));
        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            // Nova's `length` selects the tail; the full log is fetched and cut here.
            .json(&json!({ "os-getConsoleOutput": {} }))
            .send()
            .await?;
        let console: ConsoleOutput = ensure_success(resp, "console output")
            .await?
            .json()
            .await
            .context("console output decode")?;
        Ok(crate::console_head(&console.output, max_lines))
    }

    async fn get_image_properties(
        &self,
        image_ref: &str,
    ) -> Result<Option<inventory::ImageProperties>> {
        let Some(image_url) = &self.image_url else {
            return Ok(None);
        };
        let url = if image_url.ends_with("/v2") {
            format!("{}/images/{}", image_url, image_ref)
        } else {
            format!("{}/v2/images/{}", image_url, image_ref)
        };

        let resp = self
            .client
            .get(&url)
            .header("X-Auth-Token", HeaderValue::from_str(&self.token)?)
            .send()
            .await?;
        let props: inventory::ImageProperties = ensure_success(resp, "image show")
            .await
            .with_context(|| format!("failed to get image {}", image_ref))?
            .json()
            .await
            .context("failed to parse properties")?;
        Ok(Some(props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap as RequestHeaders, StatusCode};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::Mutex;

    struct FakeCloud {
        base: String,
        created: Mutex<Vec<Value>>,
    }

    fn authorized(headers: &RequestHeaders) -> bool {
        headers.get("x-auth-token").and_then(|v| v.to_str().ok()) == Some("tok-1")
            && headers
                .get("x-openstack-nova-api-version")
                .and_then(|v| v.to_str().ok())
                == Some("2.79")
    }

    fn server_json(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "name": format!("runner-{}", id),
            "status": status,
            "created": "2024-05-01T10:00:00Z",
            "metadata": { "fleeting-cluster": "ci" },
            "accessIPv4": "",
            "addresses": {
                "private": [{ "version": 4, "addr": "10.0.0.5", "OS-EXT-IPS:type": "fixed" }]
            }
        })
    }

    async fn issue_token(State(fake): State<Arc<FakeCloud>>, Json(body): Json<Value>) -> AxumResponse {
        if body["auth"]["identity"]["methods"][0] != "password" {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let catalog = json!({
            "token": {
                "expires_at": "2030-01-01T00:00:00Z",
                "catalog": [
                    {
                        "type": "compute",
                        "endpoints": [
                            { "interface": "internal", "region": "RegionOne", "url": "http://internal.invalid" },
                            { "interface": "public", "region": "RegionOne", "url": format!("{}/compute/", fake.base) }
                        ]
                    },
                    {
                        "type": "image",
                        "endpoints": [
                            { "interface": "public", "region": "RegionOne", "url": format!("{}/image", fake.base) }
                        ]
                    }
                ]
            }
        });
        (StatusCode::CREATED, [("X-Subject-Token", "tok-1")], Json(catalog)).into_response()
    }

    async fn list_servers(
        headers: RequestHeaders,
        Query(query): Query<HashMap<String, String>>,
        State(fake): State<Arc<FakeCloud>>,
    ) -> AxumResponse {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let page = match query.get("marker") {
            None => json!({
                "servers": [server_json("a", "ACTIVE")],
                "servers_links": [{
                    "rel": "next",
                    "href": format!("{}/compute/servers/detail?marker=a", fake.base)
                }]
            }),
            Some(_) => json!({ "servers": [server_json("b", "BUILD")] }),
        };
        Json(page).into_response()
    }

    async fn create_server(
        headers: RequestHeaders,
        State(fake): State<Arc<FakeCloud>>,
        Json(body): Json<Value>,
    ) -> AxumResponse {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        fake.created.lock().unwrap().push(body);
        (StatusCode::ACCEPTED, Json(json!({ "server": { "id": "new-1" } }))).into_response()
    }

    async fn show_server(Path(id): Path<String>) -> AxumResponse {
        Json(json!({ "server": server_json(&id, "ACTIVE") })).into_response()
    }

    async fn delete_server(Path(id): Path<String>) -> AxumResponse {
        if id == "missing" {
            return (StatusCode::NOT_FOUND, "itemNotFound").into_response();
        }
        StatusCode::NO_CONTENT.into_response()
    }

    async fn server_action(Path(id): Path<String>, Json(body): Json<Value>) -> AxumResponse {
        if !body["os-getConsoleOutput"].is_object() {
            return StatusCode::BAD_REQUEST.into_response();
        }
        let noise = (0..150).map(|i| format!("systemd[1]: unit {}", i)).collect::<Vec<_>>();
        Json(json!({ "output": format!("console of {}\nlogin: \n{}", id, noise.join("\n")) }))
            .into_response()
    }

    async fn show_image(Path(id): Path<String>) -> AxumResponse {
        Json(json!({
            "id": id,
            "name": "flatcar_production_openstack",
            "architecture": "x86_64",
            "os_type": "linux",
            "os_admin_user": "core"
        }))
        .into_response()
    }

    async fn spawn_fake() -> (String, Arc<FakeCloud>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let fake = Arc::new(FakeCloud {
            base: base.clone(),
            created: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/v3/auth/tokens", post(issue_token))
            .route("/compute/servers/detail", get(list_servers))
            .route("/compute/servers", post(create_server))
            .route("/compute/servers/:id", get(show_server).delete(delete_server))
            .route("/compute/servers/:id/action", post(server_action))
            .route("/image/v2/images/:id", get(show_image))
            .with_state(fake.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, fake)
    }

    fn password_config(auth_url: String) -> AuthConfig {
        AuthConfig {
            auth_url,
            username: Some("runner".into()),
            password: Some("secret".into()),
            project_name: Some("ci".into()),
            user_domain_name: Some("Default".into()),
            region_name: Some("RegionOne".into()),
            endpoint_type: "publicURL".into(),
            compute_api_version: DEFAULT_COMPUTE_API_VERSION.into(),
            ..Default::default()
        }
    }

    #[test]
    fn password_token_request_is_project_scoped() {
        let body = password_config("https://keystone.example:5000".into())
            .token_request()
            .unwrap();
        assert_eq!(body["auth"]["identity"]["methods"], json!(["password"]));
        assert_eq!(body["auth"]["identity"]["password"]["user"]["name"], "runner");
        assert_eq!(
            body["auth"]["identity"]["password"]["user"]["domain"],
            json!({ "name": "Default" })
        );
        assert_eq!(body["auth"]["scope"]["project"]["name"], "ci");
        // Project domain falls back to the user domain.
        assert_eq!(
            body["auth"]["scope"]["project"]["domain"],
            json!({ "name": "Default" })
        );
    }

    #[test]
    fn application_credential_token_request() {
        let config = AuthConfig {
            auth_url: "https://keystone.example/v3/".into(),
            application_credential_id: Some("ac-1".into()),
            application_credential_secret: Some("s3cr3t".into()),
            ..Default::default()
        };
        assert_eq!(config.identity_url(), "https://keystone.example/v3");
        let body = config.token_request().unwrap();
        assert_eq!(
            body["auth"]["identity"]["application_credential"],
            json!({ "id": "ac-1", "secret": "s3cr3t" })
        );
        assert!(body["auth"].get("scope").is_none());

        let missing_secret = AuthConfig {
            application_credential_secret: None,
            ..config
        };
        assert!(missing_secret.token_request().is_err());
    }

    #[test]
    fn reads_credentials_from_variables() {
        let vars: HashMap<&str, &str> = [
            ("OS_AUTH_URL", "https://keystone.example:5000"),
            ("OS_USERNAME", "runner"),
            ("OS_PASSWORD", "secret"),
            ("OS_TENANT_NAME", "ci"),
            ("OS_INTERFACE", "internalURL"),
            ("OS_REGION_NAME", " "),
        ]
        .into_iter()
        .collect();
        let config = AuthConfig::from_vars(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.identity_url(), "https://keystone.example:5000/v3");
        assert_eq!(config.project_name.as_deref(), Some("ci"));
        assert_eq!(config.interface(), "internal");
        assert_eq!(config.region_name, None);
        assert_eq!(config.compute_api_version, DEFAULT_COMPUTE_API_VERSION);
        assert!(!config.insecure);

        assert!(AuthConfig::from_vars(|_| None).is_err());
    }

    #[test]
    fn endpoint_selection_honours_interface_and_region() {
        let catalog: Vec<CatalogEntry> = serde_json::from_value(json!([
            {
                "type": "compute",
                "endpoints": [
                    { "interface": "public", "region": "RegionTwo", "url": "https://two/compute" },
                    { "interface": "public", "region": "RegionOne", "url": "https://one/compute/" },
                    { "interface": "internal", "region": "RegionOne", "url": "https://one-int/compute" }
                ]
            }
        ]))
        .unwrap();

        assert_eq!(
            endpoint_url(&catalog, "compute", "public", Some("RegionOne")).as_deref(),
            Some("https://one/compute")
        );
        assert_eq!(
            endpoint_url(&catalog, "compute", "internal", None).as_deref(),
            Some("https://one-int/compute")
        );
        assert_eq!(endpoint_url(&catalog, "image", "public", None), None);
    }

    #[tokio::test]
    async fn login_then_list_follows_pages() {
        let (base, _fake) = spawn_fake().await;
        let auth = OpenStackAuthenticator::new(password_config(base)).unwrap();
        let provider = auth.login().await.unwrap();

        let servers = provider.list_instances().await.unwrap();
        let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(servers[0].status, "ACTIVE");
        assert_eq!(servers[0].fleet(), Some("ci"));
        assert_eq!(servers[0].access_ipv4, None);
        assert_eq!(servers[0].addresses["private"][0].address, "10.0.0.5");
        assert_eq!(
            servers[1].created_at,
            "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn server_operations_round_trip() {
        let (base, fake) = spawn_fake().await;
        let provider = OpenStackAuthenticator::new(password_config(base))
            .unwrap()
            .login()
            .await
            .unwrap();

        let output = provider.get_console_output("a", 100).await.unwrap();
        assert!(output.starts_with("console of a\nlogin: "));
        assert_eq!(output.lines().count(), 100);

        let spec = ServerSpec {
            name: "runner-1".into(),
            image_ref: "img".into(),
            flavor_ref: "m1.small".into(),
            user_data: Some("hello".into()),
            ..Default::default()
        };
        let created = provider.create_instance(&spec).await.unwrap();
        assert_eq!(created.id, "new-1");
        assert_eq!(created.name, "runner-1");
        let bodies = fake.created.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["server"]["user_data"], "aGVsbG8=");

        provider.delete_instance("a").await.unwrap();
        let err = provider.delete_instance("missing").await.unwrap_err();
        assert!(err.to_string().contains("status=404"));

        let srv = provider.get_instance("zz").await.unwrap();
        assert_eq!(srv.id, "zz");

        let props = provider.get_image_properties("img").await.unwrap().unwrap();
        assert_eq!(props.os_admin_user, "core");
        assert_eq!(props.architecture, "x86_64");
    }
}
