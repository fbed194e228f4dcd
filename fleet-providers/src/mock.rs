use crate::{inventory, Authenticator, CloudApi, ServerSpec};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_common::MEMBERSHIP_KEY;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-operation call counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub list: usize,
    pub get: usize,
    pub create: usize,
    pub delete: usize,
    pub console: usize,
    pub image: usize,
}

#[derive(Default)]
struct MockState {
    servers: Vec<inventory::Instance>,
    console: HashMap<String, String>,
    images: HashMap<String, inventory::ImageProperties>,
    created: Vec<ServerSpec>,
    fail_list: bool,
    fail_create: bool,
    fail_delete: HashSet<String>,
    fail_console: HashSet<String>,
    calls: MockCalls,
}

/// In-memory compute API. Listing order is insertion order.
#[derive(Default)]
pub struct MockCloud {
    generation: usize,
    state: Mutex<MockState>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags the client with the handshake that produced it.
    pub fn with_generation(generation: usize) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, instance: inventory::Instance) {
        self.state().servers.push(instance);
    }

    /// Adds a server with the given status and age, tagged into `fleet` when given.
    pub fn add_server(
        &self,
        id: &str,
        status: &str,
        created_at: DateTime<Utc>,
        fleet: Option<&str>,
    ) {
        let mut metadata = HashMap::new();
        if let Some(fleet) = fleet {
            metadata.insert(MEMBERSHIP_KEY.to_string(), fleet.to_string());
        }
        self.insert(inventory::Instance {
            id: id.to_string(),
            name: id.to_string(),
            status: status.to_string(),
            created_at,
            metadata,
            access_ipv4: None,
            addresses: Default::default(),
        });
    }

    pub fn set_status(&self, id: &str, status: &str) {
        let mut state = self.state();
        if let Some(srv) = state.servers.iter_mut().find(|s| s.id == id) {
            srv.status = status.to_string();
        }
    }

    pub fn set_console(&self, id: &str, output: &str) {
        self.state()
            .console
            .insert(id.to_string(), output.to_string());
    }

    pub fn set_image_properties(&self, image_ref: &str, props: inventory::ImageProperties) {
        self.state().images.insert(image_ref.to_string(), props);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn fail_creation(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    pub fn fail_deletion_of(&self, id: &str) {
        self.state().fail_delete.insert(id.to_string());
    }

    pub fn fail_console_for(&self, id: &str) {
        self.state().fail_console.insert(id.to_string());
    }

    pub fn calls(&self) -> MockCalls {
        self.state().calls.clone()
    }

    pub fn servers(&self) -> Vec<inventory::Instance> {
        self.state().servers.clone()
    }

    /// Specs received by `create_instance`, in submission order.
    pub fn created_specs(&self) -> Vec<ServerSpec> {
        self.state().created.clone()
    }
}

#[async_trait]
impl CloudApi for MockCloud {
    async fn list_instances(&self) -> Result<Vec<inventory::Instance>> {
        let mut state = self.state();
        state.calls.list += 1;
        if state.fail_list {
            bail!("mock: server listing unavailable");
        }
        Ok(state.servers.clone())
    }

    async fn get_instance(&self, server_id: &str) -> Result<inventory::Instance> {
        let mut state = self.state();
        state.calls.get += 1;
        state
            .servers
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
            .ok_or_else(|| anyhow!("mock: server {} not found", server_id))
    }

    async fn create_instance(&self, spec: &ServerSpec) -> Result<inventory::Instance> {
        let mut state = self.state();
        state.calls.create += 1;
        state.created.push(spec.clone());
        if state.fail_create {
            bail!("mock: quota exceeded");
        }
        let instance = inventory::Instance::from_spec(uuid::Uuid::new_v4().to_string(), spec);
        state.servers.push(instance.clone());
        Ok(instance)
    }

    async fn delete_instance(&self, server_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.delete += 1;
        if state.fail_delete.contains(server_id) {
            bail!("mock: delete of {} refused", server_id);
        }
        let before = state.servers.len();
        state.servers.retain(|s| s.id != server_id);
        if state.servers.len() == before {
            bail!("mock: server {} not found", server_id);
        }
        state.console.remove(server_id);
        Ok(())
    }

    async fn get_console_output(&self, server_id: &str, max_lines: usize) -> Result<String> {
        let mut state = self.state();
        state.calls.console += 1;
        if state.fail_console.contains(server_id) {
            bail!("mock: console of {} unavailable", server_id);
        }
        let output = state.console.get(server_id).cloned().unwrap_or_default();
        Ok(crate::console_head(&output, max_lines))
    }

    async fn get_image_properties(
        &self,
        image_ref: &str,
    ) -> Result<Option<inventory::ImageProperties>> {
        let mut state = self.state();
        state.calls.image += 1;
        Ok(state.images.get(image_ref).cloned())
    }
}

/// Hands out either one shared [`MockCloud`] or a new one per handshake.
pub struct MockAuthenticator {
    shared: Option<Arc<MockCloud>>,
    issued: Mutex<Vec<Arc<MockCloud>>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockAuthenticator {
    /// Every handshake returns the same cloud.
    pub fn shared(cloud: Arc<MockCloud>) -> Self {
        Self {
            shared: Some(cloud),
            issued: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Every handshake returns a new, empty cloud tagged with its generation.
    pub fn fresh() -> Self {
        Self {
            shared: None,
            issued: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Handshakes attempted, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clients handed out so far, oldest first.
    pub fn issued(&self) -> Vec<Arc<MockCloud>> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn CloudApi>> {
        let generation = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            bail!("mock: token endpoint unavailable");
        }
        let cloud = match &self.shared {
            Some(cloud) => cloud.clone(),
            None => Arc::new(MockCloud::with_generation(generation)),
        };
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cloud.clone());
        Ok(cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_output_returns_head() {
        let cloud = MockCloud::new();
        cloud.add_server("a", "ACTIVE", Utc::now(), Some("fleet"));
        cloud.set_console("a", "one\ntwo\nthree");
        assert_eq!(cloud.get_console_output("a", 2).await.unwrap(), "one\ntwo");
        assert_eq!(cloud.calls().console, 1);
    }

    #[tokio::test]
    async fn fresh_authenticator_issues_new_generations() {
        let auth = MockAuthenticator::fresh();
        auth.authenticate().await.unwrap();
        auth.set_failing(true);
        assert!(auth.authenticate().await.is_err());
        auth.set_failing(false);
        auth.authenticate().await.unwrap();

        let issued = auth.issued();
        assert_eq!(auth.calls(), 3);
        assert_eq!(issued.len(), 2);
        assert_eq!(issued[0].generation(), 1);
        assert_eq!(issued[1].generation(), 3);
    }
}
