use fleet_providers::CloudApi;
use std::sync::{Arc, PoisonError, RwLock};

/// Single slot holding the live Cloud API client.
///
/// Readers copy the `Arc` out and drop the lock before any network call.
/// The rotator swaps the whole value; in-flight calls finish on the client
/// they started with.
#[derive(Clone)]
pub struct ClientHandle {
    slot: Arc<RwLock<Arc<dyn CloudApi>>>,
}

impl ClientHandle {
    pub fn new(client: Arc<dyn CloudApi>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(client)),
        }
    }

    /// Current client.
    pub fn snapshot(&self) -> Arc<dyn CloudApi> {
        // The guarded value is a pointer, a panicking writer cannot leave it torn.
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `client` and returns the one it replaced.
    pub fn replace(&self, client: Arc<dyn CloudApi>) -> Arc<dyn CloudApi> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_providers::mock::MockCloud;

    #[tokio::test]
    async fn snapshot_outlives_replacement() {
        let first = Arc::new(MockCloud::with_generation(1));
        let second = Arc::new(MockCloud::with_generation(2));
        let handle = ClientHandle::new(first.clone());

        let in_flight = handle.snapshot();
        handle.replace(second.clone());

        in_flight.list_instances().await.unwrap();
        handle.snapshot().list_instances().await.unwrap();
        handle.clone().snapshot().list_instances().await.unwrap();

        assert_eq!(first.calls().list, 1);
        assert_eq!(second.calls().list, 2);
    }

    #[test]
    fn replace_returns_previous_client() {
        let first = Arc::new(MockCloud::with_generation(1));
        let handle = ClientHandle::new(first.clone());

        let previous = handle.replace(Arc::new(MockCloud::with_generation(2)));
        assert_eq!(
            Arc::as_ptr(&previous) as *const (),
            Arc::as_ptr(&first) as *const ()
        );
    }
}
