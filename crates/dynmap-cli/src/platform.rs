//! Console platform used by `dynmap test --send`.
//!
//! Accepts every request, assigns sequential ids and logs what a real
//! platform connection would have received.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dynmap_core::Qos;
use dynmap_engine::{ApiFacade, FacadeError, FacadeResult, IdentityFacade, MessagePublisher};
use serde_json::{json, Value};
use tracing::info;

/// First id handed out by the console platform.
const FIRST_ID: u64 = 1000;

#[derive(Debug)]
pub struct ConsolePlatform {
    next_id: AtomicU64,
    /// (id type, external id) -> internal id
    identities: Mutex<HashMap<(String, String), String>>,
}

impl ConsolePlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(FIRST_ID),
            identities: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn identities(
        &self,
    ) -> FacadeResult<std::sync::MutexGuard<'_, HashMap<(String, String), String>>> {
        self.identities
            .lock()
            .map_err(|_| FacadeError::Transport("identity registry poisoned".to_string()))
    }
}

#[async_trait]
impl ApiFacade for ConsolePlatform {
    async fn create(&self, body: &Value) -> FacadeResult<Value> {
        let id = self.next_id();
        info!("POST {} -> {}", body, id);
        Ok(json!({ "id": id }))
    }

    async fn update(&self, id: &str, body: &Value) -> FacadeResult<Value> {
        info!("PATCH {} {}", id, body);
        Ok(json!({ "id": id }))
    }
}

#[async_trait]
impl IdentityFacade for ConsolePlatform {
    async fn detail(&self, id_type: &str, external_id: &str) -> FacadeResult<Option<String>> {
        Ok(self
            .identities()?
            .get(&(id_type.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn create(
        &self,
        id_type: &str,
        external_id: &str,
        managed_object: &Value,
    ) -> FacadeResult<String> {
        let mut identities = self.identities()?;
        let key = (id_type.to_string(), external_id.to_string());
        if identities.contains_key(&key) {
            return Err(FacadeError::Conflict(format!("{}/{}", id_type, external_id)));
        }
        let id = self.next_id();
        info!(
            "Registered {}/{} as {}: {}",
            id_type, external_id, id, managed_object
        );
        identities.insert(key, id.clone());
        Ok(id)
    }

    async fn external_id(&self, id_type: &str, internal_id: &str) -> FacadeResult<Option<String>> {
        Ok(self
            .identities()?
            .iter()
            .find(|((t, _), id)| t == id_type && id.as_str() == internal_id)
            .map(|((_, external_id), _)| external_id.clone()))
    }
}

#[async_trait]
impl MessagePublisher for ConsolePlatform {
    async fn publish(&self, topic: &str, payload: &Value, qos: Qos) -> FacadeResult<()> {
        info!("PUBLISH {} (qos {}) {}", topic, qos.level(), payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let platform = ConsolePlatform::new();
        let id = IdentityFacade::create(&platform, "c8y_Serial", "abc", &json!({}))
            .await
            .unwrap();
        assert_eq!(id, "1000");
        assert_eq!(
            platform.detail("c8y_Serial", "abc").await.unwrap(),
            Some(id.clone())
        );
        assert_eq!(
            platform.external_id("c8y_Serial", &id).await.unwrap(),
            Some("abc".to_string())
        );
        assert!(matches!(
            IdentityFacade::create(&platform, "c8y_Serial", "abc", &json!({})).await,
            Err(FacadeError::Conflict(_))
        ));
    }
}
