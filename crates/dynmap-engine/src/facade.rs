//! Interfaces to the platform and the message broker.
//!
//! The engine never talks to a backend directly. Callers inject one
//! [`ApiFacade`] per target API, an [`IdentityFacade`] for external id
//! lookups and optionally a [`MessagePublisher`] for outbound rules.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dynmap_core::{Qos, TargetApi};
use serde_json::Value;

use crate::error::{FacadeError, FacadeResult};

/// Creates (and for inventory, updates) platform records.
#[async_trait]
pub trait ApiFacade: Send + Sync {
    /// Create a record. The response carries the assigned `id`.
    async fn create(&self, body: &Value) -> FacadeResult<Value>;

    /// Update the record `id`.
    async fn update(&self, id: &str, _body: &Value) -> FacadeResult<Value> {
        Err(FacadeError::Unsupported(format!("update of {}", id)))
    }
}

/// External id registry of the platform.
#[async_trait]
pub trait IdentityFacade: Send + Sync {
    /// Internal id registered for `(id_type, external_id)`, `None` if unknown.
    async fn detail(&self, id_type: &str, external_id: &str) -> FacadeResult<Option<String>>;

    /// Create a device from `managed_object` and register `external_id` for it.
    async fn create(
        &self,
        id_type: &str,
        external_id: &str,
        managed_object: &Value,
    ) -> FacadeResult<String>;

    /// External id of type `id_type` registered for `internal_id`.
    async fn external_id(
        &self,
        _id_type: &str,
        _internal_id: &str,
    ) -> FacadeResult<Option<String>> {
        Ok(None)
    }
}

/// Publishes outbound payloads to the broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value, qos: Qos) -> FacadeResult<()>;
}

/// Facades available to one engine.
#[derive(Clone)]
pub struct Facades {
    apis: HashMap<TargetApi, Arc<dyn ApiFacade>>,
    identity: Arc<dyn IdentityFacade>,
    publisher: Option<Arc<dyn MessagePublisher>>,
}

impl Facades {
    pub fn new(identity: Arc<dyn IdentityFacade>) -> Self {
        Self {
            apis: HashMap::new(),
            identity,
            publisher: None,
        }
    }

    pub fn with_api(mut self, api: TargetApi, facade: Arc<dyn ApiFacade>) -> Self {
        self.apis.insert(api, facade);
        self
    }

    /// Register the same facade for every target API.
    pub fn with_all_apis(mut self, facade: Arc<dyn ApiFacade>) -> Self {
        for api in TargetApi::ALL {
            self.apis.insert(api, facade.clone());
        }
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn MessagePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn api(&self, api: TargetApi) -> FacadeResult<&Arc<dyn ApiFacade>> {
        self.apis
            .get(&api)
            .ok_or_else(|| FacadeError::Unsupported(format!("no facade for {}", api)))
    }

    pub fn identity(&self) -> &Arc<dyn IdentityFacade> {
        &self.identity
    }

    pub fn publisher(&self) -> FacadeResult<&Arc<dyn MessagePublisher>> {
        self.publisher
            .as_ref()
            .ok_or_else(|| FacadeError::Unsupported("no message publisher".to_string()))
    }
}

impl std::fmt::Debug for Facades {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facades")
            .field("apis", &self.apis.keys().collect::<Vec<_>>())
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}

/// Identity facade that knows no devices and refuses to create any.
///
/// Useful when only dry runs are performed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdentity;

#[async_trait]
impl IdentityFacade for NoIdentity {
    async fn detail(&self, _id_type: &str, _external_id: &str) -> FacadeResult<Option<String>> {
        Ok(None)
    }

    async fn create(
        &self,
        id_type: &str,
        external_id: &str,
        _managed_object: &Value,
    ) -> FacadeResult<String> {
        Err(FacadeError::Unsupported(format!(
            "device creation for {}/{}",
            id_type, external_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ApiFacade for Echo {
        async fn create(&self, body: &Value) -> FacadeResult<Value> {
            Ok(body.clone())
        }
    }

    #[tokio::test]
    async fn test_lookup_and_defaults() {
        let facades = Facades::new(Arc::new(NoIdentity)).with_api(TargetApi::Event, Arc::new(Echo));

        let event = facades.api(TargetApi::Event).unwrap();
        let body = serde_json::json!({"type": "x"});
        assert_eq!(event.create(&body).await.unwrap(), body);
        assert!(matches!(
            event.update("1", &body).await,
            Err(FacadeError::Unsupported(_))
        ));

        assert!(facades.api(TargetApi::Alarm).is_err());
        assert!(facades.publisher().is_err());
        assert_eq!(facades.identity().detail("t", "x").await.unwrap(), None);
        assert_eq!(
            facades.identity().external_id("t", "1").await.unwrap(),
            None
        );
    }
}
