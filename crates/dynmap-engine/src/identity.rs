//! Device identity resolution.
//!
//! Maps `(external id type, external id)` to the platform's internal id.
//! Results are cached in a two-level concurrent map. The resolver runs
//! against one of two backends:
//!
//! - [`IdentityBackend::Platform`] delegates cache misses to an
//!   [`IdentityFacade`].
//! - [`IdentityBackend::Simulated`] keeps everything in memory and assigns
//!   deterministic ids. It serves dry runs and is cleared with
//!   [`DeviceIdentityResolver::reset`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{FacadeError, IdentityError};
use crate::facade::IdentityFacade;

/// First id handed out by the simulated backend.
const SIMULATED_ID_BASE: u64 = 10_000;

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityLookup {
    Found(String),
    NotFound,
}

/// Where cache misses go.
#[derive(Clone)]
pub enum IdentityBackend {
    Platform(Arc<dyn IdentityFacade>),
    Simulated,
}

impl std::fmt::Debug for IdentityBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Platform(_) => f.write_str("Platform"),
            Self::Simulated => f.write_str("Simulated"),
        }
    }
}

/// Cached external id resolver.
#[derive(Debug)]
pub struct DeviceIdentityResolver {
    /// id type -> external id -> internal id
    cache: DashMap<String, DashMap<String, String>>,
    backend: IdentityBackend,
    sequence: AtomicU64,
}

impl DeviceIdentityResolver {
    pub fn new(backend: IdentityBackend) -> Self {
        Self {
            cache: DashMap::new(),
            backend,
            sequence: AtomicU64::new(SIMULATED_ID_BASE),
        }
    }

    pub fn platform(facade: Arc<dyn IdentityFacade>) -> Self {
        Self::new(IdentityBackend::Platform(facade))
    }

    pub fn simulated() -> Self {
        Self::new(IdentityBackend::Simulated)
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.backend, IdentityBackend::Simulated)
    }

    /// Internal id for `external_id`, from the cache or the backend.
    pub async fn resolve(
        &self,
        id_type: &str,
        external_id: &str,
    ) -> Result<IdentityLookup, IdentityError> {
        if let Some(id) = self.cached(id_type, external_id) {
            trace!("Identity cache hit {}/{} -> {}", id_type, external_id, id);
            return Ok(IdentityLookup::Found(id));
        }

        match &self.backend {
            IdentityBackend::Simulated => Ok(IdentityLookup::NotFound),
            IdentityBackend::Platform(facade) => match facade.detail(id_type, external_id).await {
                Ok(Some(id)) => {
                    debug!("Resolved {}/{} -> {}", id_type, external_id, id);
                    self.insert(id_type, external_id, &id);
                    Ok(IdentityLookup::Found(id))
                }
                Ok(None) | Err(FacadeError::NotFound(_)) => Ok(IdentityLookup::NotFound),
                Err(e) => Err(IdentityError::from(e)),
            },
        }
    }

    /// Create a device for `external_id` and cache its internal id.
    pub async fn create(
        &self,
        id_type: &str,
        external_id: &str,
        managed_object: &Value,
    ) -> Result<String, IdentityError> {
        let id = match &self.backend {
            IdentityBackend::Simulated => {
                if self.cached(id_type, external_id).is_some() {
                    return Err(IdentityError::Conflict {
                        id_type: id_type.to_string(),
                        external_id: external_id.to_string(),
                    });
                }
                self.sequence.fetch_add(1, Ordering::Relaxed).to_string()
            }
            IdentityBackend::Platform(facade) => facade
                .create(id_type, external_id, managed_object)
                .await
                .map_err(|e| match e {
                    FacadeError::Conflict(_) => IdentityError::Conflict {
                        id_type: id_type.to_string(),
                        external_id: external_id.to_string(),
                    },
                    other => IdentityError::from(other),
                })?,
        };
        debug!("Created device {} for {}/{}", id, id_type, external_id);
        self.insert(id_type, external_id, &id);
        Ok(id)
    }

    /// Create a device, falling back to a lookup once if another writer
    /// created it concurrently.
    pub async fn create_or_resolve(
        &self,
        id_type: &str,
        external_id: &str,
        managed_object: &Value,
    ) -> Result<String, IdentityError> {
        match self.create(id_type, external_id, managed_object).await {
            Err(IdentityError::Conflict { .. }) => {
                debug!(
                    "Device {}/{} created concurrently, resolving again",
                    id_type, external_id
                );
                match self.resolve(id_type, external_id).await? {
                    IdentityLookup::Found(id) => Ok(id),
                    IdentityLookup::NotFound => Err(IdentityError::Conflict {
                        id_type: id_type.to_string(),
                        external_id: external_id.to_string(),
                    }),
                }
            }
            other => other,
        }
    }

    /// External id of type `id_type` for an internal id.
    pub async fn external_id(
        &self,
        id_type: &str,
        internal_id: &str,
    ) -> Result<Option<String>, IdentityError> {
        if let Some(ids) = self.cache.get(id_type) {
            if let Some(entry) = ids.iter().find(|entry| entry.value() == internal_id) {
                return Ok(Some(entry.key().clone()));
            }
        }

        match &self.backend {
            IdentityBackend::Simulated => Ok(None),
            IdentityBackend::Platform(facade) => {
                let external = facade.external_id(id_type, internal_id).await?;
                if let Some(external_id) = &external {
                    self.insert(id_type, external_id, internal_id);
                }
                Ok(external)
            }
        }
    }

    /// Record a known mapping.
    pub fn insert(&self, id_type: &str, external_id: &str, internal_id: &str) {
        self.cache
            .entry(id_type.to_string())
            .or_default()
            .insert(external_id.to_string(), internal_id.to_string());
    }

    /// Forget all cached ids and restart the simulated id sequence.
    pub fn reset(&self) {
        self.cache.clear();
        self.sequence.store(SIMULATED_ID_BASE, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.cache.iter().map(|ids| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, id_type: &str, external_id: &str) -> Option<String> {
        let ids = self.cache.get(id_type)?;
        let id = ids.get(external_id)?;
        Some(id.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FacadeResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingIdentity {
        detail_calls: AtomicUsize,
        conflict_on_create: bool,
    }

    #[async_trait]
    impl IdentityFacade for CountingIdentity {
        async fn detail(&self, _id_type: &str, external_id: &str) -> FacadeResult<Option<String>> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            Ok((external_id == "known" || self.conflict_on_create).then(|| "777".to_string()))
        }

        async fn create(&self, _t: &str, _e: &str, _mo: &Value) -> FacadeResult<String> {
            if self.conflict_on_create {
                Err(FacadeError::Conflict("exists".into()))
            } else {
                Ok("888".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_platform_lookup_is_cached() {
        let facade = Arc::new(CountingIdentity::default());
        let resolver = DeviceIdentityResolver::platform(facade.clone());

        assert_eq!(
            resolver.resolve("c8y_Serial", "known").await.unwrap(),
            IdentityLookup::Found("777".into())
        );
        assert_eq!(
            resolver.resolve("c8y_Serial", "known").await.unwrap(),
            IdentityLookup::Found("777".into())
        );
        assert_eq!(facade.detail_calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            resolver.resolve("c8y_Serial", "other").await.unwrap(),
            IdentityLookup::NotFound
        );
        assert_eq!(
            resolver.external_id("c8y_Serial", "777").await.unwrap(),
            Some("known".into())
        );
    }

    #[tokio::test]
    async fn test_conflict_retries_resolve_once() {
        let facade = Arc::new(CountingIdentity {
            conflict_on_create: true,
            ..Default::default()
        });
        let resolver = DeviceIdentityResolver::platform(facade.clone());
        let id = resolver
            .create_or_resolve("c8y_Serial", "abc", &json!({}))
            .await
            .unwrap();
        assert_eq!(id, "777");
        assert_eq!(facade.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_simulation_is_deterministic_after_reset() {
        let resolver = DeviceIdentityResolver::simulated();
        assert!(resolver.is_simulated());
        assert_eq!(
            resolver.resolve("c8y_Serial", "abc").await.unwrap(),
            IdentityLookup::NotFound
        );

        let first = resolver.create("c8y_Serial", "abc", &json!({})).await.unwrap();
        assert_eq!(
            resolver.resolve("c8y_Serial", "abc").await.unwrap(),
            IdentityLookup::Found(first.clone())
        );
        assert!(matches!(
            resolver.create("c8y_Serial", "abc", &json!({})).await,
            Err(IdentityError::Conflict { .. })
        ));

        resolver.reset();
        resolver.reset();
        assert!(resolver.is_empty());
        let again = resolver.create("c8y_Serial", "abc", &json!({})).await.unwrap();
        assert_eq!(first, again);
    }
}
