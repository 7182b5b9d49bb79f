//! Recording platform double shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dynmap_core::{Direction, MappingRule, Qos, Substitution, TargetApi};
use dynmap_engine::{
    ApiFacade, FacadeError, FacadeResult, Facades, IdentityFacade, MappingEngine,
    MessagePublisher,
};
use serde_json::{json, Value};

/// In-memory platform that records every call.
#[derive(Default)]
pub struct RecordingPlatform {
    pub created: Mutex<Vec<Value>>,
    pub updated: Mutex<Vec<(String, Value)>>,
    pub devices: Mutex<Vec<Value>>,
    pub published: Mutex<Vec<(String, Value, Qos)>>,
    pub detail_calls: AtomicUsize,
    identities: Mutex<HashMap<(String, String), String>>,
    next_id: AtomicU64,
    /// Reject records whose `source.id` equals this value
    pub reject_source: Mutex<Option<String>>,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(500),
            ..Default::default()
        })
    }

    pub fn register(&self, id_type: &str, external_id: &str, internal_id: &str) {
        self.identities.lock().unwrap().insert(
            (id_type.to_string(), external_id.to_string()),
            internal_id.to_string(),
        );
    }

    pub fn created(&self) -> Vec<Value> {
        self.created.lock().unwrap().clone()
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl ApiFacade for RecordingPlatform {
    async fn create(&self, body: &Value) -> FacadeResult<Value> {
        let rejected = self.reject_source.lock().unwrap().clone();
        if let Some(rejected) = rejected {
            if body.pointer("/source/id").and_then(Value::as_str) == Some(rejected.as_str()) {
                return Err(FacadeError::Rejected(format!("source {} rejected", rejected)));
            }
        }
        self.created.lock().unwrap().push(body.clone());
        Ok(json!({ "id": self.next_id() }))
    }

    async fn update(&self, id: &str, body: &Value) -> FacadeResult<Value> {
        self.updated
            .lock()
            .unwrap()
            .push((id.to_string(), body.clone()));
        Ok(json!({ "id": id }))
    }
}

#[async_trait]
impl IdentityFacade for RecordingPlatform {
    async fn detail(&self, id_type: &str, external_id: &str) -> FacadeResult<Option<String>> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(&(id_type.to_string(), external_id.to_string()))
            .cloned())
    }

    async fn create(
        &self,
        id_type: &str,
        external_id: &str,
        managed_object: &Value,
    ) -> FacadeResult<String> {
        let id = self.next_id();
        self.devices.lock().unwrap().push(managed_object.clone());
        self.register(id_type, external_id, &id);
        Ok(id)
    }

    async fn external_id(&self, id_type: &str, internal_id: &str) -> FacadeResult<Option<String>> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .iter()
            .find(|((t, _), id)| t == id_type && id.as_str() == internal_id)
            .map(|((_, external), _)| external.clone()))
    }
}

#[async_trait]
impl MessagePublisher for RecordingPlatform {
    async fn publish(&self, topic: &str, payload: &Value, qos: Qos) -> FacadeResult<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone(), qos));
        Ok(())
    }
}

pub fn engine(platform: &Arc<RecordingPlatform>) -> MappingEngine {
    MappingEngine::new(
        Facades::new(platform.clone())
            .with_all_apis(platform.clone())
            .with_publisher(platform.clone()),
    )
}

/// Temperature measurement rule keyed by the second topic level.
pub fn temperature_rule() -> MappingRule {
    MappingRule::new("temperature", Direction::Inbound, TargetApi::Measurement)
        .with_topic("measurement/+", "measurement/berlin_01")
        .with_templates(
            r#"{"temp": 21.5}"#,
            r#"{"c8y_TemperatureMeasurement": {"T": {"value": 0, "unit": "C"}}, "source": {"id": "0"}, "type": "c8y_TemperatureMeasurement"}"#,
        )
        .with_substitution(Substitution::new("_TOPIC_LEVEL_[1]", "source.id"))
        .with_substitution(Substitution::new("temp", "c8y_TemperatureMeasurement.T.value"))
}
