//! Request orchestrator.
//!
//! Delivers requests to the facade matching their target API and records
//! the outcome on the request itself. Requests are independent: a failed
//! request never cancels or rolls back another one.

use dynmap_core::{Qos, TargetApi};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::{Request, RequestMethod};
use crate::error::{FacadeError, FacadeResult};
use crate::facade::Facades;

/// Body of a device created on demand for an unknown external id.
pub fn device_body(external_id_type: &str, external_id: &str, device_type: &str) -> Value {
    let mut body = Map::new();
    body.insert(
        "name".to_string(),
        Value::String(format!("device_{}_{}", external_id_type, external_id)),
    );
    body.insert("c8y_IsDevice".to_string(), Value::Object(Map::new()));
    body.insert(device_type.to_string(), Value::Object(Map::new()));
    body.insert("type".to_string(), Value::String(device_type.to_string()));
    Value::Object(body)
}

/// Routes requests to facades.
#[derive(Debug, Clone)]
pub struct RequestOrchestrator {
    facades: Facades,
}

impl RequestOrchestrator {
    pub fn new(facades: Facades) -> Self {
        Self { facades }
    }

    pub fn facades(&self) -> &Facades {
        &self.facades
    }

    /// Send `request` and store its response or error on it.
    pub async fn dispatch(&self, request: &mut Request, qos: Qos) {
        match self.send(request, qos).await {
            Ok(response) => {
                debug!(
                    "Request {} {:?} {} delivered",
                    request.id, request.method, request.target_api
                );
                request.response = response;
            }
            Err(e) => {
                warn!(
                    "Request {} {:?} {} failed: {}",
                    request.id, request.method, request.target_api, e
                );
                request.error = Some(e.to_string());
            }
        }
    }

    async fn send(&self, request: &Request, qos: Qos) -> FacadeResult<Option<Value>> {
        if let Some(topic) = &request.resolved_topic {
            self.facades
                .publisher()?
                .publish(topic, &request.request, qos)
                .await?;
            return Ok(None);
        }

        let facade = self.facades.api(request.target_api)?;
        match request.method {
            RequestMethod::Post => facade.create(&request.request).await.map(Some),
            RequestMethod::Patch => {
                if request.target_api != TargetApi::Inventory {
                    return Err(FacadeError::Unsupported(format!(
                        "update of {} records",
                        request.target_api
                    )));
                }
                let id = request
                    .request
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FacadeError::Rejected("update without id".to_string()))?;
                facade.update(id, &request.request).await.map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestId;
    use crate::facade::{ApiFacade, MessagePublisher, NoIdentity};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ApiFacade for Recorder {
        async fn create(&self, _body: &Value) -> FacadeResult<Value> {
            self.calls.lock().unwrap().push("create".into());
            if self.fail {
                return Err(FacadeError::Transport("connection refused".into()));
            }
            Ok(json!({"id": "42"}))
        }

        async fn update(&self, id: &str, _body: &Value) -> FacadeResult<Value> {
            self.calls.lock().unwrap().push(format!("update {}", id));
            Ok(json!({"id": id}))
        }
    }

    #[async_trait]
    impl MessagePublisher for Recorder {
        async fn publish(&self, topic: &str, _payload: &Value, qos: Qos) -> FacadeResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("publish {} {}", topic, qos.level()));
            Ok(())
        }
    }

    #[test]
    fn test_device_body() {
        assert_eq!(
            device_body("c8y_Serial", "abc123", "d11r_testDevice"),
            json!({
                "name": "device_c8y_Serial_abc123",
                "c8y_IsDevice": {},
                "d11r_testDevice": {},
                "type": "d11r_testDevice"
            })
        );
    }

    #[tokio::test]
    async fn test_dispatch_records_outcome() {
        let ok = Arc::new(Recorder::default());
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let orchestrator = RequestOrchestrator::new(
            Facades::new(Arc::new(NoIdentity))
                .with_api(TargetApi::Measurement, ok.clone())
                .with_api(TargetApi::Event, failing.clone())
                .with_api(TargetApi::Inventory, ok.clone())
                .with_publisher(ok.clone()),
        );

        let mut measurement =
            Request::new(RequestId(0), RequestMethod::Post, TargetApi::Measurement, json!({}));
        orchestrator.dispatch(&mut measurement, Qos::AtLeastOnce).await;
        assert_eq!(measurement.response_id(), Some("42"));

        let mut event =
            Request::new(RequestId(1), RequestMethod::Post, TargetApi::Event, json!({}));
        orchestrator.dispatch(&mut event, Qos::AtLeastOnce).await;
        assert!(event.is_failed());

        let mut alarm =
            Request::new(RequestId(2), RequestMethod::Post, TargetApi::Alarm, json!({}));
        orchestrator.dispatch(&mut alarm, Qos::AtLeastOnce).await;
        assert!(alarm.error.as_deref().unwrap().contains("no facade"));

        let mut update = Request::new(
            RequestId(3),
            RequestMethod::Patch,
            TargetApi::Inventory,
            json!({"id": "9"}),
        );
        orchestrator.dispatch(&mut update, Qos::AtLeastOnce).await;
        assert_eq!(update.response_id(), Some("9"));

        let mut publish =
            Request::new(RequestId(4), RequestMethod::Post, TargetApi::Event, json!({}));
        publish.resolved_topic = Some("evt/d1".into());
        orchestrator.dispatch(&mut publish, Qos::ExactlyOnce).await;
        assert!(!publish.is_failed());

        assert_eq!(
            *ok.calls.lock().unwrap(),
            vec!["create", "update 9", "publish evt/d1 2"]
        );
    }
}
