//! Mapping engine entry point.
//!
//! [`MappingEngine::process`] runs one rule against one payload:
//!
//! 1. decode the payload and inject the topic levels
//! 2. apply the inbound filter
//! 3. extract substitution values
//! 4. plan the output records and repair short lists
//! 5. per record: resolve device identities, build the document and
//!    dispatch the request
//!
//! Records are processed with bounded concurrency and their requests are
//! appended to the log in record order. Nothing fails the whole run: errors
//! end up in the context's error list or on individual requests.

use std::sync::Arc;

use dynmap_core::topic::substitute_topic_levels;
use dynmap_core::{
    Direction, EngineConfig, ExpressionEvaluator, JsonPathEvaluator, MappingRule, TargetApi,
    TOKEN_TOPIC_LEVEL,
};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::context::{
    ProcessingContext, Request, RequestId, RequestMethod, SubstituteValue, NOT_DEFINED,
};
use crate::dispatch::{device_body, RequestOrchestrator};
use crate::document::delete_path;
use crate::error::EngineError;
use crate::extract::{deserialize_payload, extract, inject_topic_levels, passes_filter};
use crate::facade::Facades;
use crate::identity::{DeviceIdentityResolver, IdentityLookup};
use crate::substitute::{build_document, plan_records, Anchor, RecordValues};

/// Requests and errors produced for one output record.
#[derive(Debug, Default)]
struct RecordOutcome {
    requests: Vec<Request>,
    errors: Vec<EngineError>,
}

/// Identity state of one inbound record.
#[derive(Debug, Default)]
struct ResolvedDevice {
    /// Identifier value as extracted
    source: Option<String>,
    internal_id: Option<String>,
    /// Device creation request the record depends on
    predecessor: Option<RequestId>,
    /// Why the record must not be dispatched
    failure: Option<EngineError>,
}

/// Applies mapping rules to payloads.
pub struct MappingEngine {
    config: EngineConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    orchestrator: RequestOrchestrator,
    /// Resolver for real dispatch, backed by the platform
    identities: DeviceIdentityResolver,
    /// Resolver for dry runs
    simulation: DeviceIdentityResolver,
}

impl MappingEngine {
    pub fn new(facades: Facades) -> Self {
        Self {
            config: EngineConfig::default(),
            evaluator: Arc::new(JsonPathEvaluator::new()),
            identities: DeviceIdentityResolver::platform(facades.identity().clone()),
            simulation: DeviceIdentityResolver::simulated(),
            orchestrator: RequestOrchestrator::new(facades),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn identities(&self) -> &DeviceIdentityResolver {
        &self.identities
    }

    pub fn simulation(&self) -> &DeviceIdentityResolver {
        &self.simulation
    }

    /// Clear the dry-run identity cache. Call before each independent test run.
    pub fn reset_simulation(&self) {
        self.simulation.reset();
    }

    /// Run `rule` against raw payload bytes received on `topic`.
    ///
    /// With `send_payload` unset the run is a dry run: identities come from
    /// the in-memory simulation and no facade is called.
    pub async fn process(
        &self,
        rule: &MappingRule,
        raw: &[u8],
        topic: &str,
        send_payload: bool,
    ) -> ProcessingContext {
        match deserialize_payload(rule.mapping_type, raw) {
            Ok(payload) => self.process_value(rule, payload, topic, send_payload).await,
            Err(e) => {
                warn!("Mapping '{}': {}", rule.name, e);
                let mut ctx = ProcessingContext::new(rule.clone(), topic, send_payload);
                ctx.errors.push(e);
                ctx
            }
        }
    }

    /// Run `rule` against an already decoded payload.
    pub async fn process_value(
        &self,
        rule: &MappingRule,
        payload: Value,
        topic: &str,
        send_payload: bool,
    ) -> ProcessingContext {
        let mut ctx = ProcessingContext::new(rule.clone(), topic, send_payload);
        ctx.payload = payload;
        inject_topic_levels(&mut ctx.payload, topic);

        if rule.direction == Direction::Inbound {
            match passes_filter(&ctx, self.evaluator.as_ref()) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Mapping '{}': payload on {} filtered out", rule.name, topic);
                    ctx.filtered = true;
                    return ctx;
                }
                Err(e) => {
                    warn!("Mapping '{}': filter failed: {}", rule.name, e);
                    ctx.errors.push(e);
                    return ctx;
                }
            }
        }

        extract(&mut ctx, self.evaluator.as_ref(), self.config.generate_time);

        let template = match rule.parse_target_template() {
            Ok(t) => t,
            Err(e) => {
                warn!("Mapping '{}': {}", rule.name, e);
                ctx.errors.push(e.into());
                return ctx;
            }
        };

        let anchor = Anchor::for_rule(rule);
        let records = plan_records(rule, &ctx.cache, &anchor);
        let concurrency = if rule.create_non_existing_device {
            1
        } else {
            self.config.max_concurrent_dispatch.max(1)
        };

        let outcomes: Vec<RecordOutcome> = {
            let ctx = &ctx;
            let template = &template;
            let anchor = &anchor;
            stream::iter(records)
                .map(|record| self.process_record(ctx, template, anchor, record))
                .buffered(concurrency)
                .collect()
                .await
        };
        for outcome in outcomes {
            ctx.requests.extend(outcome.requests);
            ctx.errors.extend(outcome.errors);
        }

        let summary = ctx.summary();
        info!(
            "Mapping '{}' on {}: {} request(s), {} failed, {} error(s), send: {}",
            rule.name,
            topic,
            summary.requests,
            summary.failed_requests,
            summary.errors,
            send_payload
        );
        ctx
    }

    fn resolver(&self, send_payload: bool) -> &DeviceIdentityResolver {
        if send_payload {
            &self.identities
        } else {
            &self.simulation
        }
    }

    async fn process_record(
        &self,
        ctx: &ProcessingContext,
        template: &Value,
        anchor: &Anchor,
        record: RecordValues,
    ) -> RecordOutcome {
        match ctx.rule.direction {
            Direction::Inbound => self.inbound_record(ctx, template, anchor, record).await,
            Direction::Outbound => self.outbound_record(ctx, template, record).await,
        }
    }

    async fn inbound_record(
        &self,
        ctx: &ProcessingContext,
        template: &Value,
        anchor: &Anchor,
        mut record: RecordValues,
    ) -> RecordOutcome {
        let rule = &ctx.rule;
        let mut outcome = RecordOutcome::default();
        let id_path = anchor.identifier_path();

        let device = match id_path {
            Some(path) => self.resolve_device(ctx, &mut record, path, &mut outcome).await,
            None => ResolvedDevice::default(),
        };

        let (mut document, errors) = build_document(template, &record);
        outcome.errors.extend(errors);

        let external_id_type = rule.use_external_id.then(|| rule.external_id_type.clone());
        let is_update = rule.target_api == TargetApi::Inventory
            && rule.update_existing_device
            && device.internal_id.is_some();
        let method = if is_update {
            RequestMethod::Patch
        } else {
            RequestMethod::Post
        };
        if rule.target_api == TargetApi::Inventory && !is_update && rule.use_external_id {
            // the platform assigns the id of a new device
            if let Some(path) = id_path {
                delete_path(&mut document, path);
            }
        }

        let mut request = Request::new(ctx.next_request_id(), method, rule.target_api, document)
            .with_predecessor(device.predecessor)
            .with_source(device.source.clone(), external_id_type);

        if let Some(failure) = device.failure {
            request.error = Some(failure.to_string());
            outcome.errors.push(failure);
        } else if rule.target_api == TargetApi::Inventory
            && method == RequestMethod::Post
            && rule.use_external_id
        {
            self.create_inventory(ctx, &mut request, device.source.as_deref())
                .await;
        } else if ctx.send_payload {
            self.orchestrator.dispatch(&mut request, rule.qos).await;
        }

        outcome.requests.push(request);
        outcome
    }

    /// Resolve the record's device identifier, creating the device when
    /// allowed, and write the internal id into the record.
    async fn resolve_device(
        &self,
        ctx: &ProcessingContext,
        record: &mut RecordValues,
        id_path: &str,
        outcome: &mut RecordOutcome,
    ) -> ResolvedDevice {
        let rule = &ctx.rule;
        // placeholders from repair are never looked up or created
        let mut device = ResolvedDevice {
            source: record
                .get(id_path)
                .and_then(|v| v.value.as_text())
                .filter(|id| id != NOT_DEFINED),
            ..Default::default()
        };
        if !rule.use_external_id {
            device.internal_id = device.source.clone();
            return device;
        }

        let id_type = rule.external_id_type.as_str();
        let Some(external_id) = device.source.clone() else {
            if ctx.send_payload && rule.target_api != TargetApi::Inventory {
                device.failure = Some(EngineError::IdentifierUnresolved {
                    id_type: id_type.to_string(),
                    external_id: String::new(),
                });
            }
            return device;
        };

        let resolver = self.resolver(ctx.send_payload);
        match resolver.resolve(id_type, &external_id).await {
            Ok(IdentityLookup::Found(id)) => device.internal_id = Some(id),
            Ok(IdentityLookup::NotFound) if rule.target_api == TargetApi::Inventory => {}
            Ok(IdentityLookup::NotFound) if rule.create_non_existing_device => {
                let body = device_body(id_type, &external_id, &self.config.test_device_type);
                let mut create = Request::new(
                    ctx.next_request_id(),
                    RequestMethod::Post,
                    TargetApi::Inventory,
                    body,
                )
                .with_source(Some(external_id.clone()), Some(id_type.to_string()));
                create.device_creation = true;

                match resolver
                    .create_or_resolve(id_type, &external_id, &create.request)
                    .await
                {
                    Ok(id) => {
                        info!("Created device {} for {}/{}", id, id_type, external_id);
                        create.response = Some(json!({ "id": id }));
                        device.internal_id = Some(id);
                    }
                    Err(e) => {
                        warn!("Creating device {}/{} failed: {}", id_type, external_id, e);
                        create.error = Some(e.to_string());
                        device.failure = Some(e.into());
                    }
                }
                device.predecessor = Some(create.id);
                outcome.requests.push(create);
            }
            Ok(IdentityLookup::NotFound) if ctx.send_payload => {
                device.failure = Some(EngineError::IdentifierUnresolved {
                    id_type: id_type.to_string(),
                    external_id: external_id.clone(),
                });
            }
            Ok(IdentityLookup::NotFound) => {
                debug!(
                    "Dry run: external id {}/{} unknown, using it unchanged",
                    id_type, external_id
                );
            }
            Err(e) => {
                warn!("Resolving {}/{} failed: {}", id_type, external_id, e);
                device.failure = Some(e.into());
            }
        }

        if let (Some(id), Some(value)) = (&device.internal_id, record.get_mut(id_path)) {
            *value = SubstituteValue::textual(id.clone(), value.repair_strategy);
        }
        device
    }

    /// Create an inventory record through the identity registry so its
    /// external id is registered with it.
    async fn create_inventory(
        &self,
        ctx: &ProcessingContext,
        request: &mut Request,
        external_id: Option<&str>,
    ) {
        let Some(external_id) = external_id else {
            if ctx.send_payload {
                self.orchestrator.dispatch(request, ctx.rule.qos).await;
            }
            return;
        };
        let id_type = ctx.rule.external_id_type.as_str();
        let resolver = self.resolver(ctx.send_payload);
        match resolver
            .create_or_resolve(id_type, external_id, &request.request)
            .await
        {
            Ok(id) => request.response = Some(json!({ "id": id })),
            Err(e) => request.error = Some(e.to_string()),
        }
    }

    async fn outbound_record(
        &self,
        ctx: &ProcessingContext,
        template: &Value,
        mut record: RecordValues,
    ) -> RecordOutcome {
        let rule = &ctx.rule;
        let mut outcome = RecordOutcome::default();
        let publish_topic = rule.publish_topic.clone().unwrap_or_default();
        trace!(
            "Mapping '{}': {} notification to {}",
            rule.name,
            rule.target_api.notification_filter(),
            publish_topic
        );

        let identifier = rule.device_identifier().map(|s| s.path_target.clone());
        let source = identifier
            .as_deref()
            .and_then(|path| record.get(path))
            .and_then(|v| v.value.as_text());

        if let (true, Some(path), Some(internal_id)) =
            (rule.use_external_id, identifier.as_deref(), source.as_deref())
        {
            let resolver = self.resolver(ctx.send_payload);
            match resolver.external_id(&rule.external_id_type, internal_id).await {
                Ok(Some(external_id)) => {
                    if let Some(value) = record.get_mut(path) {
                        *value = SubstituteValue::textual(external_id, value.repair_strategy);
                    }
                }
                Ok(None) => debug!(
                    "No external id of type {} for {}, using it unchanged",
                    rule.external_id_type, internal_id
                ),
                Err(e) => outcome.errors.push(e.into()),
            }
        }

        let mut target = template.clone();
        inject_topic_levels(&mut target, &publish_topic);
        let (mut document, errors) = build_document(&target, &record);
        outcome.errors.extend(errors);

        let resolved_topic = match document.get(TOKEN_TOPIC_LEVEL).and_then(Value::as_array) {
            Some(levels) if !levels.is_empty() => {
                let levels: Vec<String> = levels
                    .iter()
                    .map(|l| match l {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                substitute_topic_levels(&publish_topic, &levels)
            }
            _ => publish_topic.clone(),
        };
        if let Some(object) = document.as_object_mut() {
            object.remove(TOKEN_TOPIC_LEVEL);
        }

        let external_id_type = rule.use_external_id.then(|| rule.external_id_type.clone());
        let mut request = Request::new(
            ctx.next_request_id(),
            RequestMethod::Post,
            rule.target_api,
            document,
        )
        .with_source(source, external_id_type);
        request.resolved_topic = Some(resolved_topic);
        if ctx.send_payload {
            self.orchestrator.dispatch(&mut request, rule.qos).await;
        }
        outcome.requests.push(request);
        outcome
    }
}

impl std::fmt::Debug for MappingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingEngine")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
