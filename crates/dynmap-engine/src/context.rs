//! Per-run state of a mapping run.
//!
//! A [`ProcessingContext`] is created for every payload a rule is applied to
//! and dropped afterwards. It owns the substitution cache filled by the
//! extraction stage, the cardinality of every target path, the request log
//! and the errors collected on the way.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use dynmap_core::{MappingRule, RepairStrategy, TargetApi};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};

use crate::error::EngineError;

/// Textual placeholder written when no value exists for an index.
pub const NOT_DEFINED: &str = "NOT_DEFINED";

/// Extracted value, classified by its JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypedValue {
    Number(Number),
    Textual(String),
    /// Objects, non-expanded arrays, booleans and `null`.
    Object(Value),
    /// Nested array taken from an expanded array.
    Array(Vec<Value>),
    /// The expression matched nothing.
    Ignore,
}

impl TypedValue {
    /// Classify a scalar or single expression result.
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Textual(s),
            other => Self::Object(other),
        }
    }

    /// Classify one element of an expanded array.
    ///
    /// Strings that read as numbers become numbers. `null` and booleans are
    /// not valid elements and yield `None`.
    pub fn classify_element(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Array(items)),
            Value::Null | Value::Bool(_) => None,
            Value::String(s) => Some(match parse_number(&s) {
                Some(n) => Self::Number(n),
                None => Self::Textual(s),
            }),
            other => Some(Self::classify(other)),
        }
    }

    /// JSON form written into target documents. `Ignore` becomes `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::Textual(s) => Value::String(s.clone()),
            Self::Object(v) => v.clone(),
            Self::Array(items) => Value::Array(items.clone()),
            Self::Ignore => Value::Null,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Ignore)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Object(Value::Null))
    }

    /// Text form used as an external id.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Textual(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Ignore | Self::Object(Value::Null) => None,
            Self::Object(v) => Some(v.to_string()),
            Self::Array(items) => Some(Value::Array(items.clone()).to_string()),
        }
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(Number::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

/// A cached value together with the repair strategy of the substitution
/// that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstituteValue {
    #[serde(flatten)]
    pub value: TypedValue,
    pub repair_strategy: RepairStrategy,
}

impl SubstituteValue {
    pub fn new(value: TypedValue, repair_strategy: RepairStrategy) -> Self {
        Self {
            value,
            repair_strategy,
        }
    }

    pub fn ignore(repair_strategy: RepairStrategy) -> Self {
        Self::new(TypedValue::Ignore, repair_strategy)
    }

    pub fn textual(text: impl Into<String>, repair_strategy: RepairStrategy) -> Self {
        Self::new(TypedValue::Textual(text.into()), repair_strategy)
    }

    pub fn not_defined(repair_strategy: RepairStrategy) -> Self {
        Self::textual(NOT_DEFINED, repair_strategy)
    }
}

/// Target path to extracted values, in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionCache {
    entries: Vec<(String, Vec<SubstituteValue>)>,
}

impl SubstitutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values list for `path_target`, created empty on first use.
    pub fn entry(&mut self, path_target: &str) -> &mut Vec<SubstituteValue> {
        let pos = match self.entries.iter().position(|(p, _)| p == path_target) {
            Some(pos) => pos,
            None => {
                self.entries.push((path_target.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    pub fn push(&mut self, path_target: &str, value: SubstituteValue) {
        self.entry(path_target).push(value);
    }

    pub fn get(&self, path_target: &str) -> Option<&[SubstituteValue]> {
        self.entries
            .iter()
            .find(|(p, _)| p == path_target)
            .map(|(_, values)| values.as_slice())
    }

    pub fn contains(&self, path_target: &str) -> bool {
        self.get(path_target).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SubstituteValue])> {
        self.entries
            .iter()
            .map(|(p, values)| (p.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the longest values list.
    pub fn max_len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
    }
}

impl Serialize for SubstitutionCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, values) in &self.entries {
            map.serialize_entry(path, values)?;
        }
        map.end()
    }
}

/// Identifier of a request within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out request ids at creation time.
#[derive(Debug, Default)]
pub struct RequestIdAllocator(AtomicU32);

impl RequestIdAllocator {
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Post,
    Patch,
}

/// One create, update or publish request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    /// Request whose result this one depends on. `None` for a root request.
    pub predecessor: Option<RequestId>,
    pub method: RequestMethod,
    #[serde(rename = "targetAPI")]
    pub target_api: TargetApi,
    /// Device reference as extracted from the payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_type: Option<String>,
    /// Publish topic with substituted levels (outbound only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_topic: Option<String>,
    /// Creates the device a later request refers to
    pub device_creation: bool,
    pub request: Value,
    pub response: Option<Value>,
    pub error: Option<String>,
}

impl Request {
    pub fn new(id: RequestId, method: RequestMethod, target_api: TargetApi, body: Value) -> Self {
        Self {
            id,
            predecessor: None,
            method,
            target_api,
            source: None,
            external_id_type: None,
            resolved_topic: None,
            device_creation: false,
            request: body,
            response: None,
            error: None,
        }
    }

    pub fn with_predecessor(mut self, predecessor: Option<RequestId>) -> Self {
        self.predecessor = predecessor;
        self
    }

    pub fn with_source(mut self, source: Option<String>, external_id_type: Option<String>) -> Self {
        self.source = source;
        self.external_id_type = external_id_type;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Id assigned by the backend, if the response carries one.
    pub fn response_id(&self) -> Option<&str> {
        self.response.as_ref()?.get("id")?.as_str()
    }
}

/// How devices and values relate in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingType {
    OneDeviceOneValue,
    OneDeviceMultipleValue,
    MultipleDeviceOneValue,
    MultipleDeviceMultipleValue,
    Undefined,
}

/// Counts describing a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub requests: usize,
    pub failed_requests: usize,
    pub errors: usize,
    pub created_devices: usize,
    pub filtered: bool,
}

/// State of one mapping run.
#[derive(Debug)]
pub struct ProcessingContext {
    pub rule: MappingRule,
    pub topic: String,
    /// Deserialized source payload, including the injected topic levels
    pub payload: Value,
    pub cache: SubstitutionCache,
    pub cardinality: BTreeMap<String, usize>,
    pub requests: Vec<Request>,
    pub errors: Vec<EngineError>,
    /// Dispatch to the real facades rather than evaluate only
    pub send_payload: bool,
    /// The inbound filter rejected the payload
    pub filtered: bool,
    request_ids: RequestIdAllocator,
}

impl ProcessingContext {
    pub fn new(rule: MappingRule, topic: impl Into<String>, send_payload: bool) -> Self {
        Self {
            rule,
            topic: topic.into(),
            payload: Value::Null,
            cache: SubstitutionCache::new(),
            cardinality: BTreeMap::new(),
            requests: Vec::new(),
            errors: Vec::new(),
            send_payload,
            filtered: false,
            request_ids: RequestIdAllocator::default(),
        }
    }

    /// Allocate the next request id.
    pub fn next_request_id(&self) -> RequestId {
        self.request_ids.next()
    }

    pub fn failed_requests(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter().filter(|r| r.is_failed())
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.requests.iter().any(Request::is_failed)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            requests: self.requests.len(),
            failed_requests: self.failed_requests().count(),
            errors: self.errors.len(),
            created_devices: self.requests.iter().filter(|r| r.device_creation).count(),
            filtered: self.filtered,
        }
    }

    /// Classify the run from the cardinality of the identifier path and
    /// the largest cardinality of the other paths.
    pub fn processing_type(&self) -> ProcessingType {
        let identifier = match self.rule.device_identifier() {
            Some(sub) => sub.path_target.as_str(),
            None => return ProcessingType::Undefined,
        };
        let devices = match self.cardinality.get(identifier) {
            Some(n) => *n,
            None => return ProcessingType::Undefined,
        };
        let values = self
            .cardinality
            .iter()
            .filter(|(path, _)| path.as_str() != identifier)
            .map(|(_, n)| *n)
            .max()
            .unwrap_or(1);

        match (devices > 1, values > 1) {
            (false, false) => ProcessingType::OneDeviceOneValue,
            (false, true) => ProcessingType::OneDeviceMultipleValue,
            (true, false) => ProcessingType::MultipleDeviceOneValue,
            (true, true) => ProcessingType::MultipleDeviceMultipleValue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynmap_core::{Direction, Substitution};
    use serde_json::json;

    #[test]
    fn test_classify() {
        assert_eq!(
            TypedValue::classify(json!(21.5)),
            TypedValue::Number(Number::from_f64(21.5).unwrap())
        );
        assert_eq!(TypedValue::classify(json!("x")), TypedValue::Textual("x".into()));
        assert_eq!(TypedValue::classify(json!(null)), TypedValue::Object(Value::Null));
        assert_eq!(TypedValue::classify(json!([1])), TypedValue::Object(json!([1])));
        assert_eq!(
            TypedValue::classify_element(json!([1])),
            Some(TypedValue::Array(vec![json!(1)]))
        );
        assert!(TypedValue::classify(json!(null)).is_null());
        assert_eq!(TypedValue::Number(Number::from(42)).as_text().as_deref(), Some("42"));
        assert_eq!(TypedValue::Ignore.as_text(), None);
    }

    #[test]
    fn test_classify_array_elements() {
        assert_eq!(
            TypedValue::classify_element(json!("21.5")),
            Some(TypedValue::Number(Number::from_f64(21.5).unwrap()))
        );
        assert_eq!(
            TypedValue::classify_element(json!(" 22 ")),
            Some(TypedValue::Number(Number::from(22)))
        );
        assert_eq!(
            TypedValue::classify_element(json!("abc")),
            Some(TypedValue::Textual("abc".into()))
        );
        assert_eq!(
            TypedValue::classify_element(json!("  ")),
            Some(TypedValue::Textual("  ".into()))
        );
        assert_eq!(
            TypedValue::classify_element(json!("NaN")),
            Some(TypedValue::Textual("NaN".into()))
        );
        assert_eq!(TypedValue::classify_element(json!(null)), None);
        assert_eq!(TypedValue::classify_element(json!(true)), None);
        // scalars keep their string type
        assert_eq!(TypedValue::classify(json!("21.5")), TypedValue::Textual("21.5".into()));
    }

    #[test]
    fn test_cache_keeps_insertion_order() {
        let mut cache = SubstitutionCache::new();
        cache.push("b", SubstituteValue::textual("1", RepairStrategy::Default));
        cache.push("a", SubstituteValue::textual("2", RepairStrategy::Default));
        cache.push("b", SubstituteValue::textual("3", RepairStrategy::Default));
        let keys: Vec<_> = cache.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(cache.max_len(), 2);
        assert_eq!(
            serde_json::to_value(&cache).unwrap()["b"][1],
            json!({"type": "TEXTUAL", "value": "3", "repairStrategy": "DEFAULT"})
        );
    }

    #[test]
    fn test_request_ids_are_unique() {
        let ctx = ProcessingContext::new(
            MappingRule::new("m", Direction::Inbound, TargetApi::Event),
            "t",
            false,
        );
        let a = ctx.next_request_id();
        let b = ctx.next_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_processing_type() {
        let rule = MappingRule::new("m", Direction::Inbound, TargetApi::Measurement)
            .with_substitution(Substitution::new("id", "source.id"))
            .with_substitution(Substitution::new("t", "c8y_T.T.value"));
        let mut ctx = ProcessingContext::new(rule, "t", false);
        assert_eq!(ctx.processing_type(), ProcessingType::Undefined);

        ctx.cardinality.insert("source.id".into(), 1);
        ctx.cardinality.insert("c8y_T.T.value".into(), 3);
        assert_eq!(ctx.processing_type(), ProcessingType::OneDeviceMultipleValue);

        ctx.cardinality.insert("source.id".into(), 3);
        assert_eq!(ctx.processing_type(), ProcessingType::MultipleDeviceMultipleValue);
    }

    #[test]
    fn test_summary_counts() {
        let mut ctx = ProcessingContext::new(
            MappingRule::new("m", Direction::Inbound, TargetApi::Event),
            "t",
            true,
        );
        let create_id = ctx.next_request_id();
        let mut create =
            Request::new(create_id, RequestMethod::Post, TargetApi::Inventory, json!({}));
        create.device_creation = true;
        let main_id = ctx.next_request_id();
        let mut main = Request::new(main_id, RequestMethod::Post, TargetApi::Event, json!({}))
            .with_predecessor(Some(create.id));
        main.error = Some("down".into());
        ctx.requests.push(create);
        ctx.requests.push(main);

        let summary = ctx.summary();
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.created_devices, 1);
        assert!(ctx.has_errors());
    }
}
