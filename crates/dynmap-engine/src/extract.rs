//! Extraction stage.
//!
//! Decodes the raw payload, makes the topic levels addressable and runs every
//! substitution's source expression, filling the context's substitution
//! cache and cardinality map.

use chrono::{SecondsFormat, Utc};
use dynmap_core::topic::split_topic_excluding_separator;
use dynmap_core::{
    is_truthy, Direction, ExpressionEvaluator, MappingType, RepairStrategy, TIME, TOKEN_TOPIC_LEVEL,
};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::context::{ProcessingContext, SubstituteValue, TypedValue};
use crate::error::{EngineError, Result};

/// Decode raw payload bytes according to the rule's mapping type.
pub fn deserialize_payload(mapping_type: MappingType, raw: &[u8]) -> Result<Value> {
    match mapping_type {
        MappingType::Json => serde_json::from_slice(raw)
            .map_err(|e| EngineError::Payload(format!("payload is not valid JSON: {}", e))),
        MappingType::FlatFile => {
            let text = std::str::from_utf8(raw)
                .map_err(|e| EngineError::Payload(format!("payload is not valid UTF-8: {}", e)))?;
            Ok(json!({ "message": text }))
        }
        MappingType::Hex => Ok(json!({ "message": format!("0x{}", hex::encode(raw)) })),
    }
}

/// Store the levels of `topic` under `_TOPIC_LEVEL_` so expressions can
/// address them positionally.
pub fn inject_topic_levels(document: &mut Value, topic: &str) {
    let levels = split_topic_excluding_separator(topic);
    match document.as_object_mut() {
        Some(object) => {
            object.insert(TOKEN_TOPIC_LEVEL.to_string(), json!(levels));
        }
        None => debug!("Payload is not an object, topic levels not injected"),
    }
}

/// Evaluate the rule's inbound filter. `true` means the payload passes.
pub fn passes_filter(ctx: &ProcessingContext, evaluator: &dyn ExpressionEvaluator) -> Result<bool> {
    let filter = match ctx.rule.filter_mapping.as_deref() {
        Some(f) if !f.trim().is_empty() => f,
        _ => return Ok(true),
    };
    let result = evaluator.evaluate(&ctx.payload, filter)?;
    let passes = is_truthy(result.as_ref());
    trace!("Filter '{}' evaluated to {:?}, passes: {}", filter, result, passes);
    Ok(passes)
}

/// Run all substitutions against the payload.
///
/// Expression errors are recorded in the context and the remaining
/// substitutions still run.
pub fn extract(
    ctx: &mut ProcessingContext,
    evaluator: &dyn ExpressionEvaluator,
    generate_time: bool,
) {
    let substitutions = ctx.rule.substitutions.clone();
    let mut time_mapped = false;

    for substitution in &substitutions {
        let path_target = substitution.path_target.as_str();
        let strategy = substitution.repair_strategy;
        if path_target == TIME {
            time_mapped = true;
        }

        let extracted = match evaluator.evaluate(&ctx.payload, &substitution.path_source) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "Substitution {} -> {} failed: {}",
                    substitution.path_source, path_target, e
                );
                ctx.errors.push(EngineError::from(e));
                continue;
            }
        };

        match extracted {
            None => {
                debug!(
                    "No value for {} in payload, entry ignored",
                    substitution.path_source
                );
                ctx.cache.push(path_target, SubstituteValue::ignore(strategy));
            }
            Some(Value::Array(items)) if substitution.expand_array => {
                let entry = ctx.cache.entry(path_target);
                for item in items {
                    match TypedValue::classify_element(item) {
                        Some(value) => entry.push(SubstituteValue::new(value, strategy)),
                        None => warn!(
                            "Skipping null or boolean element of {}",
                            substitution.path_source
                        ),
                    }
                }
                let count = entry.len();
                ctx.cardinality.insert(path_target.to_string(), count);
            }
            Some(value @ Value::Array(_)) => {
                ctx.cache
                    .push(path_target, SubstituteValue::new(TypedValue::Object(value), strategy));
                ctx.cardinality.insert(path_target.to_string(), 1);
            }
            Some(value) => {
                ctx.cache
                    .push(path_target, SubstituteValue::new(TypedValue::classify(value), strategy));
                ctx.cardinality.insert(path_target.to_string(), 1);
            }
        }
        trace!(
            "Evaluated substitution {} -> {}",
            substitution.path_source,
            path_target
        );
    }

    if generate_time
        && !time_mapped
        && ctx.rule.direction == Direction::Inbound
        && ctx.rule.target_api.is_meao()
    {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        ctx.cache
            .push(TIME, SubstituteValue::textual(now, RepairStrategy::Default));
        ctx.cardinality.insert(TIME.to_string(), 1);
    }
}
