//! Cardinality resolution and repair.
//!
//! Turns the substitution cache into one value set per output record and
//! writes those values into copies of the target template.
//!
//! The number of records depends on the run's [`Anchor`]:
//! - inbound runs are anchored on the device identifier path and produce as
//!   many records as the longest cached list. A shorter identifier list is
//!   padded with its first entry, so one device with many values and many
//!   devices with one value go through the same loop.
//! - outbound runs are anchored on the publish topic and always produce a
//!   single record built from the first value of every list.

use dynmap_core::{Direction, MappingRule, RepairStrategy};
use serde_json::Value;
use tracing::{trace, warn};

use crate::context::{SubstituteValue, SubstitutionCache};
use crate::document::{delete_path, is_nested, merge_into_root, set_path};
use crate::error::EngineError;

/// Target path meaning "the whole document".
pub const ROOT_PATH: &str = "$";

/// What decides the number of output records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// One record per entry of the longest list, identifier padded.
    DeviceIdentifier(String),
    /// Exactly one record.
    Topic,
}

impl Anchor {
    pub fn for_rule(rule: &MappingRule) -> Self {
        match rule.direction {
            Direction::Inbound => Self::DeviceIdentifier(
                rule.device_identifier()
                    .map(|s| s.path_target.clone())
                    .unwrap_or_else(|| rule.identifier_path().to_string()),
            ),
            Direction::Outbound => Self::Topic,
        }
    }

    /// Identifier path for device-anchored runs.
    pub fn identifier_path(&self) -> Option<&str> {
        match self {
            Self::DeviceIdentifier(path) => Some(path),
            Self::Topic => None,
        }
    }
}

/// Values for one output record, in cache order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValues {
    pub index: usize,
    pub values: Vec<(String, SubstituteValue)>,
}

impl RecordValues {
    pub fn get(&self, path_target: &str) -> Option<&SubstituteValue> {
        self.values
            .iter()
            .find(|(p, _)| p == path_target)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, path_target: &str) -> Option<&mut SubstituteValue> {
        self.values
            .iter_mut()
            .find(|(p, _)| p == path_target)
            .map(|(_, v)| v)
    }
}

/// Number of output records for the cache under `anchor`.
///
/// An identifier that was extracted as an empty list means there is no
/// device to write for, so no records are produced.
pub fn record_count(cache: &SubstitutionCache, anchor: &Anchor) -> usize {
    match anchor {
        Anchor::Topic => 1,
        Anchor::DeviceIdentifier(path) if cache.get(path).is_some_and(<[_]>::is_empty) => 0,
        Anchor::DeviceIdentifier(_) if cache.is_empty() => 1,
        Anchor::DeviceIdentifier(_) => cache.max_len(),
    }
}

/// Select the value of every cached path for every output record.
pub fn plan_records(
    rule: &MappingRule,
    cache: &SubstitutionCache,
    anchor: &Anchor,
) -> Vec<RecordValues> {
    let count = record_count(cache, anchor);
    trace!("Mapping '{}' produces {} record(s)", rule.name, count);

    (0..count)
        .map(|index| {
            let values = cache
                .iter()
                .map(|(path, entries)| {
                    let strategy = strategy_for(rule, path, entries);
                    let value = match anchor {
                        Anchor::Topic => select_value(path, entries, 0, strategy),
                        // padding: the identifier repeats its first entry
                        Anchor::DeviceIdentifier(id_path)
                            if id_path == path && index >= entries.len() =>
                        {
                            select_value(path, entries, 0, RepairStrategy::UseFirstValueOfArray)
                        }
                        Anchor::DeviceIdentifier(_) => select_value(path, entries, index, strategy),
                    };
                    (path.to_string(), value)
                })
                .collect();
            RecordValues { index, values }
        })
        .collect()
}

fn strategy_for(rule: &MappingRule, path: &str, entries: &[SubstituteValue]) -> RepairStrategy {
    entries
        .first()
        .map(|e| e.repair_strategy)
        .or_else(|| {
            rule.substitutions
                .iter()
                .find(|s| s.path_target == path)
                .map(|s| s.repair_strategy)
        })
        .unwrap_or_default()
}

/// Value of `entries` at `index`, repaired with `strategy` when the list is
/// too short.
pub fn select_value(
    path: &str,
    entries: &[SubstituteValue],
    index: usize,
    strategy: RepairStrategy,
) -> SubstituteValue {
    if let Some(value) = entries.get(index) {
        return value.clone();
    }

    let repaired = match strategy {
        RepairStrategy::Default | RepairStrategy::UseFirstValueOfArray => entries.first().cloned(),
        RepairStrategy::UseLastValueOfArray => entries.last().cloned(),
        RepairStrategy::RemoveIfMissing | RepairStrategy::RemoveIfNull | RepairStrategy::Ignore => {
            Some(SubstituteValue::ignore(strategy))
        }
        RepairStrategy::CreateIfMissing => None,
    };
    warn!(
        "During the processing of pathTarget {} the repair strategy {:?} was used",
        path, strategy
    );
    repaired.unwrap_or_else(|| SubstituteValue::not_defined(strategy))
}

/// Write one value into `document` at `path_target`, honoring its repair
/// strategy. On error the document is left unchanged.
pub fn substitute_value(
    document: &mut Value,
    path_target: &str,
    value: &SubstituteValue,
) -> Result<(), EngineError> {
    let missing = value.value.is_missing();

    if path_target.trim() == ROOT_PATH {
        if missing {
            return Ok(());
        }
        return merge_into_root(document, &value.value.to_json())
            .map_err(|e| EngineError::substitution(path_target, e));
    }

    match value.repair_strategy {
        RepairStrategy::RemoveIfMissing if missing => {
            delete_path(document, path_target);
            Ok(())
        }
        RepairStrategy::RemoveIfNull if missing || value.value.is_null() => {
            delete_path(document, path_target);
            Ok(())
        }
        RepairStrategy::Ignore if missing => Ok(()),
        RepairStrategy::CreateIfMissing if is_nested(path_target) => Err(EngineError::substitution(
            path_target,
            "can only create new nodes on the root level",
        )),
        _ => set_path(document, path_target, value.value.to_json())
            .map_err(|e| EngineError::substitution(path_target, e)),
    }
}

/// Build a record from `template` and the record's values.
///
/// Returns the document and the errors of values that could not be
/// written; those values are skipped.
pub fn build_document(template: &Value, record: &RecordValues) -> (Value, Vec<EngineError>) {
    let mut document = template.clone();
    let mut errors = Vec::new();
    for (path, value) in &record.values {
        if let Err(e) = substitute_value(&mut document, path, value) {
            warn!("Record {}: {}", record.index, e);
            errors.push(e);
        }
    }
    (document, errors)
}
