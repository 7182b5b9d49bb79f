//! Core model of the dynamic mapper.
//!
//! This crate holds everything a mapping run needs that does no I/O:
//! - [`mapping`] - mapping rules and substitutions
//! - [`expression`] - path expression evaluation over JSON documents
//! - [`topic`] - topic canonicalization and tokenizing
//! - [`validation`] - structural rule validation
//! - [`snoop`] - payload capture lifecycle for rule authoring
//! - [`config`] - engine tunables

pub mod config;
pub mod error;
pub mod expression;
pub mod mapping;
pub mod snoop;
pub mod topic;
pub mod validation;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use expression::{is_truthy, ExpressionEvaluator, JsonPathEvaluator};
pub use mapping::{
    Direction, MappingRule, MappingType, Qos, RepairStrategy, SnoopStatus, Substitution,
    TargetApi, TIME, TOKEN_TOPIC_LEVEL,
};
pub use snoop::{SampleSource, SnoopSession};
pub use validation::{validate_rule, ValidationError, ValidationErrors};
