//! Structural validation of topics and mapping rules.
//!
//! Validators are pure functions returning the set of violated constraints.
//! An empty set means the rule is valid. They run before a rule is saved or
//! activated and never during a mapping run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::mapping::{Direction, MappingRule};
use crate::topic::{
    normalize_topic, split_topic_excluding_separator, topic_matches, TOPIC_WILDCARD_MULTI,
    TOPIC_WILDCARD_SINGLE,
};

/// Set of violated constraints.
pub type ValidationErrors = BTreeSet<ValidationError>;

/// A violated structural constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationError {
    OnlyOneMultiLevelWildcard,
    OnlyOneSingleLevelWildcard,
    MultiLevelWildcardOnlyAtEnd,
    NoMultiLevelWildcardAllowedInMappingTopic,
    MappingTopicMustMatchTheSubscriptionTopic,
    TopicAndSampleDoNotHaveSameNumberOfLevels,
    TopicAndSampleDoNotHaveSameStructure,
    OneSubstitutionDefiningDeviceIdentifierMustBeUsed,
    OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed,
    FilterOutboundMustBeUnique,
    MappingTopicMustBeUnique,
    DisableSnoopingBeforeActivating,
    TargetTemplateIsNotValidJson,
}

impl ValidationError {
    /// Get error code for client handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OnlyOneMultiLevelWildcard => "ONLY_ONE_MULTI_LEVEL_WILDCARD",
            Self::OnlyOneSingleLevelWildcard => "ONLY_ONE_SINGLE_LEVEL_WILDCARD",
            Self::MultiLevelWildcardOnlyAtEnd => "MULTI_LEVEL_WILDCARD_ONLY_AT_END",
            Self::NoMultiLevelWildcardAllowedInMappingTopic => {
                "NO_MULTI_LEVEL_WILDCARD_ALLOWED_IN_MAPPING_TOPIC"
            }
            Self::MappingTopicMustMatchTheSubscriptionTopic => {
                "MAPPING_TOPIC_MUST_MATCH_THE_SUBSCRIPTION_TOPIC"
            }
            Self::TopicAndSampleDoNotHaveSameNumberOfLevels => {
                "TOPIC_AND_SAMPLE_DO_NOT_HAVE_SAME_NUMBER_OF_LEVELS"
            }
            Self::TopicAndSampleDoNotHaveSameStructure => {
                "TOPIC_AND_SAMPLE_DO_NOT_HAVE_SAME_STRUCTURE"
            }
            Self::OneSubstitutionDefiningDeviceIdentifierMustBeUsed => {
                "ONE_SUBSTITUTION_DEFINING_DEVICE_IDENTIFIER_MUST_BE_USED"
            }
            Self::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed => {
                "ONLY_ONE_SUBSTITUTION_DEFINING_DEVICE_IDENTIFIER_CAN_BE_USED"
            }
            Self::FilterOutboundMustBeUnique => "FILTER_OUTBOUND_MUST_BE_UNIQUE",
            Self::MappingTopicMustBeUnique => "MAPPING_TOPIC_MUST_BE_UNIQUE",
            Self::DisableSnoopingBeforeActivating => "DISABLE_SNOOPING_BEFORE_ACTIVATING",
            Self::TargetTemplateIsNotValidJson => "TARGET_TEMPLATE_IS_NOT_VALID_JSON",
        }
    }

    /// Human readable description.
    pub fn message(&self) -> &'static str {
        match self {
            Self::OnlyOneMultiLevelWildcard => "Only one multi level wildcard '#' is allowed",
            Self::OnlyOneSingleLevelWildcard => "Only one single level wildcard '+' is allowed",
            Self::MultiLevelWildcardOnlyAtEnd => {
                "The multi level wildcard '#' can only appear as the last level"
            }
            Self::NoMultiLevelWildcardAllowedInMappingTopic => {
                "No multi level wildcard '#' is allowed in the mapping topic"
            }
            Self::MappingTopicMustMatchTheSubscriptionTopic => {
                "The mapping topic must match the subscription topic"
            }
            Self::TopicAndSampleDoNotHaveSameNumberOfLevels => {
                "Topic and its sample do not have the same number of levels"
            }
            Self::TopicAndSampleDoNotHaveSameStructure => {
                "Topic and its sample do not have the same literal levels"
            }
            Self::OneSubstitutionDefiningDeviceIdentifierMustBeUsed => {
                "One substitution defining the device identifier must be used"
            }
            Self::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed => {
                "Only one substitution defining the device identifier can be used"
            }
            Self::FilterOutboundMustBeUnique => "The outbound filter must be unique",
            Self::MappingTopicMustBeUnique => {
                "The mapping topic overlaps the mapping topic of another rule"
            }
            Self::DisableSnoopingBeforeActivating => "Disable snooping before continuing",
            Self::TargetTemplateIsNotValidJson => "The target template is not valid JSON",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Wildcard constraints: at most one `#`, only as the last level, and at
/// most one `+`.
pub fn validate_topic(topic: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let topic = normalize_topic(topic);

    let count_multi = topic.matches(TOPIC_WILDCARD_MULTI).count();
    if count_multi > 1 {
        errors.insert(ValidationError::OnlyOneMultiLevelWildcard);
    }
    if topic.matches(TOPIC_WILDCARD_SINGLE).count() > 1 {
        errors.insert(ValidationError::OnlyOneSingleLevelWildcard);
    }
    if count_multi >= 1 {
        let levels = split_topic_excluding_separator(&topic);
        let last = levels.len().saturating_sub(1);
        let misplaced = levels.iter().enumerate().any(|(i, level)| {
            level.contains(TOPIC_WILDCARD_MULTI) && (i != last || level != TOPIC_WILDCARD_MULTI)
        });
        if misplaced {
            errors.insert(ValidationError::MultiLevelWildcardOnlyAtEnd);
        }
    }
    errors
}

/// A pattern and its sample must have the same level count and agree on
/// every literal (non-wildcard) level.
pub fn validate_topic_sample(topic: &str, sample: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if topic.trim().is_empty() || sample.trim().is_empty() {
        return errors;
    }

    let levels = split_topic_excluding_separator(topic);
    let sample_levels = split_topic_excluding_separator(sample);
    if levels.len() != sample_levels.len() {
        errors.insert(ValidationError::TopicAndSampleDoNotHaveSameNumberOfLevels);
        return errors;
    }

    let structure_differs = levels.iter().zip(&sample_levels).any(|(level, sample)| {
        level != TOPIC_WILDCARD_SINGLE && level != TOPIC_WILDCARD_MULTI && level != sample
    });
    if structure_differs {
        errors.insert(ValidationError::TopicAndSampleDoNotHaveSameStructure);
    }
    errors
}

/// Topic constraints of a rule for its direction.
pub fn validate_rule_topics(rule: &MappingRule) -> ValidationErrors {
    let mut errors = validate_topic(rule.template_topic());
    errors.extend(validate_topic_sample(
        rule.template_topic(),
        rule.template_topic_sample(),
    ));

    if rule.direction == Direction::Inbound {
        if rule.mapping_topic.contains(TOPIC_WILDCARD_MULTI) {
            errors.insert(ValidationError::NoMultiLevelWildcardAllowedInMappingTopic);
        }
        if let Some(subscription) = rule.subscription_topic.as_deref() {
            errors.extend(validate_topic(subscription));
            if !rule.mapping_topic.is_empty() && !topic_matches(subscription, &rule.mapping_topic) {
                errors.insert(ValidationError::MappingTopicMustMatchTheSubscriptionTopic);
            }
        }
    }
    errors
}

/// Identifier-substitution count: exactly one for inbound rules (zero when
/// `allow_no_defined_identifier` is set), any number for outbound rules.
pub fn validate_substitutions(rule: &MappingRule) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if rule.direction == Direction::Outbound {
        return errors;
    }
    match rule.count_device_identifiers() {
        0 if !rule.allow_no_defined_identifier => {
            errors.insert(ValidationError::OneSubstitutionDefiningDeviceIdentifierMustBeUsed);
        }
        n if n > 1 => {
            errors.insert(ValidationError::OnlyOneSubstitutionDefiningDeviceIdentifierCanBeUsed);
        }
        _ => {}
    }
    errors
}

/// Outbound filters must not repeat across outbound rules.
pub fn is_filter_outbound_unique(rule: &MappingRule, rules: &[MappingRule]) -> bool {
    rules
        .iter()
        .filter(|m| m.direction == Direction::Outbound && m.id != rule.id)
        .all(|m| m.filter_outbound != rule.filter_outbound)
}

/// Inbound mapping topics must not be prefixes of one another.
pub fn is_mapping_topic_unique(rule: &MappingRule, rules: &[MappingRule]) -> bool {
    rules
        .iter()
        .filter(|m| m.direction == Direction::Inbound && m.id != rule.id)
        .all(|m| {
            !rule.mapping_topic.starts_with(&m.mapping_topic)
                && !m.mapping_topic.starts_with(&rule.mapping_topic)
        })
}

/// Full validation of `rule` in the context of all stored `rules`.
pub fn validate_rule(rule: &MappingRule, rules: &[MappingRule]) -> ValidationErrors {
    let mut errors = validate_rule_topics(rule);
    errors.extend(validate_substitutions(rule));

    if rule.parse_target_template().is_err() {
        errors.insert(ValidationError::TargetTemplateIsNotValidJson);
    }

    match rule.direction {
        Direction::Outbound => {
            if rule.filter_outbound.is_some() && !is_filter_outbound_unique(rule, rules) {
                errors.insert(ValidationError::FilterOutboundMustBeUnique);
            }
        }
        Direction::Inbound => {
            if !rule.mapping_topic.is_empty() && !is_mapping_topic_unique(rule, rules) {
                errors.insert(ValidationError::MappingTopicMustBeUnique);
            }
        }
    }

    if rule.active && rule.snoop_status.is_snooping() {
        errors.insert(ValidationError::DisableSnoopingBeforeActivating);
    }
    errors
}
