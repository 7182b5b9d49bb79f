//! Mapping rule model.
//!
//! A [`MappingRule`] describes how a payload received on (or published to) a
//! messaging topic is translated into a platform record. The rule is plain
//! data: it serializes to the same camelCase JSON shape the rule store keeps,
//! with enum values written as their SCREAMING_SNAKE names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic payload field holding the slash-separated levels of the topic.
pub const TOKEN_TOPIC_LEVEL: &str = "_TOPIC_LEVEL_";

/// Target path of the timestamp every MEAO record carries.
pub const TIME: &str = "time";

/// Direction a mapping rule translates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Topic payload to platform record.
    #[default]
    Inbound,
    /// Platform record to topic payload.
    Outbound,
}

/// Platform API a rule produces records for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetApi {
    Alarm,
    Event,
    #[default]
    Measurement,
    Inventory,
    Operation,
}

impl TargetApi {
    /// All target APIs.
    pub const ALL: [TargetApi; 5] = [
        TargetApi::Alarm,
        TargetApi::Event,
        TargetApi::Measurement,
        TargetApi::Inventory,
        TargetApi::Operation,
    ];

    /// Wire name of the API.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alarm => "ALARM",
            Self::Event => "EVENT",
            Self::Measurement => "MEASUREMENT",
            Self::Inventory => "INVENTORY",
            Self::Operation => "OPERATION",
        }
    }

    /// Path in the record that references the device.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Alarm | Self::Event | Self::Measurement => "source.id",
            Self::Inventory => "id",
            Self::Operation => "deviceId",
        }
    }

    /// Collection name used by platform notification subscriptions.
    pub fn notification_filter(&self) -> &'static str {
        match self {
            Self::Alarm => "alarms",
            Self::Event => "events",
            Self::Measurement => "measurements",
            Self::Inventory => "managedObjects",
            Self::Operation => "operations",
        }
    }

    /// True for the time-series record APIs (measurement, event, alarm, operation).
    pub fn is_meao(&self) -> bool {
        !matches!(self, Self::Inventory)
    }
}

impl std::fmt::Display for TargetApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Policy for populating a target path whose value is missing, null or
/// shorter than the run's cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStrategy {
    #[default]
    Default,
    UseFirstValueOfArray,
    UseLastValueOfArray,
    RemoveIfMissing,
    #[serde(alias = "REMOVE_IF_MISSING_OR_NULL")]
    RemoveIfNull,
    CreateIfMissing,
    Ignore,
}

/// Encoding of the inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    #[default]
    Json,
    /// Text payload, exposed to expressions as `message`.
    FlatFile,
    /// Binary payload, exposed to expressions as a `0x`-prefixed hex string.
    Hex,
}

/// Delivery guarantee for outbound publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn level(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Payload capture lifecycle of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnoopStatus {
    #[default]
    None,
    Enabled,
    Started,
    Stopped,
}

impl SnoopStatus {
    /// Capture is armed or running.
    pub fn is_snooping(&self) -> bool {
        matches!(self, Self::Enabled | Self::Started)
    }
}

/// One source path to target path translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    /// Expression evaluated against the source payload
    pub path_source: String,
    /// Path written in the target document
    pub path_target: String,
    #[serde(default)]
    pub repair_strategy: RepairStrategy,
    /// Fan an array result out into one output record per element
    #[serde(default)]
    pub expand_array: bool,
}

impl Substitution {
    pub fn new(path_source: impl Into<String>, path_target: impl Into<String>) -> Self {
        Self {
            path_source: path_source.into(),
            path_target: path_target.into(),
            repair_strategy: RepairStrategy::Default,
            expand_array: false,
        }
    }

    pub fn with_repair_strategy(mut self, strategy: RepairStrategy) -> Self {
        self.repair_strategy = strategy;
        self
    }

    pub fn expanded(mut self) -> Self {
        self.expand_array = true;
        self
    }
}

/// A complete mapping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(rename = "targetAPI", default)]
    pub target_api: TargetApi,
    #[serde(default)]
    pub mapping_type: MappingType,

    /// Topic pattern an inbound rule applies to (may contain `+`)
    #[serde(default)]
    pub mapping_topic: String,
    /// Concrete topic matching `mapping_topic`, used for authoring
    #[serde(default)]
    pub mapping_topic_sample: String,
    /// Broker subscription the inbound rule is served from (may contain `#`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_topic: Option<String>,
    /// Topic pattern an outbound rule publishes to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_topic_sample: Option<String>,

    /// Inbound expression that must be truthy for a payload to be processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_mapping: Option<String>,
    /// Outbound expression selecting the platform records this rule handles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_outbound: Option<String>,

    #[serde(default)]
    pub source_template: String,
    #[serde(default)]
    pub target_template: String,
    #[serde(default)]
    pub substitutions: Vec<Substitution>,

    #[serde(default)]
    pub use_external_id: bool,
    #[serde(default)]
    pub external_id_type: String,
    #[serde(default)]
    pub create_non_existing_device: bool,
    #[serde(default)]
    pub update_existing_device: bool,
    /// Permit an inbound rule without an identifier substitution
    #[serde(default)]
    pub allow_no_defined_identifier: bool,

    #[serde(default)]
    pub qos: Qos,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub snoop_status: SnoopStatus,
    #[serde(default)]
    pub snooped_templates: Vec<String>,
    #[serde(default)]
    pub last_update: i64,
}

impl MappingRule {
    /// Create an empty rule with a fresh id and `{}` templates.
    pub fn new(name: impl Into<String>, direction: Direction, target_api: TargetApi) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            direction,
            target_api,
            mapping_type: MappingType::Json,
            mapping_topic: String::new(),
            mapping_topic_sample: String::new(),
            subscription_topic: None,
            publish_topic: None,
            publish_topic_sample: None,
            filter_mapping: None,
            filter_outbound: None,
            source_template: "{}".to_string(),
            target_template: "{}".to_string(),
            substitutions: Vec::new(),
            use_external_id: false,
            external_id_type: String::new(),
            create_non_existing_device: false,
            update_existing_device: false,
            allow_no_defined_identifier: false,
            qos: Qos::AtLeastOnce,
            active: false,
            debug: false,
            snoop_status: SnoopStatus::None,
            snooped_templates: Vec::new(),
            last_update: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>, sample: impl Into<String>) -> Self {
        match self.direction {
            Direction::Inbound => {
                self.mapping_topic = topic.into();
                self.mapping_topic_sample = sample.into();
            }
            Direction::Outbound => {
                self.publish_topic = Some(topic.into());
                self.publish_topic_sample = Some(sample.into());
            }
        }
        self
    }

    pub fn with_templates(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_template = source.into();
        self.target_template = target.into();
        self
    }

    pub fn with_substitution(mut self, substitution: Substitution) -> Self {
        self.substitutions.push(substitution);
        self
    }

    /// Resolve device references through `external_id_type`.
    pub fn with_external_id(mut self, external_id_type: impl Into<String>) -> Self {
        self.use_external_id = true;
        self.external_id_type = external_id_type.into();
        self
    }

    pub fn creating_devices(mut self) -> Self {
        self.create_non_existing_device = true;
        self
    }

    /// Path of the device reference in the target API's records.
    pub fn identifier_path(&self) -> &'static str {
        self.target_api.identifier()
    }

    /// Whether `sub` supplies the device identifier for this rule.
    ///
    /// Inbound rules write the identifier into the record; outbound rules
    /// read it from the platform record.
    pub fn defines_device_identifier(&self, sub: &Substitution) -> bool {
        match self.direction {
            Direction::Inbound => sub.path_target == self.identifier_path(),
            Direction::Outbound => sub.path_source == self.identifier_path(),
        }
    }

    /// First substitution defining the device identifier.
    pub fn device_identifier(&self) -> Option<&Substitution> {
        self.substitutions
            .iter()
            .find(|s| self.defines_device_identifier(s))
    }

    pub fn count_device_identifiers(&self) -> usize {
        self.substitutions
            .iter()
            .filter(|s| self.defines_device_identifier(s))
            .count()
    }

    /// Topic pattern for the rule's direction.
    pub fn template_topic(&self) -> &str {
        match self.direction {
            Direction::Inbound => &self.mapping_topic,
            Direction::Outbound => self.publish_topic.as_deref().unwrap_or_default(),
        }
    }

    /// Concrete sample topic for the rule's direction.
    pub fn template_topic_sample(&self) -> &str {
        match self.direction {
            Direction::Inbound => &self.mapping_topic_sample,
            Direction::Outbound => self.publish_topic_sample.as_deref().unwrap_or_default(),
        }
    }

    /// Parse the target template into a fresh document.
    pub fn parse_target_template(&self) -> crate::Result<serde_json::Value> {
        let raw = if self.target_template.trim().is_empty() {
            "{}"
        } else {
            self.target_template.as_str()
        };
        serde_json::from_str(raw).map_err(|e| {
            crate::Error::InvalidMapping(format!(
                "target template of mapping '{}' is not valid JSON: {}",
                self.name, e
            ))
        })
    }
}
