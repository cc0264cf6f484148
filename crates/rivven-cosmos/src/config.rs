//! Configuration for the change-feed source connector
//!
//! ```yaml
//! endpoint: https://my-account.documents.azure.com:443/
//! key: ${COSMOS_KEY}
//! connector_name: orders-feed
//! database: shop
//! containers:
//!   include: [orders, customers]
//!   topic_map: ["orders-topic#orders"]
//! start_from: beginning
//! max_item_count_hint: 500
//! message_key:
//!   enabled: true
//!   field: id
//! metadata:
//!   topic: _cosmos.metadata.topic
//!   poll_delay_ms: 300000
//! tasks_max: 4
//! ```

use crate::error::{CosmosError, Result};
use crate::types::SensitiveString;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Change-feed source connector configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct CosmosSourceConfig {
    /// Account endpoint
    #[validate(url)]
    pub endpoint: String,

    /// Account key
    pub key: SensitiveString,

    /// Logical connector name; versions the persisted inventory snapshot so
    /// several connectors can share one checkpoint store
    #[validate(length(min = 1, max = 249))]
    pub connector_name: String,

    /// Database to read from
    #[validate(length(min = 1))]
    pub database: String,

    /// Container selection and topic routing
    #[serde(default)]
    #[validate(nested)]
    pub containers: ContainersConfig,

    /// Where ranges without a stored checkpoint start reading
    #[serde(default)]
    pub start_from: StartPosition,

    /// Change-feed mode passed through to the reader
    #[serde(default)]
    pub change_feed_mode: ChangeFeedMode,

    /// Upper bound on items requested per page read
    #[serde(default = "default_max_item_count_hint")]
    #[validate(range(min = 1, max = 10000))]
    pub max_item_count_hint: u32,

    /// Record key derivation
    #[serde(default)]
    #[validate(nested)]
    pub message_key: MessageKeyConfig,

    /// Item property holding the per-item sequence marker
    #[serde(default = "default_item_sequence_field")]
    #[validate(length(min = 1))]
    pub item_sequence_field: String,

    /// Inventory publishing and monitoring
    #[serde(default)]
    #[validate(nested)]
    pub metadata: MetadataConfig,

    /// How child ranges start reading right after a split
    #[serde(default)]
    pub split_child_start: SplitChildStart,

    /// Maximum number of task instances
    #[serde(default = "default_tasks_max")]
    #[validate(range(min = 1, max = 1024))]
    pub tasks_max: u32,
}

/// Container selection
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, JsonSchema)]
pub struct ContainersConfig {
    /// Read every container of the database (`include` is ignored)
    #[serde(default)]
    pub include_all: bool,

    /// Explicit container names to read
    #[serde(default)]
    pub include: Vec<String>,

    /// Topic overrides as `topic#container`
    #[serde(default)]
    pub topic_map: Vec<String>,

    /// `topic_map` parsed by `validate_config`
    #[serde(skip)]
    routes: HashMap<String, String>,
}

/// Container filter handed to the inventory query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFilter {
    All,
    Include(Vec<String>),
}

impl ContainerFilter {
    pub fn matches(&self, container_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Include(names) => names.iter().any(|n| n == container_name),
        }
    }
}

/// Start position for ranges that have no checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    #[default]
    Beginning,
    Now,
    PointInTime(DateTime<Utc>),
}

/// Change-feed mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeFeedMode {
    #[default]
    LatestVersion,
    AllVersionsAndDeletes,
}

/// Start policy for child ranges created by a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SplitChildStart {
    /// Resume the child with the parent's continuation token
    #[default]
    InheritParent,
    /// Drop the parent's continuation and use `start_from`
    ConfiguredStart,
}

/// Record key derivation
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct MessageKeyConfig {
    /// Key records by an item field; unkeyed when disabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Item field used as the record key
    #[serde(default = "default_message_key_field")]
    #[validate(length(min = 1))]
    pub field: String,
}

impl Default for MessageKeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            field: default_message_key_field(),
        }
    }
}

/// Inventory publishing and monitoring settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct MetadataConfig {
    /// Topic receiving container and feed-range inventory records
    #[serde(default = "default_metadata_topic")]
    #[validate(length(min = 1, max = 249))]
    pub topic: String,

    /// Delay between metadata monitor ticks in milliseconds
    #[serde(default = "default_metadata_poll_delay_ms")]
    #[validate(range(min = 1000))]
    pub poll_delay_ms: u64,

    /// Run the metadata monitor
    #[serde(default = "default_true")]
    pub monitor_enabled: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            topic: default_metadata_topic(),
            poll_delay_ms: default_metadata_poll_delay_ms(),
            monitor_enabled: true,
        }
    }
}

impl MetadataConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_item_count_hint() -> u32 {
    1000
}

fn default_item_sequence_field() -> String {
    "_lsn".to_string()
}

fn default_message_key_field() -> String {
    "id".to_string()
}

fn default_metadata_topic() -> String {
    "_cosmos.metadata.topic".to_string()
}

fn default_metadata_poll_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_tasks_max() -> u32 {
    1
}

impl CosmosSourceConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML, expanding `${VAR}` references first
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let mut config: Self = serde_yaml::from_str(&expanded)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Run field validation plus the cross-field checks, then keep the
    /// parsed topic routes for `topic_for`
    pub fn validate_config(&mut self) -> Result<()> {
        self.validate()
            .map_err(|e| CosmosError::config(e.to_string()))?;

        if !self.containers.include_all && self.containers.include.is_empty() {
            return Err(CosmosError::config(
                "containers.include must not be empty unless containers.include_all is set",
            ));
        }

        self.containers.routes = self.container_topics()?;
        Ok(())
    }

    /// Container filter for inventory queries
    pub fn container_filter(&self) -> ContainerFilter {
        if self.containers.include_all {
            ContainerFilter::All
        } else {
            ContainerFilter::Include(self.containers.include.clone())
        }
    }

    /// Parse `topic_map` into container name -> topic
    pub fn container_topics(&self) -> Result<HashMap<String, String>> {
        let mut topics = HashMap::new();
        for entry in &self.containers.topic_map {
            let (topic, container) = entry
                .split_once('#')
                .filter(|(t, c)| !t.is_empty() && !c.is_empty())
                .ok_or_else(|| {
                    CosmosError::config(format!(
                        "invalid topic_map entry '{}', expected 'topic#container'",
                        entry
                    ))
                })?;
            if topics
                .insert(container.to_string(), topic.to_string())
                .is_some()
            {
                return Err(CosmosError::config(format!(
                    "container '{}' is mapped to more than one topic",
                    container
                )));
            }
        }
        Ok(topics)
    }

    /// Destination topic for a container; defaults to the container name.
    /// Routes come from the last successful `validate_config`.
    pub fn topic_for(&self, container_name: &str) -> String {
        self.containers
            .routes
            .get(container_name)
            .cloned()
            .unwrap_or_else(|| container_name.to_string())
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
