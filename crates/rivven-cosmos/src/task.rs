//! Task units: the schedulable pieces of polling work
//!
//! A task instance owns a queue of [`TaskUnit`]s. Each unit is either a
//! [`RangeTaskUnit`] (one feed range, one topic, one checkpoint) or the
//! [`MetadataTaskUnit`] that publishes the container/range inventory.
//! Units travel from the planner to task instances as JSON, discriminated
//! by a `type` field.

use crate::checkpoint::{CheckpointState, RangePartition};
use crate::config::SplitChildStart;
use crate::error::Result;
use crate::types::FeedRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One feed range of one container, read into one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeTaskUnit {
    pub database_name: String,
    pub container_name: String,
    pub container_rid: String,
    pub feed_range: FeedRange,
    /// `None` reads from the configured start position
    pub checkpoint: Option<CheckpointState>,
    pub topic: String,
}

impl RangeTaskUnit {
    pub fn new(
        database_name: impl Into<String>,
        container_name: impl Into<String>,
        container_rid: impl Into<String>,
        feed_range: FeedRange,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            database_name: database_name.into(),
            container_name: container_name.into(),
            container_rid: container_rid.into(),
            feed_range,
            checkpoint: None,
            topic: topic.into(),
        }
    }

    /// Replace the checkpoint, producing a new unit
    pub fn with_checkpoint(self, checkpoint: Option<CheckpointState>) -> Self {
        Self { checkpoint, ..self }
    }

    pub fn partition(&self) -> RangePartition {
        RangePartition::new(&self.database_name, &self.container_rid, self.feed_range.clone())
    }

    /// Child units replacing this one after a split
    pub fn split_into(&self, children: &[FeedRange], policy: SplitChildStart) -> Vec<RangeTaskUnit> {
        children
            .iter()
            .map(|child| {
                let checkpoint = match policy {
                    SplitChildStart::InheritParent => {
                        self.checkpoint.as_ref().map(|c| c.retarget(child.clone()))
                    }
                    SplitChildStart::ConfiguredStart => None,
                };
                RangeTaskUnit {
                    database_name: self.database_name.clone(),
                    container_name: self.container_name.clone(),
                    container_rid: self.container_rid.clone(),
                    feed_range: child.clone(),
                    checkpoint,
                    topic: self.topic.clone(),
                }
            })
            .collect()
    }
}

impl fmt::Display for RangeTaskUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{} -> {}",
            self.database_name, self.container_name, self.feed_range, self.topic
        )
    }
}

/// Inventory snapshot to publish for the whole database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataTaskUnit {
    pub database_name: String,
    pub connector_name: String,
    pub container_rids: Vec<String>,
    pub container_ranges: BTreeMap<String, Vec<FeedRange>>,
    pub topic: String,
}

/// A unit of polling work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskUnit {
    Range(RangeTaskUnit),
    Metadata(MetadataTaskUnit),
}

impl TaskUnit {
    pub fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }

    pub fn as_range(&self) -> Option<&RangeTaskUnit> {
        match self {
            Self::Range(unit) => Some(unit),
            Self::Metadata(_) => None,
        }
    }
}

impl From<RangeTaskUnit> for TaskUnit {
    fn from(unit: RangeTaskUnit) -> Self {
        Self::Range(unit)
    }
}

impl From<MetadataTaskUnit> for TaskUnit {
    fn from(unit: MetadataTaskUnit) -> Self {
        Self::Metadata(unit)
    }
}

/// Serialize a task instance's units for hand-off through the scheduler
pub fn encode_task_units(units: &[TaskUnit]) -> Result<String> {
    Ok(serde_json::to_string(units)?)
}

/// Inverse of [`encode_task_units`]
pub fn decode_task_units(encoded: &str) -> Result<Vec<TaskUnit>> {
    Ok(serde_json::from_str(encoded)?)
}
