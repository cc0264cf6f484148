//! Per-feed-range checkpoint state and its flat offset encoding
//!
//! Offsets and partition keys are persisted as flat `String -> String` maps so
//! any checkpoint store backend can hold them.

use crate::error::{CosmosError, Result};
use crate::types::FeedRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat string-keyed map used for partition keys and offsets
pub type OffsetMap = BTreeMap<String, String>;

pub(crate) const DATABASE_KEY: &str = "database";
pub(crate) const CONTAINER_RID_KEY: &str = "containerRid";
const FEED_RANGE_KEY: &str = "feedRange";
const CONTINUATION_KEY: &str = "continuationToken";
const ITEM_SEQUENCE_KEY: &str = "itemSequence";
const TARGET_RANGE_KEY: &str = "targetRange";

/// Resume position for one feed range.
///
/// `continuation_token` alone resumes reads; `item_sequence` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointState {
    pub continuation_token: String,
    pub item_sequence: Option<String>,
    pub target_range: FeedRange,
}

impl CheckpointState {
    pub fn new(
        continuation_token: impl Into<String>,
        item_sequence: Option<String>,
        target_range: FeedRange,
    ) -> Self {
        Self {
            continuation_token: continuation_token.into(),
            item_sequence,
            target_range,
        }
    }

    /// State after a successful page read on the same range.
    ///
    /// The item sequence only moves when the page carried one.
    pub fn advance(&self, continuation_token: impl Into<String>, item_sequence: Option<String>) -> Self {
        Self {
            continuation_token: continuation_token.into(),
            item_sequence: item_sequence.or_else(|| self.item_sequence.clone()),
            target_range: self.target_range.clone(),
        }
    }

    /// The same continuation aimed at a child range after a split
    pub fn retarget(&self, child: FeedRange) -> Self {
        Self {
            continuation_token: self.continuation_token.clone(),
            item_sequence: self.item_sequence.clone(),
            target_range: child,
        }
    }

    pub fn to_offset_map(&self) -> OffsetMap {
        let mut map = OffsetMap::new();
        map.insert(CONTINUATION_KEY.to_string(), self.continuation_token.clone());
        if let Some(seq) = &self.item_sequence {
            map.insert(ITEM_SEQUENCE_KEY.to_string(), seq.clone());
        }
        map.insert(TARGET_RANGE_KEY.to_string(), self.target_range.to_string());
        map
    }

    pub fn from_offset_map(map: &OffsetMap) -> Result<Self> {
        let continuation_token = required(map, CONTINUATION_KEY)?.to_string();
        let target_range = required(map, TARGET_RANGE_KEY)?.parse()?;
        Ok(Self {
            continuation_token,
            item_sequence: map.get(ITEM_SEQUENCE_KEY).cloned(),
            target_range,
        })
    }
}

/// Partition key of a feed range's data records and checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangePartition {
    pub database: String,
    pub container_rid: String,
    pub feed_range: FeedRange,
}

impl RangePartition {
    pub fn new(database: impl Into<String>, container_rid: impl Into<String>, feed_range: FeedRange) -> Self {
        Self {
            database: database.into(),
            container_rid: container_rid.into(),
            feed_range,
        }
    }

    pub fn to_map(&self) -> OffsetMap {
        let mut map = OffsetMap::new();
        map.insert(DATABASE_KEY.to_string(), self.database.clone());
        map.insert(CONTAINER_RID_KEY.to_string(), self.container_rid.clone());
        map.insert(FEED_RANGE_KEY.to_string(), self.feed_range.to_string());
        map
    }

    pub fn from_map(map: &OffsetMap) -> Result<Self> {
        Ok(Self {
            database: required(map, DATABASE_KEY)?.to_string(),
            container_rid: required(map, CONTAINER_RID_KEY)?.to_string(),
            feed_range: required(map, FEED_RANGE_KEY)?.parse()?,
        })
    }
}

pub(crate) fn required<'a>(map: &'a OffsetMap, key: &str) -> Result<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| CosmosError::state(format!("offset map is missing '{}'", key)))
}
