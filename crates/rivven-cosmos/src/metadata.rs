//! Inventory snapshot records
//!
//! The metadata task publishes two kinds of records to the metadata topic:
//!
//! - one containers record keyed by `(database, connectorName)` listing the
//!   container resource ids
//! - one feed-ranges record per container keyed by
//!   `(database, containerRid, connectorName)` listing its effective ranges
//!
//! Their offsets double as the durable inventory snapshot the metadata monitor
//! compares against. Including the connector name in the keys keeps several
//! connectors that share a checkpoint store apart.

use crate::checkpoint::{required, OffsetMap, CONTAINER_RID_KEY, DATABASE_KEY};
use crate::error::{CosmosError, Result};
use crate::record::SourceRecord;
use crate::task::MetadataTaskUnit;
use crate::traits::CheckpointStore;
use crate::types::FeedRange;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

const CONNECTOR_NAME_KEY: &str = "connectorName";
const CONTAINER_RIDS_KEY: &str = "containerRids";
const FEED_RANGES_KEY: &str = "feedRanges";

/// Partition key of the containers record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainersMetadataPartition {
    pub database: String,
    pub connector_name: String,
}

impl ContainersMetadataPartition {
    pub fn new(database: impl Into<String>, connector_name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            connector_name: connector_name.into(),
        }
    }

    pub fn to_map(&self) -> OffsetMap {
        let mut map = OffsetMap::new();
        map.insert(DATABASE_KEY.to_string(), self.database.clone());
        map.insert(CONNECTOR_NAME_KEY.to_string(), self.connector_name.clone());
        map
    }
}

/// Partition key of a container's feed-ranges record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRangesMetadataPartition {
    pub database: String,
    pub container_rid: String,
    pub connector_name: String,
}

impl FeedRangesMetadataPartition {
    pub fn new(
        database: impl Into<String>,
        container_rid: impl Into<String>,
        connector_name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            container_rid: container_rid.into(),
            connector_name: connector_name.into(),
        }
    }

    pub fn to_map(&self) -> OffsetMap {
        let mut map = OffsetMap::new();
        map.insert(DATABASE_KEY.to_string(), self.database.clone());
        map.insert(CONTAINER_RID_KEY.to_string(), self.container_rid.clone());
        map.insert(CONNECTOR_NAME_KEY.to_string(), self.connector_name.clone());
        map
    }
}

fn containers_offset(container_rids: &[String]) -> Result<OffsetMap> {
    let mut map = OffsetMap::new();
    map.insert(
        CONTAINER_RIDS_KEY.to_string(),
        serde_json::to_string(container_rids)?,
    );
    Ok(map)
}

fn feed_ranges_offset(ranges: &[FeedRange]) -> Result<OffsetMap> {
    let mut map = OffsetMap::new();
    map.insert(FEED_RANGES_KEY.to_string(), serde_json::to_string(ranges)?);
    Ok(map)
}

fn parse_offset<T: serde::de::DeserializeOwned>(map: &OffsetMap, key: &str) -> Result<T> {
    let raw = required(map, key)?;
    serde_json::from_str(raw)
        .map_err(|e| CosmosError::state(format!("malformed '{}' in metadata offset: {}", key, e)))
}

/// Inventory records for one metadata cycle.
///
/// The containers record comes first, followed by one feed-ranges record per
/// container in `container_rids` order.
pub fn metadata_records(unit: &MetadataTaskUnit) -> Result<Vec<SourceRecord>> {
    let mut records = Vec::with_capacity(unit.container_rids.len() + 1);

    let partition = ContainersMetadataPartition::new(&unit.database_name, &unit.connector_name);
    records.push(SourceRecord::new(
        &unit.topic,
        Some(unit.database_name.clone()),
        json!({
            "database": unit.database_name,
            "connectorName": unit.connector_name,
            "containerRids": unit.container_rids,
        }),
        partition.to_map(),
        containers_offset(&unit.container_rids)?,
    ));

    for rid in &unit.container_rids {
        let ranges = unit.container_ranges.get(rid).cloned().unwrap_or_default();
        let partition =
            FeedRangesMetadataPartition::new(&unit.database_name, rid, &unit.connector_name);
        records.push(SourceRecord::new(
            &unit.topic,
            Some(rid.clone()),
            json!({
                "database": unit.database_name,
                "connectorName": unit.connector_name,
                "containerRid": rid,
                "feedRanges": ranges,
            }),
            partition.to_map(),
            feed_ranges_offset(&ranges)?,
        ));
    }

    Ok(records)
}

/// Last published container/range inventory of one connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub container_rids: Vec<String>,
    pub container_ranges: BTreeMap<String, Vec<FeedRange>>,
}

impl InventorySnapshot {
    pub fn from_unit(unit: &MetadataTaskUnit) -> Self {
        Self {
            container_rids: unit.container_rids.clone(),
            container_ranges: unit.container_ranges.clone(),
        }
    }

    /// Recover the snapshot from the checkpoint store.
    ///
    /// `None` until the containers record and every container's ranges record
    /// have been persisted at least once.
    pub async fn load(
        store: &dyn CheckpointStore,
        database: &str,
        connector_name: &str,
    ) -> Result<Option<Self>> {
        let partition = ContainersMetadataPartition::new(database, connector_name);
        let Some(offset) = store.read_offset(&partition.to_map()).await? else {
            return Ok(None);
        };
        let container_rids: Vec<String> = parse_offset(&offset, CONTAINER_RIDS_KEY)?;

        let mut container_ranges = BTreeMap::new();
        for rid in &container_rids {
            let partition = FeedRangesMetadataPartition::new(database, rid, connector_name);
            let Some(offset) = store.read_offset(&partition.to_map()).await? else {
                debug!(container = %rid, "Feed ranges of container not yet published");
                return Ok(None);
            };
            let ranges: Vec<FeedRange> = parse_offset(&offset, FEED_RANGES_KEY)?;
            container_ranges.insert(rid.clone(), ranges);
        }

        Ok(Some(Self {
            container_rids,
            container_ranges,
        }))
    }

    pub fn ranges_of(&self, container_rid: &str) -> &[FeedRange] {
        self.container_ranges
            .get(container_rid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
