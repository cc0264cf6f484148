//! Task planning across task instances
//!
//! Turns the live inventory into one list of task units per task instance.
//! The metadata unit always goes first to instance 0; range units are dealt
//! round-robin.
//!
//! Before distributing, every live range is matched against the ranges known
//! from the last published snapshot and their stored checkpoints, so topology
//! changes that happened while the connector was down keep their progress:
//!
//! | Previous range vs live range          | Planned units                                |
//! |---------------------------------------|----------------------------------------------|
//! | identical                             | the live range with its stored checkpoint    |
//! | previous strictly contains live       | the live range resuming the parent (split)   |
//! | previous ranges tile the live range   | one unit per previous range (merge)          |
//! | anything else                         | the live range from the start position       |
//!
//! In the merge case each unit keeps reading its old range; the first read
//! reports it gone and the resolver maps it onto the merged range.

use crate::checkpoint::{CheckpointState, RangePartition};
use crate::config::{CosmosSourceConfig, SplitChildStart};
use crate::error::Result;
use crate::metadata::InventorySnapshot;
use crate::task::{MetadataTaskUnit, RangeTaskUnit, TaskUnit};
use crate::traits::CheckpointStore;
use crate::types::{ContainerDescriptor, FeedRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// A container with its current effective ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInventory {
    pub name: String,
    pub rid: String,
    pub ranges: Vec<FeedRange>,
}

impl ContainerInventory {
    pub fn new(container: ContainerDescriptor, ranges: Vec<FeedRange>) -> Self {
        Self {
            name: container.name,
            rid: container.rid,
            ranges,
        }
    }

    pub fn descriptor(&self) -> ContainerDescriptor {
        ContainerDescriptor::new(&self.name, &self.rid)
    }
}

/// Live inventory of a database, as fed to the planner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInventory {
    pub containers: Vec<ContainerInventory>,
}

impl DatabaseInventory {
    /// Load an inventory from a JSON file
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Match one live range against the previously known ranges of its container.
///
/// `previous` pairs each known range with its stored checkpoint, if any. It
/// may include the live range itself.
pub fn reconcile_range(
    live: &FeedRange,
    previous: &[(FeedRange, Option<CheckpointState>)],
    policy: SplitChildStart,
) -> Vec<(FeedRange, Option<CheckpointState>)> {
    if let Some((_, Some(checkpoint))) = previous.iter().find(|(range, _)| range == live) {
        return vec![(live.clone(), Some(checkpoint.clone()))];
    }

    if let Some((parent, Some(checkpoint))) = previous
        .iter()
        .find(|(range, _)| range != live && range.contains(live))
    {
        let inherited = match policy {
            SplitChildStart::InheritParent => Some(checkpoint.retarget(live.clone())),
            SplitChildStart::ConfiguredStart => None,
        };
        debug!(parent = %parent, child = %live, "Range split while offline");
        return vec![(live.clone(), inherited)];
    }

    let mut pieces: Vec<_> = previous
        .iter()
        .filter(|(range, _)| range != live && live.contains(range))
        .cloned()
        .collect();
    pieces.sort_by(|a, b| a.0.cmp(&b.0));
    let has_progress = pieces.iter().any(|(_, checkpoint)| checkpoint.is_some());
    if has_progress && live.is_covered_by(pieces.iter().map(|(range, _)| range)) {
        debug!(range = %live, pieces = pieces.len(), "Ranges merged while offline");
        return pieces;
    }
    if has_progress {
        warn!(
            range = %live,
            "Previous ranges do not tile the merged range, starting it from the configured position"
        );
    }

    vec![(live.clone(), None)]
}

/// Deal units out to at most `tasks_max` instances.
///
/// The metadata unit, when given, is the first unit of instance 0. At least
/// one instance is always returned.
pub fn distribute(
    metadata: Option<MetadataTaskUnit>,
    ranges: Vec<RangeTaskUnit>,
    tasks_max: usize,
) -> Vec<Vec<TaskUnit>> {
    let instances = tasks_max.clamp(1, ranges.len().max(1));
    let mut plan: Vec<Vec<TaskUnit>> = vec![Vec::new(); instances];

    if let Some(metadata) = metadata {
        plan[0].push(TaskUnit::Metadata(metadata));
    }
    for (i, unit) in ranges.into_iter().enumerate() {
        plan[i % instances].push(TaskUnit::Range(unit));
    }
    plan
}

/// Builds task configurations from configuration, inventory and stored state
pub struct TaskPlanner<'a> {
    config: &'a CosmosSourceConfig,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(config: &'a CosmosSourceConfig) -> Self {
        Self { config }
    }

    /// Metadata unit describing `inventory`
    pub fn metadata_unit(&self, inventory: &DatabaseInventory) -> MetadataTaskUnit {
        self.snapshot_unit(
            inventory,
            inventory
                .containers
                .iter()
                .map(|c| (c.rid.clone(), c.ranges.clone()))
                .collect(),
        )
    }

    /// Metadata unit publishing `container_ranges` for the containers of `inventory`
    fn snapshot_unit(
        &self,
        inventory: &DatabaseInventory,
        container_ranges: BTreeMap<String, Vec<FeedRange>>,
    ) -> MetadataTaskUnit {
        MetadataTaskUnit {
            database_name: self.config.database.clone(),
            connector_name: self.config.connector_name.clone(),
            container_rids: inventory.containers.iter().map(|c| c.rid.clone()).collect(),
            container_ranges,
            topic: self.config.metadata.topic.clone(),
        }
    }

    /// Plan without stored state: every range starts from the configured position
    pub fn plan_fresh(&self, inventory: &DatabaseInventory) -> Vec<Vec<TaskUnit>> {
        let ranges = inventory
            .containers
            .iter()
            .flat_map(|container| {
                container
                    .ranges
                    .iter()
                    .map(move |range| self.range_unit(container, range.clone(), None))
            })
            .collect();
        distribute(
            Some(self.metadata_unit(inventory)),
            ranges,
            self.config.tasks_max as usize,
        )
    }

    /// Plan against stored checkpoints and the last published snapshot
    pub async fn plan(
        &self,
        inventory: &DatabaseInventory,
        store: &dyn CheckpointStore,
    ) -> Result<Vec<Vec<TaskUnit>>> {
        let snapshot =
            InventorySnapshot::load(store, &self.config.database, &self.config.connector_name)
                .await?;

        let mut ranges = Vec::new();
        // merge pieces stay in the snapshot so later plans still find their offsets
        let mut assigned: BTreeMap<String, Vec<FeedRange>> = BTreeMap::new();
        for container in &inventory.containers {
            let known: BTreeSet<FeedRange> = snapshot
                .as_ref()
                .map(|s| s.ranges_of(&container.rid).to_vec())
                .unwrap_or_default()
                .into_iter()
                .chain(container.ranges.iter().cloned())
                .collect();

            let mut previous = Vec::with_capacity(known.len());
            for range in known {
                let partition =
                    RangePartition::new(&self.config.database, &container.rid, range.clone());
                let checkpoint = match store.read_offset(&partition.to_map()).await? {
                    Some(offset) => Some(CheckpointState::from_offset_map(&offset)?),
                    None => None,
                };
                previous.push((range, checkpoint));
            }

            let container_ranges = assigned.entry(container.rid.clone()).or_default();
            for live in &container.ranges {
                for (range, checkpoint) in
                    reconcile_range(live, &previous, self.config.split_child_start)
                {
                    container_ranges.push(range.clone());
                    ranges.push(self.range_unit(container, range, checkpoint));
                }
            }
        }

        let plan = distribute(
            Some(self.snapshot_unit(inventory, assigned)),
            ranges,
            self.config.tasks_max as usize,
        );
        info!(
            connector = %self.config.connector_name,
            containers = inventory.containers.len(),
            instances = plan.len(),
            "Planned task units"
        );
        Ok(plan)
    }

    fn range_unit(
        &self,
        container: &ContainerInventory,
        range: FeedRange,
        checkpoint: Option<CheckpointState>,
    ) -> RangeTaskUnit {
        RangeTaskUnit::new(
            &self.config.database,
            &container.name,
            &container.rid,
            range,
            self.config.topic_for(&container.name),
        )
        .with_checkpoint(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::metadata_records;
    use crate::record::commit_records;
    use crate::testing::InMemoryCheckpointStore;

    fn config(tasks_max: u32) -> CosmosSourceConfig {
        CosmosSourceConfig::from_yaml_str(&format!(
            r#"
endpoint: https://localhost:8081/
key: secret
connector_name: orders-feed
database: shop
containers:
  include_all: true
  topic_map: ["orders-topic#orders"]
tasks_max: {}
"#,
            tasks_max
        ))
        .unwrap()
    }

    fn inventory() -> DatabaseInventory {
        DatabaseInventory {
            containers: vec![
                ContainerInventory {
                    name: "orders".into(),
                    rid: "rid-1".into(),
                    ranges: vec![FeedRange::new("", "80"), FeedRange::new("80", "FF")],
                },
                ContainerInventory {
                    name: "customers".into(),
                    rid: "rid-2".into(),
                    ranges: vec![FeedRange::full()],
                },
            ],
        }
    }

    fn checkpoint(token: &str, range: FeedRange) -> CheckpointState {
        CheckpointState::new(token, None, range)
    }

    #[test]
    fn test_distribute_round_robin_with_metadata_first() {
        let config = config(2);
        let plan = TaskPlanner::new(&config).plan_fresh(&inventory());

        assert_eq!(plan.len(), 2);
        assert!(plan[0][0].is_metadata());
        assert_eq!(plan[0].len(), 3);
        assert_eq!(plan[1].len(), 1);
        assert_eq!(plan[0][1].as_range().unwrap().topic, "orders-topic");
        assert_eq!(plan[0][2].as_range().unwrap().topic, "customers");
    }

    #[test]
    fn test_distribute_never_exceeds_range_count() {
        let plan = distribute(None, vec![], 8);
        assert_eq!(plan.len(), 1);
        assert!(plan[0].is_empty());

        let config = config(16);
        let plan = TaskPlanner::new(&config).plan_fresh(&inventory());
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_reconcile_exact_match() {
        let live = FeedRange::new("", "80");
        let previous = vec![(live.clone(), Some(checkpoint("t1", live.clone())))];
        let planned = reconcile_range(&live, &previous, SplitChildStart::InheritParent);
        assert_eq!(planned, vec![(live.clone(), Some(checkpoint("t1", live)))]);
    }

    #[test]
    fn test_reconcile_offline_split() {
        let parent = FeedRange::full();
        let live = FeedRange::new("80", "FF");
        let previous = vec![(parent.clone(), Some(checkpoint("t1", parent)))];

        let planned = reconcile_range(&live, &previous, SplitChildStart::InheritParent);
        assert_eq!(planned, vec![(live.clone(), Some(checkpoint("t1", live.clone())))]);

        let planned = reconcile_range(&live, &previous, SplitChildStart::ConfiguredStart);
        assert_eq!(planned, vec![(live, None)]);
    }

    #[test]
    fn test_reconcile_offline_merge_keeps_each_piece() {
        let left = FeedRange::new("", "80");
        let right = FeedRange::new("80", "FF");
        let previous = vec![
            (right.clone(), None),
            (left.clone(), Some(checkpoint("t-left", left.clone()))),
        ];

        let planned = reconcile_range(&FeedRange::full(), &previous, SplitChildStart::InheritParent);
        assert_eq!(
            planned,
            vec![(left.clone(), Some(checkpoint("t-left", left))), (right, None)]
        );
    }

    #[test]
    fn test_reconcile_untiled_merge_starts_fresh() {
        let left = FeedRange::new("", "40");
        let previous = vec![(left.clone(), Some(checkpoint("t", left)))];
        let planned = reconcile_range(&FeedRange::full(), &previous, SplitChildStart::InheritParent);
        assert_eq!(planned, vec![(FeedRange::full(), None)]);
    }

    #[test]
    fn test_reconcile_unknown_range() {
        let planned = reconcile_range(&FeedRange::full(), &[], SplitChildStart::InheritParent);
        assert_eq!(planned, vec![(FeedRange::full(), None)]);
    }

    #[tokio::test]
    async fn test_plan_uses_snapshot_and_stored_checkpoints() {
        let config = config(1);
        let planner = TaskPlanner::new(&config);
        let store = InMemoryCheckpointStore::new();

        // previously orders had a single range with progress
        let previous = DatabaseInventory {
            containers: vec![ContainerInventory {
                name: "orders".into(),
                rid: "rid-1".into(),
                ranges: vec![FeedRange::full()],
            }],
        };
        commit_records(&store, &metadata_records(&planner.metadata_unit(&previous)).unwrap())
            .await
            .unwrap();
        store.put_offset(
            RangePartition::new("shop", "rid-1", FeedRange::full()).to_map(),
            checkpoint("t-full", FeedRange::full()).to_offset_map(),
        );

        let plan = planner.plan(&inventory(), &store).await.unwrap();
        assert_eq!(plan.len(), 1);
        let units: Vec<_> = plan[0].iter().filter_map(TaskUnit::as_range).collect();
        assert_eq!(units.len(), 3);

        // both halves of the split resume the parent's continuation
        for unit in &units[..2] {
            let checkpoint = unit.checkpoint.as_ref().unwrap();
            assert_eq!(checkpoint.continuation_token, "t-full");
            assert_eq!(checkpoint.target_range, unit.feed_range);
        }
        // the new container starts fresh
        assert!(units[2].checkpoint.is_none());

        // coverage of every live container is complete
        for container in &inventory().containers {
            let ranges: Vec<_> = units
                .iter()
                .filter(|u| u.container_rid == container.rid)
                .map(|u| &u.feed_range)
                .collect();
            assert!(FeedRange::full().is_covered_by(ranges));
        }
    }

    #[tokio::test]
    async fn test_merge_pieces_keep_progress_across_replans() {
        let config = config(1);
        let planner = TaskPlanner::new(&config);
        let store = InMemoryCheckpointStore::new();
        let left = FeedRange::new("", "80");
        let right = FeedRange::new("80", "FF");

        let split = DatabaseInventory {
            containers: vec![ContainerInventory {
                name: "orders".into(),
                rid: "rid-1".into(),
                ranges: vec![left.clone(), right.clone()],
            }],
        };
        commit_records(&store, &metadata_records(&planner.metadata_unit(&split)).unwrap())
            .await
            .unwrap();
        for (range, token) in [(&left, "t-left"), (&right, "t-right")] {
            store.put_offset(
                RangePartition::new("shop", "rid-1", range.clone()).to_map(),
                checkpoint(token, range.clone()).to_offset_map(),
            );
        }

        // the two ranges merged while the connector was down
        let merged = DatabaseInventory {
            containers: vec![ContainerInventory {
                name: "orders".into(),
                rid: "rid-1".into(),
                ranges: vec![FeedRange::full()],
            }],
        };
        let expected = vec![
            (left.clone(), Some("t-left".to_string())),
            (right.clone(), Some("t-right".to_string())),
        ];
        let planned = |plan: &[Vec<TaskUnit>]| -> Vec<(FeedRange, Option<String>)> {
            plan.iter()
                .flatten()
                .filter_map(TaskUnit::as_range)
                .map(|u| {
                    let token = u.checkpoint.as_ref().map(|c| c.continuation_token.clone());
                    (u.feed_range.clone(), token)
                })
                .collect()
        };

        let first = planner.plan(&merged, &store).await.unwrap();
        assert_eq!(planned(&first), expected);

        // the published snapshot still names the pieces being read
        let TaskUnit::Metadata(metadata) = &first[0][0] else {
            panic!("metadata unit must lead instance 0");
        };
        assert_eq!(metadata.container_ranges["rid-1"], vec![left.clone(), right.clone()]);
        commit_records(&store, &metadata_records(metadata).unwrap())
            .await
            .unwrap();

        let second = planner.plan(&merged, &store).await.unwrap();
        assert_eq!(planned(&second), expected);
    }
}
