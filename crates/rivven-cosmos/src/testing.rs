//! In-memory collaborators for tests
//!
//! Every type here is cheaply cloneable and clones share state, so a test can
//! hand one clone to the engine behind an `Arc<dyn Trait>` and keep another to
//! script behaviour or inspect what happened.
//!
//! ```rust,ignore
//! use rivven_cosmos::testing::*;
//!
//! let inventory = InMemoryInventory::new();
//! inventory.set_ranges("shop", ContainerDescriptor::new("orders", "rid-1"), vec![FeedRange::full()]);
//!
//! let feed = InMemoryFeed::new();
//! feed.push_page(&FeedRange::full(), vec![json!({"id": "a"})], "c1");
//! ```

use crate::checkpoint::OffsetMap;
use crate::config::ContainerFilter;
use crate::error::{CosmosError, Result};
use crate::record::SourceRecord;
use crate::traits::{
    CheckpointStore, FeedPage, FeedReader, InventoryQuery, ReadPosition, ReadRequest,
    ReconfigurationHook, ReconfigurationRequest,
};
use crate::types::{ContainerDescriptor, FeedRange};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// Inventory
// ============================================================================

/// Scriptable container and feed-range inventory
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    /// database -> containers in creation order with their ranges
    databases: Arc<Mutex<HashMap<String, Vec<(ContainerDescriptor, Vec<FeedRange>)>>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the container if needed and replace its effective ranges
    pub fn set_ranges(&self, database: &str, container: ContainerDescriptor, ranges: Vec<FeedRange>) {
        let mut databases = self.databases.lock();
        let containers = databases.entry(database.to_string()).or_default();
        match containers.iter_mut().find(|(c, _)| c.rid == container.rid) {
            Some((_, existing)) => *existing = ranges,
            None => containers.push((container, ranges)),
        }
    }

    /// Add a container whose single range covers the whole key space
    pub fn add_container(&self, database: &str, container: ContainerDescriptor) {
        self.set_ranges(database, container, vec![FeedRange::full()]);
    }

    pub fn remove_container(&self, database: &str, container_rid: &str) {
        if let Some(containers) = self.databases.lock().get_mut(database) {
            containers.retain(|(c, _)| c.rid != container_rid);
        }
    }

    /// Replace `parent` with `children` in a container's ranges
    pub fn split_range(&self, database: &str, container_rid: &str, parent: &FeedRange, children: Vec<FeedRange>) {
        if let Some((_, ranges)) = self
            .databases
            .lock()
            .get_mut(database)
            .and_then(|cs| cs.iter_mut().find(|(c, _)| c.rid == container_rid))
        {
            ranges.retain(|r| r != parent);
            ranges.extend(children);
            ranges.sort();
        }
    }

    /// Make every query fail with a transient error until cleared
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(CosmosError::transient(message.clone())),
            None => Ok(()),
        }
    }

    fn ranges(&self, database: &str, container: &ContainerDescriptor) -> Result<Vec<FeedRange>> {
        self.databases
            .lock()
            .get(database)
            .and_then(|cs| cs.iter().find(|(c, _)| c.rid == container.rid))
            .map(|(_, ranges)| ranges.clone())
            .ok_or_else(|| {
                CosmosError::NotFound(format!("container '{}' in '{}'", container.name, database))
            })
    }
}

#[async_trait]
impl InventoryQuery for InMemoryInventory {
    async fn list_containers(
        &self,
        database: &str,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerDescriptor>> {
        self.check_failure()?;
        Ok(self
            .databases
            .lock()
            .get(database)
            .map(|cs| {
                cs.iter()
                    .filter(|(c, _)| filter.matches(&c.name))
                    .map(|(c, _)| c.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_effective_ranges(
        &self,
        database: &str,
        container: &ContainerDescriptor,
    ) -> Result<Vec<FeedRange>> {
        self.check_failure()?;
        self.ranges(database, container)
    }

    async fn overlapping_ranges(
        &self,
        database: &str,
        container: &ContainerDescriptor,
        range: &FeedRange,
    ) -> Result<Vec<FeedRange>> {
        self.check_failure()?;
        Ok(self
            .ranges(database, container)?
            .into_iter()
            .filter(|r| r.overlaps(range))
            .collect())
    }
}

// ============================================================================
// Checkpoint store
// ============================================================================

/// Checkpoint store that keeps offsets and written records in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    offsets: Arc<Mutex<BTreeMap<OffsetMap, OffsetMap>>>,
    records: Arc<Mutex<Vec<SourceRecord>>>,
    writes: Arc<Mutex<usize>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an offset as if it had been committed earlier
    pub fn put_offset(&self, partition: OffsetMap, offset: OffsetMap) {
        self.offsets.lock().insert(partition, offset);
    }

    /// All records written so far, in write order
    pub fn written_records(&self) -> Vec<SourceRecord> {
        self.records.lock().clone()
    }

    /// Number of `write` calls
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn offsets(&self) -> BTreeMap<OffsetMap, OffsetMap> {
        self.offsets.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn read_offset(&self, partition: &OffsetMap) -> Result<Option<OffsetMap>> {
        Ok(self.offsets.lock().get(partition).cloned())
    }

    async fn write(
        &self,
        partition: &OffsetMap,
        offset: &OffsetMap,
        records: &[SourceRecord],
    ) -> Result<()> {
        self.records.lock().extend_from_slice(records);
        self.offsets.lock().insert(partition.clone(), offset.clone());
        *self.writes.lock() += 1;
        Ok(())
    }
}

// ============================================================================
// Change feed
// ============================================================================

/// Change feed with scripted responses per feed range.
///
/// Responses are consumed in order. Once a range's script is exhausted it
/// returns empty pages that keep the current continuation token.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFeed {
    scripts: Arc<Mutex<HashMap<FeedRange, VecDeque<Result<FeedPage>>>>>,
    requests: Arc<Mutex<Vec<ReadRequest>>>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, range: &FeedRange, items: Vec<serde_json::Value>, continuation_token: &str) {
        self.push(
            range,
            Ok(FeedPage {
                items,
                continuation_token: continuation_token.to_string(),
            }),
        );
    }

    pub fn push_error(&self, range: &FeedRange, error: CosmosError) {
        self.push(range, Err(error));
    }

    /// Report the range as split or merged away on its next read
    pub fn push_gone(&self, range: &FeedRange) {
        self.push(range, Err(CosmosError::range_gone(range.clone())));
    }

    fn push(&self, range: &FeedRange, response: Result<FeedPage>) {
        self.scripts
            .lock()
            .entry(range.clone())
            .or_default()
            .push_back(response);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<ReadRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_handle(&self) -> Arc<Mutex<Vec<ReadRequest>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl FeedReader for InMemoryFeed {
    async fn read_page(&self, request: ReadRequest) -> Result<FeedPage> {
        let scripted = self
            .scripts
            .lock()
            .get_mut(&request.feed_range)
            .and_then(VecDeque::pop_front);

        let response = scripted.unwrap_or_else(|| {
            let continuation_token = match &request.position {
                ReadPosition::Continuation(checkpoint) => checkpoint.continuation_token.clone(),
                ReadPosition::Start(_) => String::new(),
            };
            Ok(FeedPage {
                items: Vec::new(),
                continuation_token,
            })
        });
        self.requests.lock().push(request);
        response
    }
}

// ============================================================================
// Reconfiguration hook
// ============================================================================

/// Hook that records every request it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingReconfigurationHook {
    requests: Arc<Mutex<Vec<ReconfigurationRequest>>>,
}

impl RecordingReconfigurationHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ReconfigurationRequest> {
        self.requests.lock().clone()
    }
}

impl ReconfigurationHook for RecordingReconfigurationHook {
    fn request_reconfiguration(&self, request: ReconfigurationRequest) {
        self.requests.lock().push(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inventory_filters_and_overlaps() {
        let inventory = InMemoryInventory::new();
        inventory.add_container("shop", ContainerDescriptor::new("orders", "rid-1"));
        inventory.set_ranges(
            "shop",
            ContainerDescriptor::new("customers", "rid-2"),
            vec![FeedRange::new("", "80"), FeedRange::new("80", "FF")],
        );

        let filter = ContainerFilter::Include(vec!["customers".into()]);
        let containers = inventory.list_containers("shop", &filter).await.unwrap();
        assert_eq!(containers, vec![ContainerDescriptor::new("customers", "rid-2")]);

        let overlapping = inventory
            .overlapping_ranges("shop", &containers[0], &FeedRange::new("70", "90"))
            .await
            .unwrap();
        assert_eq!(overlapping.len(), 2);

        inventory.remove_container("shop", "rid-2");
        assert!(inventory
            .list_effective_ranges("shop", &containers[0])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inventory_failure_injection() {
        let inventory = InMemoryInventory::new();
        inventory.fail_with("unavailable");
        let err = inventory
            .list_containers("shop", &ContainerFilter::All)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        inventory.clear_failure();
        assert!(inventory
            .list_containers("shop", &ContainerFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_feed_falls_back_to_empty_pages() {
        let feed = InMemoryFeed::new();
        feed.push_page(&FeedRange::full(), vec![json!({"id": 1})], "c1");

        let request = ReadRequest {
            database: "shop".into(),
            container_name: "orders".into(),
            container_rid: "rid-1".into(),
            feed_range: FeedRange::full(),
            position: ReadPosition::Start(Default::default()),
            max_item_count: 10,
            mode: Default::default(),
        };
        let first = feed.read_page(request.clone()).await.unwrap();
        assert_eq!(first.items.len(), 1);

        let second = feed.read_page(request).await.unwrap();
        assert!(second.items.is_empty());
        assert_eq!(feed.requests().len(), 2);
    }
}
