//! Poll loop of one task instance
//!
//! Each `poll_once` call services exactly one task unit from the head of the
//! queue:
//!
//! - the metadata unit emits the inventory records and goes back to the head;
//!   it is due again once every range unit behind it has been serviced, and
//!   until then polls pass over it to the first range unit
//! - a range unit reads one page; on success a new unit with the advanced
//!   checkpoint goes to the tail
//! - a gone range is resolved: merges re-queue the same unit, splits replace
//!   it with one child per sub-range
//! - any other failure re-queues the unit unchanged and is returned
//!
//! A unit is only ever removed from the queue when it is replaced by its
//! split children.

use crate::checkpoint::CheckpointState;
use crate::config::{
    ChangeFeedMode, CosmosSourceConfig, MessageKeyConfig, SplitChildStart, StartPosition,
};
use crate::error::{CosmosError, Result};
use crate::metadata::metadata_records;
use crate::metrics::FeedMetrics;
use crate::queue::TaskQueue;
use crate::record::SourceRecord;
use crate::resolver::{Resolution, SplitMergeResolver};
use crate::task::{RangeTaskUnit, TaskUnit};
use crate::traits::{CheckpointStore, FeedPage, FeedReader, ReadPosition, ReadRequest};
use crate::types::ContainerDescriptor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings the poll loop needs from the connector configuration
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub start_from: StartPosition,
    pub change_feed_mode: ChangeFeedMode,
    pub max_item_count_hint: u32,
    pub message_key: MessageKeyConfig,
    pub item_sequence_field: String,
    pub split_child_start: SplitChildStart,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            start_from: StartPosition::default(),
            change_feed_mode: ChangeFeedMode::default(),
            max_item_count_hint: 1000,
            message_key: MessageKeyConfig::default(),
            item_sequence_field: "_lsn".to_string(),
            split_child_start: SplitChildStart::default(),
        }
    }
}

impl From<&CosmosSourceConfig> for PollSettings {
    fn from(config: &CosmosSourceConfig) -> Self {
        Self {
            start_from: config.start_from.clone(),
            change_feed_mode: config.change_feed_mode,
            max_item_count_hint: config.max_item_count_hint,
            message_key: config.message_key.clone(),
            item_sequence_field: config.item_sequence_field.clone(),
            split_child_start: config.split_child_start,
        }
    }
}

/// One task instance's poll loop
pub struct SourceTask {
    task_id: String,
    settings: PollSettings,
    reader: Arc<dyn FeedReader>,
    resolver: SplitMergeResolver,
    store: Option<Arc<dyn CheckpointStore>>,
    queue: TaskQueue,
    /// Range polls left before the metadata unit is due again
    pending_ranges: usize,
    metrics: Arc<FeedMetrics>,
}

impl SourceTask {
    pub fn new(
        task_id: impl Into<String>,
        settings: PollSettings,
        reader: Arc<dyn FeedReader>,
        resolver: SplitMergeResolver,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            settings,
            reader,
            resolver,
            store: None,
            queue: TaskQueue::new(),
            pending_ranges: 0,
            metrics: Arc::new(FeedMetrics::new()),
        }
    }

    /// Recover checkpoints from this store for units that carry none
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<FeedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    /// Load the initial units.
    ///
    /// A range unit without a checkpoint adopts the stored offset of its
    /// partition when that offset targets exactly the same range.
    pub async fn start(&mut self, units: Vec<TaskUnit>) -> Result<()> {
        let mut recovered = Vec::with_capacity(units.len());
        for unit in units {
            let unit = match unit {
                TaskUnit::Range(range) if range.checkpoint.is_none() => {
                    TaskUnit::Range(self.recover_checkpoint(range).await?)
                }
                other => other,
            };
            recovered.push(unit);
        }

        self.queue = TaskQueue::from_units(recovered);
        self.pending_ranges = 0;
        info!(
            task = %self.task_id,
            units = self.queue.len(),
            "Source task started"
        );
        Ok(())
    }

    async fn recover_checkpoint(&self, unit: RangeTaskUnit) -> Result<RangeTaskUnit> {
        let Some(store) = &self.store else {
            return Ok(unit);
        };
        let Some(offset) = store.read_offset(&unit.partition().to_map()).await? else {
            return Ok(unit);
        };

        let checkpoint = CheckpointState::from_offset_map(&offset)?;
        if checkpoint.target_range != unit.feed_range {
            warn!(
                task = %self.task_id,
                range = %unit.feed_range,
                stored = %checkpoint.target_range,
                "Stored checkpoint targets a different range, ignoring it"
            );
            return Ok(unit);
        }

        debug!(task = %self.task_id, unit = %unit, "Recovered checkpoint");
        Ok(unit.with_checkpoint(Some(checkpoint)))
    }

    /// Service the unit at the head of the queue.
    ///
    /// An empty queue yields no records; callers poll again later.
    pub async fn poll_once(&mut self) -> Result<Vec<SourceRecord>> {
        let Some(unit) = self.queue.pop_front() else {
            return Ok(Vec::new());
        };

        match unit {
            TaskUnit::Metadata(metadata) if self.pending_ranges == 0 => {
                let records = metadata_records(&metadata);
                self.queue.push_front(TaskUnit::Metadata(metadata));
                let records = records.inspect_err(|_| self.metrics.record_error())?;
                self.pending_ranges = self.queue.range_units().count();
                self.metrics.record_metadata_cycle();
                debug!(task = %self.task_id, records = records.len(), "Emitted inventory records");
                Ok(records)
            }
            TaskUnit::Metadata(metadata) => {
                let next = self.queue.pop_front();
                self.queue.push_front(TaskUnit::Metadata(metadata));
                match next {
                    Some(TaskUnit::Range(range)) => self.poll_range(range).await,
                    Some(other) => {
                        self.queue.push_back(other);
                        Ok(Vec::new())
                    }
                    None => Ok(Vec::new()),
                }
            }
            TaskUnit::Range(range) => self.poll_range(range).await,
        }
    }

    async fn poll_range(&mut self, unit: RangeTaskUnit) -> Result<Vec<SourceRecord>> {
        self.pending_ranges = self.pending_ranges.saturating_sub(1);
        let request = self.read_request(&unit);

        match self.reader.read_page(request).await {
            Ok(page) => match self.page_records(&unit, page) {
                Ok((records, advanced)) => {
                    self.metrics.record_poll(records.len() as u64);
                    self.queue.push_back(TaskUnit::Range(advanced));
                    Ok(records)
                }
                Err(e) => {
                    self.metrics.record_error();
                    self.queue.push_back(TaskUnit::Range(unit));
                    Err(e)
                }
            },
            Err(e) if e.is_range_gone() => self.handle_gone_range(unit).await,
            Err(e) => {
                self.metrics.record_error();
                warn!(
                    task = %self.task_id,
                    unit = %unit,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Page read failed, unit re-queued"
                );
                self.queue.push_back(TaskUnit::Range(unit));
                Err(e)
            }
        }
    }

    async fn handle_gone_range(&mut self, unit: RangeTaskUnit) -> Result<Vec<SourceRecord>> {
        let container = ContainerDescriptor::new(&unit.container_name, &unit.container_rid);
        let resolution = self
            .resolver
            .resolve(&unit.database_name, &container, &unit.feed_range)
            .await;

        match resolution {
            Ok(Resolution::Merge(_)) => {
                self.metrics.record_merge();
                self.queue.push_back(TaskUnit::Range(unit));
            }
            Ok(Resolution::Split(children)) => {
                self.metrics.record_split();
                let split = unit.split_into(&children, self.settings.split_child_start);
                info!(
                    task = %self.task_id,
                    parent = %unit.feed_range,
                    children = split.len(),
                    "Replacing split range with child units"
                );
                for child in split {
                    self.queue.push_back(TaskUnit::Range(child));
                }
            }
            Err(e) => {
                self.metrics.record_error();
                self.queue.push_back(TaskUnit::Range(unit));
                return Err(e);
            }
        }
        Ok(Vec::new())
    }

    fn read_request(&self, unit: &RangeTaskUnit) -> ReadRequest {
        let position = match &unit.checkpoint {
            Some(checkpoint) => ReadPosition::Continuation(checkpoint.clone()),
            None => ReadPosition::Start(self.settings.start_from.clone()),
        };
        ReadRequest {
            database: unit.database_name.clone(),
            container_name: unit.container_name.clone(),
            container_rid: unit.container_rid.clone(),
            feed_range: unit.feed_range.clone(),
            position,
            max_item_count: self.settings.max_item_count_hint,
            mode: self.settings.change_feed_mode,
        }
    }

    /// Records for a page plus the unit carrying the advanced checkpoint
    fn page_records(
        &self,
        unit: &RangeTaskUnit,
        page: FeedPage,
    ) -> Result<(Vec<SourceRecord>, RangeTaskUnit)> {
        let partition = unit.partition().to_map();
        let mut sequences = Vec::with_capacity(page.items.len());
        for item in &page.items {
            if !item.is_object() {
                return Err(CosmosError::serialization(format!(
                    "change feed item in {} is not a JSON object",
                    unit
                )));
            }
            sequences.push(scalar_field(item, &self.settings.item_sequence_field));
        }

        let last_sequence = sequences.iter().rev().find_map(Clone::clone);
        let checkpoint = match &unit.checkpoint {
            Some(previous) => previous.advance(&page.continuation_token, last_sequence),
            None => CheckpointState::new(
                &page.continuation_token,
                last_sequence,
                unit.feed_range.clone(),
            ),
        };

        let records = page
            .items
            .into_iter()
            .zip(sequences)
            .map(|(item, sequence)| {
                let key = if self.settings.message_key.enabled {
                    scalar_field(&item, &self.settings.message_key.field)
                } else {
                    None
                };
                let offset = CheckpointState {
                    continuation_token: checkpoint.continuation_token.clone(),
                    item_sequence: sequence.or_else(|| checkpoint.item_sequence.clone()),
                    target_range: checkpoint.target_range.clone(),
                }
                .to_offset_map();
                SourceRecord::new(&unit.topic, key, item, partition.clone(), offset)
            })
            .collect();

        Ok((records, unit.clone().with_checkpoint(Some(checkpoint))))
    }

    /// Drop all units; the instance is shutting down
    pub fn stop(&mut self) {
        info!(
            task = %self.task_id,
            units = self.queue.len(),
            "Source task stopping"
        );
        self.queue.clear();
    }
}

/// String form of a scalar item field; `None` when absent, null or nested
fn scalar_field(item: &serde_json::Value, field: &str) -> Option<String> {
    match item.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
