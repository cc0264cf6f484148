//! Records produced by the poll loop

use crate::checkpoint::OffsetMap;
use crate::error::Result;
use crate::traits::CheckpointStore;
use serde::Serialize;

/// A record bound for the log sink.
///
/// `source_partition`/`source_offset` are what the checkpoint store persists so
/// the task can resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: serde_json::Value,
    pub source_partition: OffsetMap,
    pub source_offset: OffsetMap,
}

impl SourceRecord {
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        value: serde_json::Value,
        source_partition: OffsetMap,
        source_offset: OffsetMap,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            value,
            source_partition,
            source_offset,
        }
    }
}

/// Persist records grouped by source partition.
///
/// Each partition's batch is written with the offset of its last record, in
/// the order partitions first appear.
pub async fn commit_records(store: &dyn CheckpointStore, records: &[SourceRecord]) -> Result<()> {
    let mut batches: Vec<(&OffsetMap, Vec<SourceRecord>)> = Vec::new();
    for record in records {
        match batches
            .iter_mut()
            .find(|(partition, _)| *partition == &record.source_partition)
        {
            Some((_, batch)) => batch.push(record.clone()),
            None => batches.push((&record.source_partition, vec![record.clone()])),
        }
    }

    for (partition, batch) in batches {
        if let Some(last) = batch.last() {
            store.write(partition, &last.source_offset, &batch).await?;
        }
    }
    Ok(())
}
