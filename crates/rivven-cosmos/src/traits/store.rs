//! Durable checkpoint store of the log sink

use crate::checkpoint::OffsetMap;
use crate::error::Result;
use crate::record::SourceRecord;
use async_trait::async_trait;

/// Per-partition offset storage plus record persistence.
///
/// Partition keys and offsets are flat string maps.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last committed offset for a partition key, if any
    async fn read_offset(&self, partition: &OffsetMap) -> Result<Option<OffsetMap>>;

    /// Persist a record batch together with the partition's new offset
    async fn write(
        &self,
        partition: &OffsetMap,
        offset: &OffsetMap,
        records: &[SourceRecord],
    ) -> Result<()>;
}
