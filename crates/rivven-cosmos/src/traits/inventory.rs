//! Container and feed-range inventory queries

use crate::config::ContainerFilter;
use crate::error::Result;
use crate::types::{ContainerDescriptor, FeedRange};
use async_trait::async_trait;

#[async_trait]
pub trait InventoryQuery: Send + Sync {
    /// Containers of `database` matching `filter`
    async fn list_containers(
        &self,
        database: &str,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerDescriptor>>;

    /// Current effective feed ranges of a container
    async fn list_effective_ranges(
        &self,
        database: &str,
        container: &ContainerDescriptor,
    ) -> Result<Vec<FeedRange>>;

    /// Current effective ranges overlapping `range`
    async fn overlapping_ranges(
        &self,
        database: &str,
        container: &ContainerDescriptor,
        range: &FeedRange,
    ) -> Result<Vec<FeedRange>>;
}
