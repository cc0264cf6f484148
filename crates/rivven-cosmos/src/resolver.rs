//! Split/merge resolution for gone feed ranges
//!
//! When a page read reports that its range no longer exists, the source is
//! asked which current ranges overlap the old one:
//!
//! | Overlapping ranges | Outcome                                             |
//! |--------------------|-----------------------------------------------------|
//! | exactly one        | merge: keep polling with the same continuation      |
//! | more than one      | split: one child task per returned range            |
//! | none               | inconsistency; surfaced as an error                 |
//!
//! Merges never change the task count. Splits add ranges that the scheduler
//! later rebalances across task instances.

use crate::error::{CosmosError, Result};
use crate::traits::InventoryQuery;
use crate::types::{ContainerDescriptor, FeedRange};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of resolving a gone range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The data now lives in this single successor range
    Merge(FeedRange),
    /// The range was split into these children, ordered by key
    Split(Vec<FeedRange>),
}

impl Resolution {
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split(_))
    }

    /// Classify an overlap query result. `None` when nothing overlaps.
    pub fn classify(mut overlapping: Vec<FeedRange>) -> Option<Self> {
        match overlapping.len() {
            0 => None,
            1 => overlapping.pop().map(Self::Merge),
            _ => {
                overlapping.sort();
                Some(Self::Split(overlapping))
            }
        }
    }
}

/// Resolves gone ranges against the live inventory
#[derive(Clone)]
pub struct SplitMergeResolver {
    inventory: Arc<dyn InventoryQuery>,
}

impl SplitMergeResolver {
    pub fn new(inventory: Arc<dyn InventoryQuery>) -> Self {
        Self { inventory }
    }

    /// Decide between merge and split for `gone` in `container`.
    ///
    /// Returns `CosmosError::ResolverInconsistency` when the source reports no
    /// overlapping range, since dropping the range would lose data.
    pub async fn resolve(
        &self,
        database: &str,
        container: &ContainerDescriptor,
        gone: &FeedRange,
    ) -> Result<Resolution> {
        let overlapping = self
            .inventory
            .overlapping_ranges(database, container, gone)
            .await?;
        debug!(
            container = %container.rid,
            range = %gone,
            overlapping = overlapping.len(),
            "Resolved overlapping feed ranges"
        );

        let resolution = Resolution::classify(overlapping).ok_or_else(|| {
            CosmosError::ResolverInconsistency {
                container: container.rid.clone(),
                range: gone.clone(),
            }
        })?;

        match &resolution {
            Resolution::Merge(successor) => info!(
                container = %container.rid,
                range = %gone,
                successor = %successor,
                "Feed range merged"
            ),
            Resolution::Split(children) => info!(
                container = %container.rid,
                range = %gone,
                children = children.len(),
                "Feed range split"
            ),
        }
        Ok(resolution)
    }
}
