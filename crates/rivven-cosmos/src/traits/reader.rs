//! Change-feed page reads

use crate::checkpoint::CheckpointState;
use crate::config::{ChangeFeedMode, StartPosition};
use crate::error::Result;
use crate::types::FeedRange;
use async_trait::async_trait;

/// Where a page read resumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPosition {
    /// Continue from a stored checkpoint
    Continuation(CheckpointState),
    /// No checkpoint yet; use the configured start position
    Start(StartPosition),
}

/// One bounded page read against one feed range
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub database: String,
    pub container_name: String,
    pub container_rid: String,
    pub feed_range: FeedRange,
    pub position: ReadPosition,
    pub max_item_count: u32,
    pub mode: ChangeFeedMode,
}

/// A page of change-feed items plus the cursor after it
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub items: Vec<serde_json::Value>,
    pub continuation_token: String,
}

/// Reads pages from the change feed.
///
/// Implementations return `CosmosError::RangeGone` when the queried range was
/// split or merged away; every other error is treated as transient or fatal
/// according to `CosmosError::is_retryable`.
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn read_page(&self, request: ReadRequest) -> Result<FeedPage>;
}
