//! rivven-cosmos - Change-feed source connector for Rivven
//!
//! Distributes the feed ranges of a partitioned document store across task
//! instances, checkpoints each range independently and follows range splits
//! and merges without losing data.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  plan   ┌───────────────────────────────┐
//! │   Connector   │────────▶│  Task instance (SourceTask)   │
//! │  (planner +   │         │  queue: [meta][r1][r2]...     │──▶ records + offsets
//! │   monitor)    │◀─ ─ ─ ─ │  poll_once → FeedReader       │
//! └───────────────┘ reconf  │  gone range → resolver        │
//!        │                  └───────────────────────────────┘
//!        ▼
//!  InventoryQuery / CheckpointStore
//! ```
//!
//! Collaborators (the change-feed RPC, inventory queries, the checkpoint
//! store and the scheduler) are traits in [`traits`]; [`testing`] has
//! in-memory versions.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rivven_cosmos::{CosmosSourceConfig, CosmosSourceConnector, run_task};
//!
//! let config = CosmosSourceConfig::from_file("cosmos.yaml")?;
//! let mut connector = CosmosSourceConnector::new(config, inventory, store.clone());
//! let plan = connector.start().await?;
//!
//! for (i, units) in plan.into_iter().enumerate() {
//!     let task = connector.create_task(format!("task-{i}"), reader.clone());
//!     tokio::spawn(run_task(task, units, store.clone(), idle_delay, shutdown_tx.subscribe()));
//! }
//! ```

pub mod error;
pub mod types;

pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod metadata;
pub mod metrics;
pub mod monitor;
pub mod planner;
pub mod queue;
pub mod record;
pub mod resolver;
pub mod source_task;
pub mod task;
pub mod testing;
pub mod traits;

pub use checkpoint::{CheckpointState, OffsetMap, RangePartition};
pub use config::{
    ChangeFeedMode, ContainerFilter, CosmosSourceConfig, SplitChildStart, StartPosition,
};
pub use connector::{run_task, CosmosSourceConnector};
pub use error::{CosmosError, Result};
pub use metadata::{metadata_records, InventorySnapshot};
pub use metrics::{FeedMetrics, FeedMetricsSnapshot};
pub use monitor::{MetadataMonitor, MonitorHandle, MonitorState};
pub use planner::{ContainerInventory, DatabaseInventory, TaskPlanner};
pub use queue::TaskQueue;
pub use record::{commit_records, SourceRecord};
pub use resolver::{Resolution, SplitMergeResolver};
pub use source_task::{PollSettings, SourceTask};
pub use task::{decode_task_units, encode_task_units, MetadataTaskUnit, RangeTaskUnit, TaskUnit};
pub use traits::{
    ChannelReconfigurationHook, CheckpointStore, FeedPage, FeedReader, InventoryQuery,
    ReadPosition, ReadRequest, ReconfigurationHook, ReconfigurationReason, ReconfigurationRequest,
};
pub use types::{ContainerDescriptor, FeedRange, SensitiveString};
