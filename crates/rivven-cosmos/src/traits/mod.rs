//! Collaborator interfaces consumed by the engine
//!
//! The change-feed read RPC, the inventory queries, the checkpoint store and
//! the task scheduler live outside this crate. The engine only talks to them
//! through these traits; `crate::testing` provides in-memory versions.

pub mod inventory;
pub mod reader;
pub mod scheduler;
pub mod store;

pub use inventory::InventoryQuery;
pub use reader::{FeedPage, FeedReader, ReadPosition, ReadRequest};
pub use scheduler::{
    ChannelReconfigurationHook, ReconfigurationHook, ReconfigurationReason, ReconfigurationRequest,
};
pub use store::CheckpointStore;
