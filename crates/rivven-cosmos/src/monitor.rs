//! Metadata monitor
//!
//! A periodic task that compares the live container/range inventory with the
//! last published [`InventorySnapshot`] and asks the scheduler to regenerate
//! task units when the topology drifted:
//!
//! ```text
//! Idle -> Comparing -> Idle
//!                   -> ReconfigurationRequested
//! ```
//!
//! Container additions, removals and re-creations always request a
//! reconfiguration. Range changes only do when one of the recorded ranges was
//! split; merges are absorbed by the task already reading the merged range.
//!
//! The monitor never touches a task queue. Query failures are logged and the
//! comparison is retried on the next tick.

use crate::config::{ContainerFilter, CosmosSourceConfig};
use crate::error::{CosmosError, Result};
use crate::metadata::InventorySnapshot;
use crate::metrics::FeedMetrics;
use crate::resolver::{Resolution, SplitMergeResolver};
use crate::traits::{
    CheckpointStore, InventoryQuery, ReconfigurationHook, ReconfigurationReason,
    ReconfigurationRequest,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where the monitor is in its tick cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Comparing,
    ReconfigurationRequested,
}

/// Compares live inventory against the persisted snapshot
pub struct MetadataMonitor {
    connector_name: String,
    database: String,
    filter: ContainerFilter,
    poll_delay: Duration,
    inventory: Arc<dyn InventoryQuery>,
    resolver: SplitMergeResolver,
    store: Arc<dyn CheckpointStore>,
    hook: Arc<dyn ReconfigurationHook>,
    state: Mutex<MonitorState>,
    running: Arc<AtomicBool>,
    metrics: Arc<FeedMetrics>,
}

impl MetadataMonitor {
    pub fn new(
        config: &CosmosSourceConfig,
        inventory: Arc<dyn InventoryQuery>,
        store: Arc<dyn CheckpointStore>,
        hook: Arc<dyn ReconfigurationHook>,
    ) -> Self {
        Self {
            connector_name: config.connector_name.clone(),
            database: config.database.clone(),
            filter: config.container_filter(),
            poll_delay: config.metadata.poll_delay(),
            resolver: SplitMergeResolver::new(inventory.clone()),
            inventory,
            store,
            hook,
            state: Mutex::new(MonitorState::Idle),
            running: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(FeedMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<FeedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one comparison and notify the scheduler at most once.
    ///
    /// Returns the reason when a reconfiguration was requested. Errors are
    /// logged and swallowed.
    pub async fn tick(&self) -> Option<ReconfigurationReason> {
        *self.state.lock() = MonitorState::Comparing;
        self.metrics.record_monitor_tick();

        match self.check_once().await {
            Ok(Some(reason)) => {
                info!(
                    connector = %self.connector_name,
                    reason = %reason,
                    "Requesting task reconfiguration"
                );
                self.hook.request_reconfiguration(ReconfigurationRequest {
                    connector_name: self.connector_name.clone(),
                    reason: reason.clone(),
                });
                self.metrics.record_reconfiguration();
                *self.state.lock() = MonitorState::ReconfigurationRequested;
                Some(reason)
            }
            Ok(None) => {
                *self.state.lock() = MonitorState::Idle;
                None
            }
            Err(e) => {
                self.metrics.record_error();
                warn!(
                    connector = %self.connector_name,
                    error = %e,
                    "Metadata comparison failed, retrying next tick"
                );
                *self.state.lock() = MonitorState::Idle;
                None
            }
        }
    }

    /// Compare the live inventory with the snapshot without notifying anyone
    pub async fn check_once(&self) -> Result<Option<ReconfigurationReason>> {
        let Some(snapshot) =
            InventorySnapshot::load(self.store.as_ref(), &self.database, &self.connector_name)
                .await?
        else {
            debug!(
                connector = %self.connector_name,
                "No inventory snapshot published yet, skipping"
            );
            return Ok(None);
        };

        let live = self
            .inventory
            .list_containers(&self.database, &self.filter)
            .await?;

        let live_rids: BTreeSet<&str> = live.iter().map(|c| c.rid.as_str()).collect();
        let known_rids: BTreeSet<&str> = snapshot.container_rids.iter().map(String::as_str).collect();
        if live_rids != known_rids {
            info!(
                connector = %self.connector_name,
                added = live_rids.difference(&known_rids).count(),
                removed = known_rids.difference(&live_rids).count(),
                "Container set changed"
            );
            return Ok(Some(ReconfigurationReason::ContainersChanged));
        }

        let mut split_rids = Vec::new();
        for container in &live {
            let live_ranges: BTreeSet<_> = self
                .inventory
                .list_effective_ranges(&self.database, container)
                .await?
                .into_iter()
                .collect();
            let known = snapshot.ranges_of(&container.rid);

            let mut split = false;
            for gone in known.iter().filter(|r| !live_ranges.contains(*r)) {
                match self.resolver.resolve(&self.database, container, gone).await {
                    Ok(Resolution::Split(_)) => split = true,
                    Ok(Resolution::Merge(_)) => {}
                    Err(CosmosError::ResolverInconsistency { .. }) => {
                        debug!(
                            container = %container.rid,
                            range = %gone,
                            "No overlapping range left, treating as absorbed"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            if split {
                split_rids.push(container.rid.clone());
            }
        }

        if split_rids.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ReconfigurationReason::RangesSplit {
                container_rids: split_rids,
            }))
        }
    }

    /// Start ticking every `poll_delay` on the current runtime
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();

        let monitor = self;
        let join = tokio::spawn(async move {
            info!(
                connector = %monitor.connector_name,
                delay_ms = monitor.poll_delay.as_millis() as u64,
                "Metadata monitor started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(monitor.poll_delay) => {}
                }
                if !monitor.running.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = monitor.tick() => {}
                }
            }
            monitor.running.store(false, Ordering::Release);
            info!(connector = %monitor.connector_name, "Metadata monitor stopped");
        });

        MonitorHandle {
            running,
            shutdown_tx,
            join: Some(join),
        }
    }
}

/// Owner side of a spawned monitor
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag, cancel any in-flight tick and wait for the loop to exit
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "Metadata monitor task panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = &self.join {
            join.abort();
        }
    }
}
