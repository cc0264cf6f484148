//! Connector lifecycle
//!
//! The connector owns what is shared by all task instances: the initial
//! inventory fetch, the task plan and the metadata monitor. Reconfiguration
//! requests raised by the monitor arrive on a channel that the external
//! scheduler drains to trigger a new plan.

use crate::config::CosmosSourceConfig;
use crate::error::Result;
use crate::metrics::FeedMetrics;
use crate::monitor::{MetadataMonitor, MonitorHandle};
use crate::planner::{ContainerInventory, DatabaseInventory, TaskPlanner};
use crate::record::commit_records;
use crate::resolver::SplitMergeResolver;
use crate::source_task::{PollSettings, SourceTask};
use crate::task::TaskUnit;
use crate::traits::{
    ChannelReconfigurationHook, CheckpointStore, FeedReader, InventoryQuery, ReconfigurationRequest,
};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Change-feed source connector
pub struct CosmosSourceConnector {
    config: CosmosSourceConfig,
    inventory: Arc<dyn InventoryQuery>,
    store: Arc<dyn CheckpointStore>,
    monitor: Option<MonitorHandle>,
    reconfigurations: Option<mpsc::UnboundedReceiver<ReconfigurationRequest>>,
    metrics: Arc<FeedMetrics>,
}

impl CosmosSourceConnector {
    pub fn new(
        config: CosmosSourceConfig,
        inventory: Arc<dyn InventoryQuery>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            inventory,
            store,
            monitor: None,
            reconfigurations: None,
            metrics: Arc::new(FeedMetrics::new()),
        }
    }

    pub fn config(&self) -> &CosmosSourceConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    /// Query the live containers and their effective ranges
    pub async fn fetch_inventory(&self) -> Result<DatabaseInventory> {
        let database = &self.config.database;
        let containers = self
            .inventory
            .list_containers(database, &self.config.container_filter())
            .await?;

        let ranges = try_join_all(
            containers
                .iter()
                .map(|container| self.inventory.list_effective_ranges(database, container)),
        )
        .await?;

        Ok(DatabaseInventory {
            containers: containers
                .into_iter()
                .zip(ranges)
                .map(|(container, ranges)| ContainerInventory::new(container, ranges))
                .collect(),
        })
    }

    /// Plan task units from the live inventory and stored state
    pub async fn plan_tasks(&self) -> Result<Vec<Vec<TaskUnit>>> {
        let inventory = self.fetch_inventory().await?;
        TaskPlanner::new(&self.config)
            .plan(&inventory, self.store.as_ref())
            .await
    }

    /// Plan the initial task units and start the metadata monitor
    pub async fn start(&mut self) -> Result<Vec<Vec<TaskUnit>>> {
        let plan = self.plan_tasks().await?;

        if self.config.metadata.monitor_enabled && self.monitor.is_none() {
            let (hook, rx) = ChannelReconfigurationHook::new();
            let monitor = MetadataMonitor::new(
                &self.config,
                self.inventory.clone(),
                self.store.clone(),
                Arc::new(hook),
            )
            .with_metrics(self.metrics.clone());
            self.monitor = Some(Arc::new(monitor).spawn());
            self.reconfigurations = Some(rx);
        }

        info!(
            connector = %self.config.connector_name,
            database = %self.config.database,
            instances = plan.len(),
            "Connector started"
        );
        Ok(plan)
    }

    /// Receiver of reconfiguration requests; can be taken once per start
    pub fn take_reconfiguration_receiver(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ReconfigurationRequest>> {
        self.reconfigurations.take()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.as_ref().is_some_and(MonitorHandle::is_running)
    }

    /// Build a task instance for a planned unit list
    pub fn create_task(&self, task_id: impl Into<String>, reader: Arc<dyn FeedReader>) -> SourceTask {
        SourceTask::new(
            task_id,
            PollSettings::from(&self.config),
            reader,
            SplitMergeResolver::new(self.inventory.clone()),
        )
        .with_checkpoint_store(self.store.clone())
        .with_metrics(self.metrics.clone())
    }

    /// Stop the metadata monitor
    pub async fn stop(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        self.reconfigurations = None;
        info!(connector = %self.config.connector_name, "Connector stopped");
    }
}

/// Drive a task instance until shutdown.
///
/// Records of each poll are committed to `store` before the next poll.
/// Retryable errors back off and poll again; anything else stops the task.
/// A closed shutdown channel counts as a shutdown signal.
pub async fn run_task(
    mut task: SourceTask,
    units: Vec<TaskUnit>,
    store: Arc<dyn CheckpointStore>,
    idle_delay: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    task.start(units).await?;

    loop {
        // in-flight reads finish before shutdown is observed
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            task.stop();
            return Ok(());
        }

        let delay = match task.poll_once().await {
            Ok(records) if records.is_empty() => Some(idle_delay),
            Ok(records) => {
                commit_records(store.as_ref(), &records).await?;
                debug!(task = %task.task_id(), records = records.len(), "Committed records");
                None
            }
            Err(e) if e.is_retryable() => {
                warn!(task = %task.task_id(), error = %e, "Poll failed, retrying");
                Some(idle_delay)
            }
            Err(e) => {
                error!(task = %task.task_id(), error = %e, "Poll failed, stopping task");
                task.stop();
                return Err(e);
            }
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    task.stop();
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
