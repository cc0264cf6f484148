//! Range lifecycle tests: polling, splits, merges, restarts and monitoring
//!
//! Everything runs against the in-memory collaborators from
//! `rivven_cosmos::testing`, so no external services are needed.
//!
//! Run with: cargo test -p rivven-cosmos --test range_lifecycle

use rivven_cosmos::testing::{
    InMemoryCheckpointStore, InMemoryFeed, InMemoryInventory, RecordingReconfigurationHook,
};
use rivven_cosmos::{
    commit_records, metadata_records, CheckpointState, ContainerDescriptor, CosmosError,
    CosmosSourceConfig, FeedRange, MetadataMonitor, MetadataTaskUnit, PollSettings,
    RangeTaskUnit, ReconfigurationReason, SourceTask, SplitMergeResolver, TaskUnit,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const DATABASE: &str = "shop";

fn orders() -> ContainerDescriptor {
    ContainerDescriptor::new("orders", "rid-orders")
}

fn range(min: &str, max: &str) -> FeedRange {
    FeedRange::new(min, max)
}

fn unit(r: FeedRange, token: Option<&str>) -> RangeTaskUnit {
    let checkpoint = token.map(|t| CheckpointState::new(t, Some("7".into()), r.clone()));
    RangeTaskUnit::new(DATABASE, "orders", "rid-orders", r, "orders-topic").with_checkpoint(checkpoint)
}

fn source_task(feed: &InMemoryFeed, inventory: &InMemoryInventory) -> SourceTask {
    SourceTask::new(
        "task-0",
        PollSettings::default(),
        Arc::new(feed.clone()),
        SplitMergeResolver::new(Arc::new(inventory.clone())),
    )
}

fn queued_ranges(task: &SourceTask) -> Vec<FeedRange> {
    task.queue().range_units().map(|u| u.feed_range.clone()).collect()
}

fn config() -> CosmosSourceConfig {
    CosmosSourceConfig::from_yaml_str(
        r#"
endpoint: https://localhost:8081/
key: secret
connector_name: orders-feed
database: shop
containers:
  include: [orders]
metadata:
  poll_delay_ms: 1000
"#,
    )
    .unwrap()
}

async fn publish_snapshot(store: &InMemoryCheckpointStore, ranges: Vec<FeedRange>) {
    let unit = MetadataTaskUnit {
        database_name: DATABASE.into(),
        connector_name: "orders-feed".into(),
        container_rids: vec![orders().rid],
        container_ranges: BTreeMap::from([(orders().rid, ranges)]),
        topic: "_cosmos.metadata.topic".into(),
    };
    commit_records(store, &metadata_records(&unit).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_split_replaces_parent_with_children_at_tail() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(
        DATABASE,
        orders(),
        vec![range("A", "G"), range("G", "M"), range("M", "Z")],
    );
    let feed = InMemoryFeed::new();
    feed.push_gone(&range("A", "M"));

    let mut task = source_task(&feed, &inventory);
    let untouched = unit(range("M", "Z"), Some("t-mz"));
    task.start(vec![unit(range("A", "M"), Some("t-am")).into(), untouched.clone().into()])
        .await
        .unwrap();

    let records = task.poll_once().await.unwrap();
    assert!(records.is_empty());

    let units: Vec<_> = task.queue().range_units().cloned().collect();
    assert_eq!(units.len(), 3);
    assert_eq!(units[0], untouched);
    assert_eq!(units[1].feed_range, range("A", "G"));
    assert_eq!(units[2].feed_range, range("G", "M"));
    for child in &units[1..] {
        let checkpoint = child.checkpoint.as_ref().unwrap();
        assert_eq!(checkpoint.continuation_token, "t-am");
        assert_eq!(checkpoint.target_range, child.feed_range);
    }
    assert_eq!(task.metrics().snapshot().splits, 1);
}

#[tokio::test]
async fn test_merge_keeps_queue_and_checkpoint() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("A", "Z")]);
    let feed = InMemoryFeed::new();
    feed.push_gone(&range("A", "M"));

    let mut task = source_task(&feed, &inventory);
    let left = unit(range("A", "M"), Some("t-am"));
    let right = unit(range("M", "Z"), Some("t-mz"));
    task.start(vec![left.clone().into(), right.clone().into()])
        .await
        .unwrap();

    assert!(task.poll_once().await.unwrap().is_empty());

    let units: Vec<_> = task.queue().range_units().cloned().collect();
    assert_eq!(units, vec![right, left]);
    assert_eq!(task.metrics().snapshot().merges, 1);
}

#[tokio::test]
async fn test_missing_successor_keeps_unit_and_surfaces_error() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("M", "Z")]);
    let feed = InMemoryFeed::new();
    feed.push_gone(&range("A", "M"));

    let mut task = source_task(&feed, &inventory);
    let gone = unit(range("A", "M"), Some("t-am"));
    task.start(vec![gone.clone().into()]).await.unwrap();

    let err = task.poll_once().await.unwrap_err();
    assert!(matches!(err, CosmosError::ResolverInconsistency { .. }));
    assert_eq!(task.queue().range_units().cloned().collect::<Vec<_>>(), vec![gone]);
}

async fn poll_keeping_coverage(task: &mut SourceTask, assigned: &FeedRange, polls: usize) {
    for _ in 0..polls {
        let _ = task.poll_once().await;
        let ranges = queued_ranges(task);
        assert!(assigned.is_covered_by(&ranges), "gap in {:?}", ranges);
    }
}

#[tokio::test]
async fn test_key_space_stays_covered_across_topology_changes() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("A", "M"), range("M", "Z")]);
    let feed = InMemoryFeed::new();
    let assigned = range("A", "Z");

    let mut task = source_task(&feed, &inventory);
    task.start(vec![unit(range("A", "M"), None).into(), unit(range("M", "Z"), None).into()])
        .await
        .unwrap();

    // [A,M) splits in two while [M,Z) is throttled once
    inventory.split_range(DATABASE, &orders().rid, &range("A", "M"), vec![range("A", "G"), range("G", "M")]);
    feed.push_gone(&range("A", "M"));
    feed.push_error(&range("M", "Z"), CosmosError::Throttled("429".into()));
    poll_keeping_coverage(&mut task, &assigned, 4).await;

    // then [G,M) splits again
    inventory.split_range(DATABASE, &orders().rid, &range("G", "M"), vec![range("G", "J"), range("J", "M")]);
    feed.push_gone(&range("G", "M"));
    feed.push_page(&range("M", "Z"), vec![json!({"id": "x", "_lsn": 3})], "t1");
    poll_keeping_coverage(&mut task, &assigned, 6).await;

    let mut ranges = queued_ranges(&task);
    ranges.sort();
    assert_eq!(
        ranges,
        vec![range("A", "G"), range("G", "J"), range("J", "M"), range("M", "Z")]
    );
    assert_eq!(task.metrics().snapshot().splits, 2);
}

#[tokio::test]
async fn test_checkpoint_only_moves_on_successful_reads() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("A", "Z")]);
    let feed = InMemoryFeed::new();
    let r = range("A", "Z");
    feed.push_page(&r, vec![json!({"id": "a", "_lsn": 1})], "t1");
    feed.push_error(&r, CosmosError::transient("reset"));
    feed.push_page(&r, vec![], "t2");

    let mut task = source_task(&feed, &inventory);
    task.start(vec![unit(r.clone(), None).into()]).await.unwrap();

    let token = |task: &SourceTask| {
        task.queue()
            .range_units()
            .next()
            .and_then(|u| u.checkpoint.clone())
            .map(|c| (c.continuation_token, c.item_sequence))
    };

    task.poll_once().await.unwrap();
    assert_eq!(token(&task), Some(("t1".to_string(), Some("1".to_string()))));

    task.poll_once().await.unwrap_err();
    assert_eq!(token(&task), Some(("t1".to_string(), Some("1".to_string()))));

    // an empty page moves the token but keeps the last item sequence
    task.poll_once().await.unwrap();
    assert_eq!(token(&task), Some(("t2".to_string(), Some("1".to_string()))));
}

#[tokio::test]
async fn test_restart_resumes_from_committed_offsets() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("A", "M"), range("M", "Z")]);
    let store = InMemoryCheckpointStore::new();
    let feed = InMemoryFeed::new();
    feed.push_page(&range("A", "M"), vec![json!({"id": "a", "_lsn": 10})], "t-am-1");

    let mut first = source_task(&feed, &inventory);
    first
        .start(vec![unit(range("A", "M"), None).into(), unit(range("M", "Z"), None).into()])
        .await
        .unwrap();
    for _ in 0..2 {
        let records = first.poll_once().await.unwrap();
        commit_records(&store, &records).await.unwrap();
    }
    first.stop();

    let mut second = source_task(&feed, &inventory).with_checkpoint_store(Arc::new(store.clone()));
    second
        .start(vec![unit(range("A", "M"), None).into(), unit(range("M", "Z"), None).into()])
        .await
        .unwrap();

    let units: Vec<_> = second.queue().range_units().collect();
    let resumed = units[0].checkpoint.as_ref().unwrap();
    assert_eq!(resumed.continuation_token, "t-am-1");
    assert_eq!(resumed.item_sequence.as_deref(), Some("10"));
    // nothing was emitted for [M,Z), so nothing to resume from
    assert!(units[1].checkpoint.is_none());
}

#[tokio::test]
async fn test_monitor_requests_once_for_new_container() {
    let inventory = InMemoryInventory::new();
    let store = InMemoryCheckpointStore::new();
    let hook = RecordingReconfigurationHook::new();

    let c1 = ContainerDescriptor::new("c1", "rid-c1");
    let c2 = ContainerDescriptor::new("c2", "rid-c2");
    let snapshot = MetadataTaskUnit {
        database_name: DATABASE.into(),
        connector_name: "orders-feed".into(),
        container_rids: vec![c1.rid.clone(), c2.rid.clone()],
        container_ranges: BTreeMap::from([
            (c1.rid.clone(), vec![FeedRange::full()]),
            (c2.rid.clone(), vec![FeedRange::full()]),
        ]),
        topic: "_cosmos.metadata.topic".into(),
    };
    commit_records(&store, &metadata_records(&snapshot).unwrap())
        .await
        .unwrap();

    inventory.add_container(DATABASE, c1);
    inventory.add_container(DATABASE, c2);
    inventory.add_container(DATABASE, ContainerDescriptor::new("c3", "rid-c3"));

    let mut config = config();
    config.containers.include_all = true;
    let monitor = MetadataMonitor::new(
        &config,
        Arc::new(inventory.clone()),
        Arc::new(store.clone()),
        Arc::new(hook.clone()),
    );

    assert_eq!(monitor.tick().await, Some(ReconfigurationReason::ContainersChanged));
    assert_eq!(hook.count(), 1);
    assert_eq!(hook.requests()[0].connector_name, "orders-feed");
}

#[tokio::test]
async fn test_poll_loop_split_then_monitor_requests_rebalance() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(
        DATABASE,
        orders(),
        vec![range("A", "G"), range("G", "M"), range("M", "Z")],
    );
    let store = InMemoryCheckpointStore::new();
    publish_snapshot(&store, vec![range("A", "M"), range("M", "Z")]).await;
    let hook = RecordingReconfigurationHook::new();

    let feed = InMemoryFeed::new();
    feed.push_gone(&range("A", "M"));
    let mut task = source_task(&feed, &inventory);
    task.start(vec![unit(range("A", "M"), Some("t")).into(), unit(range("M", "Z"), Some("u")).into()])
        .await
        .unwrap();
    task.poll_once().await.unwrap();
    // the poll loop never talks to the scheduler
    assert_eq!(hook.count(), 0);

    let monitor = MetadataMonitor::new(
        &config(),
        Arc::new(inventory.clone()),
        Arc::new(store.clone()),
        Arc::new(hook.clone()),
    );
    assert_eq!(
        monitor.tick().await,
        Some(ReconfigurationReason::RangesSplit {
            container_rids: vec![orders().rid]
        })
    );
    assert_eq!(hook.count(), 1);
}

#[tokio::test]
async fn test_merge_never_requests_reconfiguration() {
    let inventory = InMemoryInventory::new();
    inventory.set_ranges(DATABASE, orders(), vec![range("A", "Z")]);
    let store = InMemoryCheckpointStore::new();
    publish_snapshot(&store, vec![range("A", "M"), range("M", "Z")]).await;
    let hook = RecordingReconfigurationHook::new();

    let monitor = MetadataMonitor::new(
        &config(),
        Arc::new(inventory.clone()),
        Arc::new(store.clone()),
        Arc::new(hook.clone()),
    );
    for _ in 0..3 {
        assert_eq!(monitor.tick().await, None);
    }
    assert_eq!(hook.count(), 0);
}

#[tokio::test]
async fn test_metadata_unit_serialized_with_range_units() {
    let units = vec![
        TaskUnit::from(unit(range("A", "M"), Some("t"))),
        TaskUnit::from(MetadataTaskUnit {
            database_name: DATABASE.into(),
            connector_name: "orders-feed".into(),
            container_rids: vec![orders().rid],
            container_ranges: BTreeMap::from([(orders().rid, vec![range("A", "M")])]),
            topic: "_cosmos.metadata.topic".into(),
        }),
    ];
    let encoded = rivven_cosmos::encode_task_units(&units).unwrap();
    let decoded = rivven_cosmos::decode_task_units(&encoded).unwrap();

    let mut task = source_task(&InMemoryFeed::new(), &InMemoryInventory::new());
    task.start(decoded).await.unwrap();
    assert!(task.queue().iter().next().unwrap().is_metadata());
}
