use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use jobsup_core::SupervisorError;
use jobsup_core::locator::{LocateError, Locator, LocatorStatus, NodeDirectory};
use jobsup_core::store::{InMemoryRecordStore, StoreError};
use jobsup_model::NodeIdentity;

fn object(content_length: u64, sharks: &[&str]) -> Value {
    let sharks: Vec<Value> = sharks
        .iter()
        .map(|id| json!({ "datacenter": "us-east-1", "manta_storage_id": id }))
        .collect();
    json!({
        "type": "object",
        "owner": "acct-1",
        "objectId": "obj-1",
        "contentLength": content_length,
        "roles": ["operator"],
        "sharks": sharks
    })
}

fn directory() -> NodeDirectory {
    let nodes = NodeDirectory::default();
    nodes.insert(
        "1.stor.example.com",
        NodeIdentity {
            compute_id: "cn-1".into(),
            zone_id: "zone-1".into(),
        },
    );
    nodes
}

async fn fixture() -> (Arc<InMemoryRecordStore>, Locator<InMemoryRecordStore>) {
    let store = Arc::new(InMemoryRecordStore::new());
    let locator = Locator::new(Arc::clone(&store), directory());
    locator.ready().await.unwrap();
    (store, locator)
}

#[tokio::test]
async fn empty_batch_never_touches_the_store() {
    let (store, locator) = fixture().await;

    let results = locator.locate(Vec::<String>::new()).await.unwrap();

    assert!(results.is_empty());
    assert_eq!(store.stats().lookups(), 0);
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_not_completion_order() {
    let (store, locator) = fixture().await;
    store.put_object("/acct/stor/k1", object(10, &["1.stor.example.com"])).await;
    store.delay_key("/acct/stor/k1", Duration::from_secs(3)).await;

    let results = locator
        .locate(["/acct/stor/k1", "/acct/stor/missing"])
        .await
        .unwrap();

    let keys: Vec<&str> = results.iter().map(|entry| entry.key.as_str()).collect();
    assert_eq!(keys, ["/acct/stor/k1", "/acct/stor/missing"]);
    assert_eq!(results.succeeded(), 1);
    assert_eq!(
        results.get("/acct/stor/missing"),
        Some(&Err(LocateError::ResourceNotFound))
    );

    let located = results.get("/acct/stor/k1").unwrap().as_ref().unwrap();
    assert_eq!(located.creator, "acct-1");
    assert_eq!(located.content_length, 10);
    assert_eq!(located.compute_targets().collect::<Vec<_>>(), ["cn-1"]);
}

#[tokio::test]
async fn duplicate_keys_are_reported_once_each() {
    let (store, locator) = fixture().await;
    store.put_object("k", object(1, &["1.stor.example.com"])).await;

    let results = locator.locate_all(["k", "k"]).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(store.stats().lookups(), 2);
}

#[tokio::test]
async fn results_collapse_into_a_map_by_key() {
    let (store, locator) = fixture().await;
    store.put_object("k", object(7, &["1.stor.example.com"])).await;

    let results = locator.locate_all(["k", "gone", "k"]).await.unwrap();
    let first = results.get("k").cloned();
    let map = results.into_map();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get("k").cloned(), first);
    assert_eq!(map["k"].as_ref().unwrap().content_length, 7);
    assert_eq!(map["gone"], Err(LocateError::ResourceNotFound));
}

#[tokio::test]
async fn empty_objects_need_no_copies() {
    let (store, locator) = fixture().await;
    store.put_object("empty", object(0, &[])).await;
    store.put_object("lost", object(100, &[])).await;

    let results = locator.locate_all(["empty", "lost"]).await.unwrap();

    let empty = results.get("empty").unwrap().as_ref().unwrap();
    assert!(empty.sharks.is_empty());
    let lost = results.get("lost").unwrap().as_ref().unwrap_err();
    assert_eq!(lost.code(), "InternalError");
}

#[tokio::test]
async fn unknown_storage_nodes_stay_unresolved() {
    let (store, locator) = fixture().await;
    store
        .put_object("k", object(5, &["1.stor.example.com", "9.stor.example.com"]))
        .await;

    let results = locator.locate_all(["k"]).await.unwrap();
    let located = results.get("k").unwrap().as_ref().unwrap();

    assert!(located.sharks[0].is_resolved());
    assert_eq!(located.sharks[1].manta_storage_id, "9.stor.example.com");
    assert_eq!(located.sharks[1].manta_compute_id, None);
    assert_eq!(located.sharks[1].zonename, None);
}

#[tokio::test]
async fn directories_and_store_failures_are_per_key() {
    let (store, locator) = fixture().await;
    store.put_object("dir", json!({ "type": "directory" })).await;
    store.put_object("ok", object(1, &["1.stor.example.com"])).await;
    store
        .fail_key("flaky", StoreError::Unavailable("connection reset".into()))
        .await;

    let results = locator.locate_all(["dir", "flaky", "ok"]).await.unwrap();

    assert_eq!(
        results.get("dir").unwrap().as_ref().unwrap_err().code(),
        "InvalidArgumentError"
    );
    let flaky = results.get("flaky").unwrap().as_ref().unwrap_err();
    assert_eq!(flaky.code(), "InternalError");
    assert!(flaky.to_string().starts_with("error locating object"));
    assert!(results.get("ok").unwrap().is_ok());
}

#[tokio::test]
async fn directory_refresh_applies_to_later_batches() {
    let (store, locator) = fixture().await;
    store.put_object("k", object(5, &["9.stor.example.com"])).await;

    let before = locator.locate_all(["k"]).await.unwrap();
    locator.nodes().insert(
        "9.stor.example.com",
        NodeIdentity {
            compute_id: "cn-9".into(),
            zone_id: "zone-9".into(),
        },
    );
    let after = locator.locate_all(["k"]).await.unwrap();

    let shark = |results: &jobsup_core::locator::LocateResults| {
        results.get("k").unwrap().as_ref().unwrap().sharks[0].clone()
    };
    assert!(!shark(&before).is_resolved());
    assert_eq!(shark(&after).manta_compute_id.as_deref(), Some("cn-9"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_batch_reports_cancellation() {
    let (store, locator) = fixture().await;
    store.put_object("slow", object(1, &[])).await;
    store.delay_key("slow", Duration::from_secs(60)).await;

    let batch = locator.locate(["slow"]);
    batch.cancel();
    assert!(batch.is_cancelled());

    let err = batch.join().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Cancelled(_)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_running_batches_once() {
    let (store, locator) = fixture().await;
    store.delay_key("slow", Duration::from_secs(60)).await;

    let batch = locator.locate(["slow"]);
    locator.shutdown().await;
    locator.shutdown().await;

    assert!(matches!(batch.await, Err(SupervisorError::Cancelled(_))));
    assert_eq!(locator.status(), LocatorStatus::Closed);
    assert_eq!(store.stats().closes(), 1);

    let late = locator.locate(["k"]).await;
    assert!(matches!(late, Err(SupervisorError::Cancelled(_))));
    assert!(matches!(locator.ready().await, Err(SupervisorError::Cancelled(_))));
}

#[tokio::test]
async fn ready_waits_for_the_store_connection() {
    let store = Arc::new(InMemoryRecordStore::disconnected());
    let locator = Arc::new(Locator::new(Arc::clone(&store), NodeDirectory::default()));
    let mut status = locator.subscribe();
    assert_eq!(locator.status(), LocatorStatus::Connecting);

    let waiting = tokio::spawn({
        let locator = Arc::clone(&locator);
        async move { locator.ready().await }
    });
    tokio::task::yield_now().await;
    assert!(!waiting.is_finished());

    store.set_connected(true);
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("ready() should resolve once connected")
        .unwrap()
        .unwrap();

    status
        .wait_for(|status| *status == LocatorStatus::Ready)
        .await
        .unwrap();
    locator.ready().await.unwrap();
}

#[tokio::test]
async fn unsupported_locator_kind_is_rejected() {
    let store = Arc::new(InMemoryRecordStore::new());
    let err = Locator::from_config(Some("local"), store, NodeDirectory::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid argument: unsupported value for property \"locator\": local"
    );
}
