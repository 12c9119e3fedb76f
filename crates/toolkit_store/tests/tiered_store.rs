// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Local-view guarantees of the tiered store.

use std::sync::Arc;
use std::time::Duration;

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use tick::Clock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use toolkit_store::{CacheEvent, StoreSettings, TieredStore};
use toolkit_tier::testing::{BackendOp, MockBackend};
use toolkit_tier::{BackendEntry, CacheListener, EntryMetadata, ErrorKind, codec};

type Store<V = String> = TieredStore<String, V, MockBackend>;

fn store_on(backend: &MockBackend, on_heap_capacity: usize) -> Store {
    let settings = StoreSettings {
        on_heap_capacity,
        ..StoreSettings::default()
    };
    TieredStore::new("orders", Arc::new(backend.clone()), Clock::new_frozen(), settings).unwrap()
}

fn meta() -> EntryMetadata {
    EntryMetadata::new(0)
}

struct Forward(UnboundedSender<CacheEvent<String>>);

impl CacheListener<String> for Forward {
    fn on_eviction(&self, key: &String) {
        self.0.send(CacheEvent::Evicted(key.clone())).unwrap();
    }

    fn on_expiration(&self, key: &String) {
        self.0.send(CacheEvent::Expired(key.clone())).unwrap();
    }
}

fn listener() -> (Arc<dyn CacheListener<String>>, UnboundedReceiver<CacheEvent<String>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Forward(tx)), rx)
}

/// Fills a two-entry tier with `a` then `b`, reads `a`, then adds `c`; returns the keys left.
async fn survivors_after_read(quiet: bool) -> Vec<String> {
    let backend = MockBackend::new();
    let store = store_on(&backend, 2);
    store.put("a".into(), "1".into(), meta()).await.unwrap();
    store.put("b".into(), "2".into(), meta()).await.unwrap();

    assert_eq!(store.unlocked_get(&"a".into(), quiet).await.unwrap().as_deref(), Some("1"));
    store.put("c".into(), "3".into(), meta()).await.unwrap();

    let mut keys: Vec<String> = store.local_key_set().unwrap().into_iter().collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn quiet_reads_do_not_change_eviction_order() {
    assert_eq!(survivors_after_read(true).await, vec!["b", "c"]);
    assert_eq!(survivors_after_read(false).await, vec!["a", "c"]);
}

#[tokio::test]
async fn unsafe_local_get_never_fetches() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 10);
    backend.seed(
        "orders",
        codec::encode("remote").unwrap(),
        BackendEntry::new(codec::encode("value").unwrap(), meta()),
    );

    assert_eq!(store.unsafe_local_get(&"remote".into()).unwrap(), None);
    assert!(backend.operations().is_empty());
}

#[tokio::test]
async fn remove_all_reports_partial_failure_without_rollback() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 10);
    for key in ["a", "b", "c"] {
        store.put(key.into(), key.into(), meta()).await.unwrap();
    }

    let failing = codec::encode("b").unwrap();
    backend.fail_when(move |op| matches!(op, BackendOp::Remove { key, .. } if *key == failing));

    let outcome = store.remove_all(["a".to_owned(), "b".to_owned(), "c".to_owned()]).await.unwrap();
    assert_eq!(outcome.removed(), ["a".to_owned(), "c".to_owned()]);
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].0, "b");
    assert_eq!(outcome.failures()[0].1.kind(), ErrorKind::Backend);
    assert!(!outcome.is_complete());

    assert_eq!(backend.entry_count("orders"), 1);
    assert!(backend.entry("orders", &codec::encode("b").unwrap()).is_some());
    assert!(store.contains_local_key(&"b".into()).unwrap());
    assert!(!store.contains_local_key(&"a".into()).unwrap());
}

#[tokio::test]
async fn remove_all_reports_keys_left_when_the_cluster_goes_away() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 10);
    for key in ["a", "b", "c"] {
        store.put(key.into(), key.into(), meta()).await.unwrap();
    }

    let cut_at = codec::encode("b").unwrap();
    let cluster = backend.clone();
    backend.fail_when(move |op| {
        if matches!(op, BackendOp::Remove { key, .. } if *key == cut_at) {
            cluster.set_reachable(false);
        }
        false
    });

    let outcome = store.remove_all(["a".to_owned(), "b".to_owned(), "c".to_owned()]).await.unwrap();
    assert_eq!(outcome.removed(), ["a".to_owned()]);
    let failed: Vec<(&str, ErrorKind)> = outcome.failures().iter().map(|(key, error)| (key.as_str(), error.kind())).collect();
    assert_eq!(failed, vec![("b", ErrorKind::ClusterUnavailable), ("c", ErrorKind::ClusterUnavailable)]);

    assert!(backend.entry("orders", &codec::encode("a").unwrap()).is_none());
    assert_eq!(backend.entry_count("orders"), 2);
    assert!(
        !backend
            .operations()
            .iter()
            .any(|op| matches!(op, BackendOp::Remove { key, .. } if *key == codec::encode("c").unwrap()))
    );
}

#[tokio::test]
async fn remove_all_fails_outright_when_nothing_was_removed() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 10);
    backend.set_reachable(false);

    let err = store.remove_all(["a".to_owned(), "b".to_owned()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClusterUnavailable);
}

#[tokio::test]
async fn disposal_is_local_to_one_instance() {
    let backend = MockBackend::new();
    let disposed = store_on(&backend, 10);
    let other = store_on(&backend, 10);
    disposed.put("a".into(), "1".into(), meta()).await.unwrap();

    disposed.dispose_locally().unwrap();

    let err = disposed.put("b".into(), "2".into(), meta()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    assert_eq!(disposed.local_size().unwrap_err().kind(), ErrorKind::IllegalState);
    assert_eq!(disposed.unsafe_local_get(&"a".into()).unwrap_err().kind(), ErrorKind::IllegalState);

    other.put("b".into(), "2".into(), meta()).await.unwrap();
    assert_eq!(other.get(&"a".into()).await.unwrap().as_deref(), Some("1"));
    assert_eq!(backend.entry_count("orders"), 2);
}

#[tokio::test]
async fn each_evicted_key_is_reported_once() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 3);
    let (listener, mut events) = listener();
    store.add_listener(listener).unwrap();

    for key in ["k0", "k1", "k2", "k3", "k4"] {
        store.put(key.into(), key.into(), meta()).await.unwrap();
    }

    assert_eq!(events.recv().await, Some(CacheEvent::Evicted("k0".into())));
    assert_eq!(events.recv().await, Some(CacheEvent::Evicted("k1".into())));
    assert!(tokio::time::timeout(Duration::from_millis(50), events.recv()).await.is_err());
    assert_eq!(store.local_on_heap_size().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_producers_report_evictions_in_occurrence_order() {
    const THREADS: usize = 4;
    const PUTS: usize = 200;

    let backend = MockBackend::new();
    let store = store_on(&backend, 1);
    let (listener, mut events) = listener();
    store.add_listener(listener).unwrap();

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let store = &store;
            scope.spawn(move || {
                for i in 0..PUTS {
                    store.local_put(format!("{thread}-{i:03}"), String::new(), meta()).unwrap();
                }
            });
        }
    });

    // With room for one entry, every install evicts the previous one, so the
    // eviction sequence followed by the survivor is the global install order.
    let mut order = Vec::with_capacity(THREADS * PUTS);
    for _ in 1..THREADS * PUTS {
        let Some(CacheEvent::Evicted(key)) = events.recv().await else {
            panic!("expected only evictions");
        };
        order.push(key);
    }
    order.extend(store.local_key_set().unwrap());

    for thread in 0..THREADS {
        let prefix = format!("{thread}-");
        let installed: Vec<&String> = order.iter().filter(|key| key.starts_with(&prefix)).collect();
        assert_eq!(installed.len(), PUTS);
        assert!(installed.windows(2).all(|pair| pair[0] < pair[1]), "keys of thread {thread} reported out of order");
    }
}

#[tokio::test]
async fn removed_listener_stops_receiving() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 1);
    let (listener, mut events) = listener();
    store.add_listener(Arc::clone(&listener)).unwrap();

    store.local_put("a".into(), "1".into(), meta()).unwrap();
    store.local_put("b".into(), "2".into(), meta()).unwrap();
    assert_eq!(events.recv().await, Some(CacheEvent::Evicted("a".into())));

    assert!(store.remove_listener(&listener).unwrap());
    store.local_put("c".into(), "3".into(), meta()).unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(50), events.recv()).await.is_err());
}

#[derive(Clone, Debug, Deserialize)]
struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("cannot leave the process"))
    }
}

#[tokio::test]
async fn unserializable_values_fail_before_any_backend_call() {
    let backend = MockBackend::new();
    let store: Store<Unserializable> =
        TieredStore::new("orders", Arc::new(backend.clone()), Clock::new_frozen(), StoreSettings::default()).unwrap();

    let err = store.put("a".into(), Unserializable, meta()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSerializable);

    let err = store.unlocked_put_no_return("a".into(), Unserializable, meta()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSerializable);

    assert!(backend.operations().is_empty());
    assert_eq!(store.local_size().unwrap(), 0);
}

#[tokio::test]
async fn unreachable_cluster_surfaces_as_cluster_unavailable() {
    let backend = MockBackend::new();
    let store = store_on(&backend, 10);
    store.local_put("a".into(), "local".into(), meta()).unwrap();
    backend.set_reachable(false);

    let err = store.get(&"a".into()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClusterUnavailable);
    assert_eq!(store.unsafe_local_get(&"a".into()).unwrap().as_deref(), Some("local"));
}
