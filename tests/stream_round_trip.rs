//! Integration tests for appending and replaying streams through the public API.
//!
//! Every test runs against `MemoryKv` and, where the behavior is shared, in all
//! three persistence modes.

use std::num::NonZeroUsize;

use eventslice::{
    Error, EventStore, ExpectedVersion, MemoryKv, PersistenceMode, ProposedEvent, StoreConfig,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

const MODES: [PersistenceMode; 3] = [
    PersistenceMode::AtomicBatch,
    PersistenceMode::AtomicSlice,
    PersistenceMode::TwoPhase,
];

fn store(mode: PersistenceMode) -> EventStore<MemoryKv> {
    EventStore::new(MemoryKv::new(), StoreConfig::new(mode))
}

fn named(names: &[&str]) -> Vec<ProposedEvent> {
    names
        .iter()
        .map(|n| ProposedEvent::new(*n, json!({ "event": n })))
        .collect()
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ItemAdded {
    sku: String,
    quantity: u32,
}

#[tokio::test]
async fn round_trip_preserves_order_names_and_payloads() {
    for mode in MODES {
        let store = store(mode);
        let v1 = store
            .append("cart-1", ExpectedVersion::NoStream, named(&["Created", "ItemAdded"]))
            .await
            .expect("first append");
        let v2 = store
            .append("cart-1", ExpectedVersion::Exact(v1), named(&["CheckedOut"]))
            .await
            .expect("second append");
        assert_eq!((v1, v2), (2, 3), "{mode}");

        let loaded = store.load("cart-1", 0).await.expect("load");
        let names: Vec<&str> = loaded.events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["Created", "ItemAdded", "CheckedOut"], "{mode}");
        let versions: Vec<u64> = loaded.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3], "{mode}");
        assert_eq!(loaded.events[2].payload, json!({ "event": "CheckedOut" }));
        assert_eq!(loaded.version, 3, "{mode}");
    }
}

#[tokio::test]
async fn event_ids_survive_storage() {
    for mode in MODES {
        let store = store(mode);
        let events = named(&["A", "B"]);
        let ids: Vec<_> = events.iter().map(|e| e.event_id).collect();
        store
            .append("s", ExpectedVersion::Any, events)
            .await
            .expect("append");

        let loaded = store.load("s", 0).await.expect("load");
        let loaded_ids: Vec<_> = loaded.events.iter().map(|e| e.event_id).collect();
        assert_eq!(loaded_ids, ids, "{mode}");
    }
}

#[tokio::test]
async fn typed_payloads_round_trip() {
    let store = store(PersistenceMode::AtomicSlice);
    let added = ItemAdded {
        sku: "A-1".into(),
        quantity: 2,
    };
    let event = ProposedEvent::from_serialize("ItemAdded", &added).expect("serialize");
    store
        .append("cart-7", ExpectedVersion::NoStream, vec![event])
        .await
        .expect("append");

    let loaded = store.load("cart-7", 0).await.expect("load");
    let decoded: ItemAdded = loaded.events[0].payload_as().expect("payload");
    assert_eq!(decoded, added);

    let wrong = loaded.events[0].payload_as::<Vec<u8>>().unwrap_err();
    assert!(matches!(wrong, Error::CorruptRecord { .. }), "got: {wrong:?}");
}

#[tokio::test]
async fn partial_replay_returns_only_newer_events() {
    for mode in MODES {
        let store = store(mode);
        store
            .append("s", ExpectedVersion::Any, named(&["a", "b", "c"]))
            .await
            .expect("first");
        store
            .append("s", ExpectedVersion::Any, named(&["d", "e"]))
            .await
            .expect("second");

        for from in 0..=5u64 {
            let loaded = store.load("s", from).await.expect("load");
            let versions: Vec<u64> = loaded.events.iter().map(|e| e.version).collect();
            assert_eq!(versions, (from + 1..=5).collect::<Vec<_>>(), "{mode} from {from}");
            assert_eq!(loaded.version, 5, "{mode} from {from}");
        }
    }
}

#[tokio::test]
async fn empty_and_unknown_streams() {
    for mode in MODES {
        let store = store(mode);
        let loaded = store.load("ghost", 0).await.expect("load");
        assert!(loaded.events.is_empty());
        assert_eq!(loaded.version, 0);
        assert_eq!(store.version("ghost").await.expect("version"), 0);

        let version = store
            .append("ghost", ExpectedVersion::Exact(42), Vec::new())
            .await
            .expect("empty append");
        assert_eq!(version, 0, "{mode}");
        assert!(store.kv().keys("statestore").is_empty(), "{mode}");
    }
}

#[tokio::test]
async fn bulk_reads_are_chunked() {
    let chunk = NonZeroUsize::new(20).expect("nonzero");
    let store = EventStore::new(
        MemoryKv::new(),
        StoreConfig::new(PersistenceMode::AtomicBatch).with_bulk_chunk_size(chunk),
    );
    let events = (0..30)
        .map(|i| ProposedEvent::new("Tick", json!({ "i": i })))
        .collect();
    store
        .append("ticks", ExpectedVersion::NoStream, events)
        .await
        .expect("append");

    let before = store.kv().calls().bulk_gets;
    let loaded = store.load("ticks", 0).await.expect("load");
    assert_eq!(store.kv().calls().bulk_gets - before, 2);
    assert_eq!(loaded.events.len(), 30);
    assert!(loaded.events.windows(2).all(|w| w[0].version + 1 == w[1].version));
    assert_eq!(loaded.events[29].payload, json!({ "i": 29 }));
}

#[tokio::test]
async fn streaming_load_matches_buffered_load() {
    for mode in MODES {
        let chunk = NonZeroUsize::new(3).expect("nonzero");
        let store = EventStore::new(
            MemoryKv::new(),
            StoreConfig::new(mode).with_bulk_chunk_size(chunk),
        );
        for batch in [2usize, 4, 1, 3] {
            let events = (0..batch)
                .map(|i| ProposedEvent::new("Tick", json!(i)))
                .collect();
            store.append_any("s", events).await.expect("append");
        }

        let buffered = store.load("s", 2).await.expect("load").events;
        let streamed: Vec<_> = store
            .load_stream("s", 2)
            .map(|r| r.expect("record"))
            .collect()
            .await;
        assert_eq!(streamed, buffered, "{mode}");
        assert_eq!(streamed.len(), 8, "{mode}");
    }
}

#[tokio::test]
async fn stores_with_different_names_are_isolated() {
    let kv = std::sync::Arc::new(MemoryKv::new());
    let orders = EventStore::from_arc(
        kv.clone(),
        StoreConfig::default().with_store_name("orders"),
    );
    let audit = EventStore::from_arc(kv.clone(), StoreConfig::default().with_store_name("audit"));

    orders
        .append("s", ExpectedVersion::NoStream, named(&["Placed"]))
        .await
        .expect("append");

    assert_eq!(orders.version("s").await.expect("version"), 1);
    assert_eq!(audit.version("s").await.expect("version"), 0);
    assert_eq!(kv.keys("orders"), vec!["s|1", "s|head"]);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let store = store(PersistenceMode::AtomicBatch);

    let err = store
        .append("bad|name", ExpectedVersion::Any, named(&["A"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got: {err:?}");

    let err = store.load("", 0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got: {err:?}");
}
