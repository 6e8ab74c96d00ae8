//! Supervisor lifecycle against a mock transport and the in-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use starknetid_core::error::IndexerError;
use starknetid_core::felt::Felt;
use starknetid_core::memory::MemoryStorage;
use starknetid_core::types::{Address, Contract, StreamState};
use starknetid_indexer::{
    AddressFilter, EventFilter, EventMessage, IndexerBuilder, IntegerFilter, Subscription,
    SubscriptionId, Supervisor, Transport, TransportMessage,
};

/// Records every subscribe call together with the persisted checkpoint and
/// the number of committed transactions at that moment.
struct MockTransport {
    store: MemoryStorage,
    next_id: AtomicU64,
    subscribed: Mutex<Vec<(SubscriptionId, Subscription, Option<StreamState>, usize)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
}

impl MockTransport {
    fn new(store: MemoryStorage) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(1),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(SubscriptionId, Subscription, Option<StreamState>, usize)> {
        self.subscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(&self, filter: Subscription) -> Result<SubscriptionId, IndexerError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = self.store.state("main");
        let committed = self.store.transactions_committed();
        self.subscribed.lock().unwrap().push((id, filter, state, committed));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), IndexerError> {
        self.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }
}

struct Harness {
    store: MemoryStorage,
    transport: Arc<MockTransport>,
    supervisor: Arc<Supervisor>,
    messages: mpsc::Sender<TransportMessage>,
    reconnects: mpsc::Sender<SubscriptionId>,
}

fn template() -> Subscription {
    Subscription {
        events: vec![EventFilter::default()],
        addresses: vec![AddressFilter { only_starknet: true, id: None }],
    }
}

async fn harness(store: MemoryStorage) -> Harness {
    let config = IndexerBuilder::new()
        .database_url("memory://")
        .subscription("main", template())
        .resubscribe_poll_ms(5)
        .build_config();
    let transport = Arc::new(MockTransport::new(store.clone()));
    let supervisor =
        Arc::new(Supervisor::new(&config, Arc::new(store.clone()), transport.clone()).unwrap());
    supervisor.init().await.unwrap();
    supervisor.subscribe(config.subscriptions.clone()).await.unwrap();

    let (messages, msg_rx) = mpsc::channel(64);
    let (reconnects, rc_rx) = mpsc::channel(8);
    supervisor.start(msg_rx, rc_rx);
    Harness { store, transport, supervisor, messages, reconnects }
}

fn mint(id: SubscriptionId, height: u64, token: u64) -> TransportMessage {
    let raw =
        serde_json::json!({ "from_": "0x0", "to": "0xb0b", "tokenId": format!("{token:#x}") });
    TransportMessage::event(
        id,
        EventMessage {
            name: "Transfer".into(),
            height,
            time: 1_700_000_000 + height,
            id: height,
            contract: Contract { id: 1, hash: vec![1; 32] },
            raw: raw.to_string().into_bytes(),
        },
    )
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn subscribe_resumes_from_persisted_state() {
    let store = MemoryStorage::new();
    store.insert_state(StreamState { name: "main".into(), last_height: 40, last_time: None });
    store.insert_address(Address { id: Some(900), hash: vec![9; 32], height: 39, class_id: None });

    let h = harness(store).await;
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    let filter = &calls[0].1;
    assert_eq!(filter.events[0].height, Some(IntegerFilter { gt: 40 }));
    assert_eq!(filter.addresses[0].id, Some(IntegerFilter { gt: 900 }));

    let ch = h.supervisor.channel("main").await.unwrap();
    assert_eq!(ch.checkpoint().last_height, 40);
    h.supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnect_mid_burst_resumes_from_last_flush() {
    let store = MemoryStorage::new();
    store.set_commit_delay(Duration::from_millis(40));
    let h = harness(store).await;
    let old = SubscriptionId(1);

    for height in [10u64, 11] {
        h.messages.send(mint(old, height, height)).await.unwrap();
        h.messages.send(TransportMessage::end_of_block(old, height)).await.unwrap();
    }
    // let the demux hand the burst to the channel before the disconnect
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.reconnects.send(old).await.unwrap();

    let transport = h.transport.clone();
    wait_for(move || transport.calls().len() == 2).await;

    let (new_id, filter, persisted, committed) = h.transport.calls()[1].clone();
    assert_eq!(new_id, SubscriptionId(2));
    assert_eq!(filter.events[0].height, Some(IntegerFilter { gt: 11 }));
    assert_eq!(persisted.map(|s| s.last_height), Some(11));
    assert_eq!(committed, 2);

    let active = h.supervisor.active_subscriptions().await;
    assert_eq!(active, vec![(SubscriptionId(2), "main".to_string())]);
    assert!(h.store.starknet_id(&Felt::from(10)).is_some());
    assert!(h.store.starknet_id(&Felt::from(11)).is_some());

    // messages on the stale id are dropped, the new id is routed
    h.messages.send(mint(old, 12, 12)).await.unwrap();
    h.messages.send(mint(new_id, 12, 13)).await.unwrap();
    h.messages.send(TransportMessage::end_of_block(new_id, 12)).await.unwrap();
    let store = h.store.clone();
    wait_for(move || store.state("main").map(|s| s.last_height) == Some(12)).await;
    assert!(h.store.starknet_id(&Felt::from(12)).is_none());
    assert!(h.store.starknet_id(&Felt::from(13)).is_some());

    h.supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn storage_failure_halts_stream_and_keeps_checkpoint() {
    let store = MemoryStorage::new();
    let h = harness(store).await;
    let id = SubscriptionId(1);

    h.messages.send(mint(id, 5, 5)).await.unwrap();
    h.messages.send(TransportMessage::end_of_block(id, 5)).await.unwrap();
    let store = h.store.clone();
    wait_for(move || store.state("main").is_some()).await;

    h.store.fail_next_commit();
    for height in [6u64, 7] {
        h.messages.send(mint(id, height, height)).await.unwrap();
        h.messages.send(TransportMessage::end_of_block(id, height)).await.unwrap();
    }
    let ch = h.supervisor.channel("main").await.unwrap();
    let probe = ch.clone();
    wait_for(move || probe.is_failed() && probe.is_empty()).await;

    assert_eq!(h.store.state("main").unwrap().last_height, 5);
    assert_eq!(ch.checkpoint().last_height, 5);
    assert!(h.store.starknet_id(&Felt::from(6)).is_none());
    assert!(h.store.starknet_id(&Felt::from(7)).is_none());
    assert_eq!(h.store.transactions_begun(), 2);

    h.supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_reconnect_id_is_an_error() {
    let h = harness(MemoryStorage::new()).await;
    let err = h.supervisor.resubscribe(SubscriptionId(77)).await.unwrap_err();
    assert!(matches!(err, IndexerError::UnknownSubscription(77)));
    h.supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_unsubscribes_every_id() {
    let h = harness(MemoryStorage::new()).await;
    let mut subs = BTreeMap::new();
    subs.insert("second".to_string(), template());
    h.supervisor.subscribe(subs).await.unwrap();

    let active = h.supervisor.active_subscriptions().await;
    assert_eq!(active.iter().filter(|(_, name)| name == "main").count(), 1);
    assert_eq!(active.len(), 2);

    h.supervisor.shutdown().await.unwrap();
    let mut ids = h.transport.unsubscribed.lock().unwrap().clone();
    ids.sort();
    assert_eq!(ids, vec![SubscriptionId(1), SubscriptionId(2)]);
    assert!(h.supervisor.channel("second").await.is_some());
}

#[tokio::test]
async fn subscribing_a_bound_stream_again_keeps_one_id() {
    let h = harness(MemoryStorage::new()).await;
    let mut subs = BTreeMap::new();
    subs.insert("main".to_string(), template());
    h.supervisor.subscribe(subs).await.unwrap();

    assert_eq!(h.transport.calls().len(), 1);
    assert_eq!(
        h.supervisor.active_subscriptions().await,
        vec![(SubscriptionId(1), "main".to_string())]
    );
    h.supervisor.shutdown().await.unwrap();
}
