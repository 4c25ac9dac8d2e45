//! Background update handling through a running facade.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use iapkit_core::{
    Product, ProductId, PurchaseOutcome, Transaction, TransactionId, TransportError,
    VerificationFailure, VerificationResult,
};
use iapkit_purchasing::{
    EngineConfig, ErrorSink, FailureOrigin, ListenerExit, PurchaseEngine, PurchaseResponse,
    QueuedTransaction, QueuedTransactionState, RecordingErrorSink, SandboxStore, StoreFacade,
    TransactionListener,
};

fn pro_monthly() -> Product {
    Product::new("pro_monthly", "Pro (monthly)", "$4.99")
}

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_product_ids(["pro_monthly"])
        .with_listener_name("test-listener")
}

async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Records, for every report, how often the store had already finished the
/// reported transaction at that moment.
struct FinishAwareSink {
    store: Arc<SandboxStore>,
    seen: Mutex<Vec<(FailureOrigin, TransactionId, usize)>>,
}

impl FinishAwareSink {
    fn new(store: Arc<SandboxStore>) -> Self {
        Self {
            store,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<(FailureOrigin, TransactionId, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

impl ErrorSink for FinishAwareSink {
    fn report(&self, origin: FailureOrigin, failure: &VerificationFailure) {
        let id = failure.transaction.id();
        let finished = self.store.finish_count(id);
        self.seen.lock().unwrap().push((origin, id, finished));
    }
}

async fn started(store: &Arc<SandboxStore>) -> StoreFacade<SandboxStore> {
    iapkit_observability::init_for_tests();
    let facade = StoreFacade::start(PurchaseEngine::new(store.clone(), config()));
    facade.fetch_products().await.unwrap();
    facade
}

#[tokio::test]
async fn verified_update_is_granted_and_finished() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;

    let tx = Transaction::new("pro_monthly");
    assert_eq!(store.push_update(VerificationResult::verified(tx.clone())), 1);

    assert!(eventually(|| store.finish_count(tx.id()) == 1).await);
    assert_eq!(facade.purchased_products(), vec![pro_monthly()]);
    assert!(facade.engine().is_finished(tx.id()));

    let stats = facade.listener_stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.granted, 1);

    assert!(matches!(facade.shutdown().await, ListenerExit::Cancelled));
}

#[tokio::test]
async fn unverified_update_is_reported_before_it_is_finished() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let sink = Arc::new(FinishAwareSink::new(store.clone()));
    iapkit_observability::init_for_tests();
    let engine = PurchaseEngine::new(store.clone(), config()).with_error_sink(sink.clone());
    let facade = StoreFacade::start(engine);
    facade.fetch_products().await.unwrap();

    let tx = Transaction::new("pro_monthly");
    store.push_update(VerificationResult::unverified(tx.clone(), "jws signature invalid"));

    assert!(eventually(|| store.finish_count(tx.id()) == 1).await);
    assert_eq!(sink.seen(), vec![(FailureOrigin::Listener, tx.id(), 0)]);
    assert!(facade.purchased_products().is_empty());
    assert_eq!(facade.listener_stats().rejected, 1);

    // The loop keeps going after a rejected update.
    let next = Transaction::new("pro_monthly");
    store.push_update(VerificationResult::verified(next.clone()));
    assert!(eventually(|| store.finish_count(next.id()) == 1).await);
    assert_eq!(facade.purchased_products(), vec![pro_monthly()]);
    assert!(facade.listener_running());

    facade.shutdown().await;
}

#[tokio::test]
async fn unmappable_update_is_finished_without_granting() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let sink = Arc::new(RecordingErrorSink::new());
    iapkit_observability::init_for_tests();
    let engine = PurchaseEngine::new(store.clone(), config()).with_error_sink(sink.clone());
    let facade = StoreFacade::start(engine);
    facade.fetch_products().await.unwrap();

    let tx = Transaction::new("retired_sku");
    store.push_update(VerificationResult::verified(tx.clone()));

    assert!(eventually(|| store.finish_count(tx.id()) == 1).await);
    assert!(facade.purchased_products().is_empty());
    assert_eq!(facade.listener_stats().unmappable, 1);
    assert!(sink.is_empty());

    facade.shutdown().await;
}

#[tokio::test]
async fn transaction_seen_by_purchase_and_listener_is_finished_once() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;

    let tx = Transaction::new("pro_monthly");
    store.script_purchase(PurchaseResponse::Completed(VerificationResult::verified(
        tx.clone(),
    )));
    let outcome = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Success(_)));

    store.push_update(VerificationResult::verified(tx.clone()));
    assert!(eventually(|| facade.listener_stats().received == 1).await);

    assert_eq!(facade.listener_stats().duplicates, 1);
    assert_eq!(store.finish_count(tx.id()), 1);
    assert_eq!(facade.purchased_products(), vec![pro_monthly()]);

    facade.shutdown().await;
}

#[tokio::test]
async fn update_stream_failure_stops_the_listener() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;

    store.fail_updates(TransportError::msg("update channel reset"));

    assert!(eventually(|| !facade.listener_running()).await);
    match facade.shutdown().await {
        ListenerExit::StreamFailed(err) => assert_eq!(err.to_string(), "update channel reset"),
        other => panic!("unexpected exit: {other:?}"),
    }
}

#[tokio::test]
async fn closed_update_stream_ends_the_listener() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    iapkit_observability::init_for_tests();
    let engine = Arc::new(PurchaseEngine::new(store.clone(), config()));
    engine.fetch_products().await.unwrap();

    let handle = TransactionListener::spawn(engine.clone());
    let tx = Transaction::new("pro_monthly");
    store.push_update(VerificationResult::verified(tx.clone()));
    store.close_updates();

    assert!(matches!(handle.join().await, ListenerExit::StreamEnded));
    assert_eq!(store.finish_count(tx.id()), 1);
    assert!(engine.is_purchased(&ProductId::from("pro_monthly")));
}

#[tokio::test]
async fn shutdown_releases_the_update_subscription() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;
    assert_eq!(store.update_subscribers(), 1);

    assert!(matches!(facade.shutdown().await, ListenerExit::Cancelled));
    assert_eq!(store.update_subscribers(), 0);
}

#[tokio::test]
async fn mirror_tracks_listener_grants() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;
    let before = facade.snapshot();

    store.push_update(VerificationResult::verified(Transaction::new("pro_monthly")));

    assert!(eventually(|| facade.snapshot().revision > before.revision).await);
    let after = facade.snapshot();
    assert!(after.is_purchased(&ProductId::from("pro_monthly")));
    assert_eq!(after.fetched_products, before.fetched_products);

    facade.shutdown().await;
}

#[tokio::test]
async fn legacy_queue_batch_refreshes_entitlements() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = started(&store).await;
    store.set_entitlement(VerificationResult::verified(Transaction::new("pro_monthly")));

    let report = facade
        .legacy_adapter()
        .updated_transactions(&[QueuedTransaction::new(
            "pro_monthly",
            QueuedTransactionState::Purchased,
        )])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.granted, vec![ProductId::from("pro_monthly")]);
    assert_eq!(facade.purchased_products(), vec![pro_monthly()]);

    facade.shutdown().await;
}
