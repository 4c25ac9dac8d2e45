//! Foreground flows through the facade: fetch, purchase, restore.

use std::sync::Arc;

use iapkit_core::{
    Product, ProductId, PurchaseOutcome, StoreError, Transaction, TransportError,
    VerificationResult,
};
use iapkit_purchasing::{
    EngineConfig, PurchaseEngine, PurchaseResponse, SandboxStore, StoreFacade,
};

fn pro_monthly() -> Product {
    Product::new("pro_monthly", "Pro (monthly)", "$4.99")
}

fn start(store: &Arc<SandboxStore>) -> StoreFacade<SandboxStore> {
    iapkit_observability::init_for_tests();
    let engine = PurchaseEngine::new(
        store.clone(),
        EngineConfig::default().with_product_ids(["pro_monthly"]),
    );
    StoreFacade::start(engine)
}

#[tokio::test]
async fn fetch_exposes_catalog_to_observers() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);

    let products = facade.fetch_products().await.unwrap();

    assert_eq!(products, vec![pro_monthly()]);
    assert_eq!(facade.fetched_products(), vec![pro_monthly()]);
    assert!(facade.purchased_products().is_empty());
}

#[tokio::test]
async fn empty_catalog_is_a_configuration_error() {
    let store = Arc::new(SandboxStore::new());
    let facade = start(&store);

    let err = facade.fetch_products().await.unwrap_err();

    assert!(matches!(err, StoreError::EmptyCatalog));
    assert_eq!(err.user_message(), "No products are available right now.");
    assert!(facade.fetched_products().is_empty());
}

#[tokio::test]
async fn cancelled_purchase_changes_nothing() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();
    let before = facade.snapshot();

    store.script_purchase(PurchaseResponse::UserCancelled);
    let outcome = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    assert!(matches!(outcome, PurchaseOutcome::Canceled));
    assert_eq!(outcome.message(), None);
    assert!(facade.purchased_products().is_empty());
    assert_eq!(facade.snapshot().revision, before.revision);
    assert!(store.finished().is_empty());
}

#[tokio::test]
async fn verified_purchase_is_granted_and_finished_once() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();

    let tx = Transaction::new("pro_monthly");
    store.script_purchase(PurchaseResponse::Completed(VerificationResult::verified(
        tx.clone(),
    )));
    let outcome = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    assert_eq!(outcome.product(), Some(&pro_monthly()));
    assert_eq!(facade.purchased_products(), vec![pro_monthly()]);
    assert_eq!(store.finish_count(tx.id()), 1);
    assert_eq!(store.purchase_requests(), vec![ProductId::from("pro_monthly")]);
}

#[tokio::test]
async fn pending_and_unknown_responses_leave_transactions_open() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();

    store.script_purchase(PurchaseResponse::Pending);
    store.script_purchase(PurchaseResponse::Unrecognized);

    let pending = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();
    let unknown = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    assert!(matches!(pending, PurchaseOutcome::Pending));
    assert!(matches!(unknown, PurchaseOutcome::Unknown));
    assert!(facade.purchased_products().is_empty());
    assert!(store.finished().is_empty());
}

#[tokio::test]
async fn unverified_purchase_is_not_granted_or_finished() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();

    let tx = Transaction::new("pro_monthly");
    store.script_purchase(PurchaseResponse::Completed(VerificationResult::unverified(
        tx.clone(),
        "receipt signature mismatch",
    )));
    let outcome = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    match outcome {
        PurchaseOutcome::VerificationFailed { reason } => {
            assert_eq!(reason, "receipt signature mismatch");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(facade.purchased_products().is_empty());
    assert_eq!(store.finish_count(tx.id()), 0);
}

#[tokio::test]
async fn unmappable_purchase_is_left_unfinished_by_default() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();

    let tx = Transaction::new("unknown_sku");
    store.script_purchase(PurchaseResponse::Completed(VerificationResult::verified(
        tx.clone(),
    )));
    let outcome = facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    assert!(matches!(outcome, PurchaseOutcome::Unmappable(ref id) if id.as_str() == "unknown_sku"));
    assert!(facade.purchased_products().is_empty());
    assert_eq!(store.finish_count(tx.id()), 0);
}

#[tokio::test]
async fn transport_failure_surfaces_as_error_from_facade() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    facade.fetch_products().await.unwrap();

    store.script_purchase_failure(TransportError::new(
        anyhow::anyhow!("connection reset").context("presenting payment sheet"),
    ));
    let err = facade
        .request_and_handle_purchase(&pro_monthly())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Transport(_)));
    assert!(err.to_string().contains("connection reset"));

    // The engine itself reports it as an outcome rather than an error.
    store.script_purchase_failure(TransportError::msg("offline"));
    let outcome = facade.engine().request_purchase(&pro_monthly()).await;
    assert_eq!(outcome.kind(), "transport_error");
}

#[tokio::test]
async fn repeated_fetch_does_not_duplicate_owned_products() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    let tx = Transaction::new("pro_monthly");
    store.set_entitlement(VerificationResult::verified(tx.clone()));

    facade.fetch_products().await.unwrap();
    let first = facade.purchased_products();
    facade.fetch_products().await.unwrap();
    let second = facade.purchased_products();

    assert_eq!(first, vec![pro_monthly()]);
    assert_eq!(first, second);
    assert_eq!(store.finish_count(tx.id()), 1);
}

#[tokio::test]
async fn restore_grants_current_entitlements() {
    let yearly = Product::new("pro_yearly", "Pro (yearly)", "$39.99");
    let store = Arc::new(SandboxStore::with_products([pro_monthly(), yearly.clone()]));
    let facade = start(&store);
    facade.add_product_identifier("pro_yearly");
    store.set_entitlement(VerificationResult::verified(
        Transaction::new("pro_yearly").family_shared(),
    ));

    let report = facade.restore_purchases().await.unwrap();

    assert_eq!(report.granted, vec![ProductId::from("pro_yearly")]);
    assert_eq!(report.finished, 1);
    assert_eq!(facade.purchased_products(), vec![yearly]);
}

#[tokio::test]
async fn entitlement_lookup_failure_keeps_fetched_catalog() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    store.fail_entitlement_lookups(Some(TransportError::msg("entitlements unavailable")));

    let err = facade.fetch_products().await.unwrap_err();

    assert!(matches!(err, StoreError::Transport(_)));
    assert_eq!(facade.fetched_products(), vec![pro_monthly()]);
}

#[tokio::test]
async fn subscribers_see_fetch_then_purchase_snapshots() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    let sub = facade.subscribe();

    facade.fetch_products().await.unwrap();
    facade.request_and_handle_purchase(&pro_monthly()).await.unwrap();

    let fetched = sub.try_recv().unwrap();
    let purchased = sub.try_recv().unwrap();
    assert!(fetched.revision < purchased.revision);
    assert!(fetched.purchased_products.is_empty());
    assert!(purchased.is_purchased(&ProductId::from("pro_monthly")));
    assert_eq!(facade.snapshot().as_ref(), &purchased);
}

#[tokio::test]
async fn unverified_entitlement_is_settled_on_restore() {
    let store = Arc::new(SandboxStore::with_products([pro_monthly()]));
    let facade = start(&store);
    let tx = Transaction::new("pro_monthly");
    store.set_entitlement(VerificationResult::unverified(tx.clone(), "revoked"));

    let report = facade.restore_purchases().await.unwrap();
    assert_eq!(report.rejected, vec![ProductId::from("pro_monthly")]);
    assert_eq!(store.finish_count(tx.id()), 1);

    let again = facade.restore_purchases().await.unwrap();
    assert!(again.rejected.is_empty());
    assert_eq!(store.finish_count(tx.id()), 1);
    assert!(facade.purchased_products().is_empty());
}
