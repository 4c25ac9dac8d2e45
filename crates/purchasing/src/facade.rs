//! Observer-facing entry point.
//!
//! Wires an engine, its background listener and a [`SnapshotMirror`] together.
//! Every operation is a pass-through to [`PurchaseEngine`]; the mirror is
//! updated from the engine's change notifications, so readers always see one
//! consistent revision.

use std::sync::Arc;

use iapkit_core::{Product, ProductId, PurchaseOutcome, StoreError, StoreResult};
use iapkit_events::{SnapshotMirror, StoreSnapshot, Subscription};

use crate::client::StoreClient;
use crate::engine::{PurchaseEngine, ReconcileReport};
use crate::legacy::LegacyQueueAdapter;
use crate::listener::{ListenerExit, ListenerHandle, ListenerStats, TransactionListener};

pub struct StoreFacade<S: StoreClient + ?Sized + 'static> {
    engine: Arc<PurchaseEngine<S>>,
    mirror: Arc<SnapshotMirror>,
    listener: ListenerHandle,
}

impl<S> StoreFacade<S>
where
    S: StoreClient + ?Sized + 'static,
{
    /// Start the engine's background listener and begin mirroring its state.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(engine: PurchaseEngine<S>) -> Self {
        let engine = Arc::new(engine);
        let mirror = Arc::new(SnapshotMirror::new());
        mirror.apply(&engine.snapshot());

        let observer = mirror.clone();
        engine.on_change(move |snapshot| {
            observer.apply(snapshot);
        });

        let listener = TransactionListener::spawn(engine.clone());
        tracing::info!(
            products = engine.product_identifiers().len(),
            "store facade started"
        );

        Self {
            engine,
            mirror,
            listener,
        }
    }

    pub fn engine(&self) -> &Arc<PurchaseEngine<S>> {
        &self.engine
    }

    pub fn add_product_identifier(&self, id: impl Into<ProductId>) -> bool {
        self.engine.add_product_identifier(id)
    }

    pub async fn fetch_products(&self) -> StoreResult<Vec<Product>> {
        self.engine.fetch_products().await
    }

    /// Purchase `product`.
    ///
    /// Business outcomes (cancel, pending, unverified, unmappable) are `Ok`;
    /// only a failed store call is an `Err`.
    pub async fn request_and_handle_purchase(&self, product: &Product) -> StoreResult<PurchaseOutcome> {
        match self.engine.request_purchase(product).await {
            PurchaseOutcome::TransportError(err) => Err(StoreError::Transport(err)),
            outcome => Ok(outcome),
        }
    }

    pub async fn restore_purchases(&self) -> StoreResult<ReconcileReport> {
        self.engine.restore_purchases().await
    }

    /// Adapter for legacy payment-queue callbacks sharing this engine.
    pub fn legacy_adapter(&self) -> LegacyQueueAdapter<S> {
        LegacyQueueAdapter::new(self.engine.clone())
    }

    // ---- observation ---------------------------------------------------

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.mirror.current()
    }

    pub fn fetched_products(&self) -> Vec<Product> {
        self.snapshot().fetched_products.clone()
    }

    pub fn purchased_products(&self) -> Vec<Product> {
        self.snapshot().purchased_products.clone()
    }

    pub fn subscribe(&self) -> Subscription<StoreSnapshot> {
        self.engine.subscribe()
    }

    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&StoreSnapshot) + Send + Sync + 'static,
    {
        self.engine.on_change(listener);
    }

    pub fn listener_stats(&self) -> ListenerStats {
        self.listener.stats()
    }

    pub fn listener_running(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Stop the background listener and wait for it.
    pub async fn shutdown(self) -> ListenerExit {
        self.listener.shutdown().await
    }
}
