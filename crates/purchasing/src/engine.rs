//! Purchase/transaction reconciliation engine.
//!
//! All mutations of the fetched catalog, the owned-products set and the
//! finished-transaction ledger happen under one state lock, held only around
//! the in-memory change. Store round-trips (catalog fetch, purchase sheet,
//! entitlement lookup, finish) always run with the lock released.
//!
//! Snapshots are published in revision order: a snapshot overtaken by a newer
//! one from a concurrent change is dropped rather than delivered late.
//!
//! Finalization policy per path:
//!
//! | path            | verified + mapped | verified + unmappable        | unverified              |
//! |-----------------|-------------------|------------------------------|-------------------------|
//! | direct purchase | grant + finish    | not finished (configurable)  | not finished            |
//! | listener        | grant + finish    | finish                       | report, then finish     |
//! | reconcile       | grant + finish    | finish                       | report, then finish     |

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use iapkit_core::{
    Product, ProductId, PurchaseOutcome, StoreResult, Transaction, TransactionId,
    VerificationFailure, VerificationResult, verify,
};
use iapkit_events::{EventBus, InMemoryEventBus, StoreSnapshot, Subscription};

use crate::catalog::{self, ProductCatalog};
use crate::client::{PurchaseResponse, StoreClient};
use crate::config::EngineConfig;
use crate::sink::{ErrorSink, FailureOrigin, TracingErrorSink};

/// Summary of one entitlement reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Products newly added to the owned set.
    pub granted: Vec<ProductId>,
    /// Transactions finished during this pass (already-finished ones excluded).
    pub finished: usize,
    /// Products whose current entitlement failed verification. Each was reported
    /// to the error sink and then finished.
    pub rejected: Vec<ProductId>,
}

/// What happened to one background transaction update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDisposition {
    /// Verified and mapped; the product is owned.
    Granted(Product),
    /// Verified, but no catalog product carries this identifier.
    Unmappable(ProductId),
    /// Failed verification; reported to the error sink.
    Rejected(VerificationFailure),
}

/// Result of processing one background update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedUpdate {
    pub transaction_id: TransactionId,
    pub disposition: UpdateDisposition,
    /// `false` when the transaction had already been finished by another path.
    pub newly_finished: bool,
}

enum Grant {
    Granted { product: Product, added: bool },
    Unmappable,
}

#[derive(Debug, Default)]
struct EngineState {
    catalog: ProductCatalog,
    owned: BTreeMap<ProductId, Product>,
    /// Transactions the store has acknowledged. Never pruned: grows by one id
    /// per finished transaction for the lifetime of the engine.
    finished: HashSet<TransactionId>,
    /// Transactions whose `finish` call is outstanding.
    in_flight: HashSet<TransactionId>,
    revision: u64,
}

impl EngineState {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            revision: self.revision,
            fetched_products: self.catalog.products().to_vec(),
            purchased_products: self.owned.values().cloned().collect(),
        }
    }

    fn next_snapshot(&mut self) -> StoreSnapshot {
        self.revision += 1;
        self.snapshot()
    }
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Claim on a transaction while its `finish` call is outstanding.
///
/// Dropped unsettled (the finishing future was cancelled), it releases the
/// claim so a later delivery of the same transaction can finish it.
struct FinishClaim<'a> {
    state: &'a Mutex<EngineState>,
    id: TransactionId,
    settled: bool,
}

impl<'a> FinishClaim<'a> {
    fn new(state: &'a Mutex<EngineState>, id: TransactionId) -> Self {
        Self {
            state,
            id,
            settled: false,
        }
    }

    fn settle(mut self) {
        let mut state = lock(self.state);
        state.in_flight.remove(&self.id);
        state.finished.insert(self.id);
        self.settled = true;
    }
}

impl Drop for FinishClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            lock(self.state).in_flight.remove(&self.id);
            warn!(transaction_id = %self.id, "finish abandoned; transaction left unfinished");
        }
    }
}

/// The reconciliation core: fetch, purchase, verify, finalize, entitlements.
pub struct PurchaseEngine<S: ?Sized> {
    config: EngineConfig,
    state: Mutex<EngineState>,
    /// Revision of the last snapshot handed to the bus.
    published: Mutex<u64>,
    bus: InMemoryEventBus<StoreSnapshot>,
    sink: Arc<dyn ErrorSink>,
    store: Arc<S>,
}

impl<S> PurchaseEngine<S>
where
    S: StoreClient + ?Sized,
{
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        let state = EngineState {
            catalog: ProductCatalog::new(config.product_ids.iter().cloned()),
            ..EngineState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            published: Mutex::new(0),
            bus: InMemoryEventBus::new(),
            sink: Arc::new(TracingErrorSink),
            store,
        }
    }

    /// Replace the default (logging) error sink.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    /// Hand `snapshot` to subscribers unless a newer one already went out.
    ///
    /// The publish lock is held while callbacks run; it is never taken while
    /// the state lock is held.
    fn publish(&self, snapshot: StoreSnapshot) {
        let revision = snapshot.revision;
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        if revision <= *published {
            debug!(revision, published = *published, "skipping superseded store snapshot");
            return;
        }
        *published = revision;
        if let Err(err) = self.bus.publish(snapshot) {
            warn!(revision, error = ?err, "failed to publish store snapshot");
        }
    }

    // ---- configuration -------------------------------------------------

    /// Add a product identifier. It becomes purchasable after the next fetch.
    pub fn add_product_identifier(&self, id: impl Into<ProductId>) -> bool {
        let id = id.into();
        let added = self.state().catalog.add_identifier(id.clone());
        if added {
            debug!(product_id = %id, "product identifier added");
        }
        added
    }

    /// Replace the configured identifiers.
    pub fn configure(&self, ids: impl IntoIterator<Item = ProductId>) {
        self.state().catalog.configure(ids);
    }

    pub fn product_identifiers(&self) -> Vec<ProductId> {
        self.state().catalog.identifiers().to_vec()
    }

    // ---- observation ---------------------------------------------------

    pub fn snapshot(&self) -> StoreSnapshot {
        self.state().snapshot()
    }

    pub fn fetched_products(&self) -> Vec<Product> {
        self.state().catalog.products().to_vec()
    }

    pub fn purchased_products(&self) -> Vec<Product> {
        self.state().owned.values().cloned().collect()
    }

    pub fn is_purchased(&self, id: &ProductId) -> bool {
        self.state().owned.contains_key(id)
    }

    pub fn lookup(&self, id: &ProductId) -> Option<Product> {
        self.state().catalog.lookup(id).cloned()
    }

    /// Channel receiving a snapshot after every state change.
    ///
    /// Revisions arrive strictly increasing. Under concurrent changes an
    /// intermediate revision may be skipped; the next one received is newer.
    pub fn subscribe(&self) -> Subscription<StoreSnapshot> {
        self.bus.subscribe()
    }

    /// Register a callback invoked with a snapshot after every state change.
    ///
    /// Runs on the thread that made the change; keep it short. Same ordering as
    /// [`PurchaseEngine::subscribe`].
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&StoreSnapshot) + Send + Sync + 'static,
    {
        self.bus.listen(Arc::new(listener));
    }

    // ---- catalog -------------------------------------------------------

    /// Fetch the catalog for the configured identifiers and install it.
    ///
    /// On failure (transport or empty) the previous snapshot stays in place.
    pub async fn fetch_catalog(&self) -> StoreResult<Vec<Product>> {
        let identifiers = self.product_identifiers();
        let fetched = catalog::fetch(self.store.as_ref(), &identifiers).await?;

        let (products, snapshot) = {
            let mut state = self.state();
            let products = state.catalog.install(fetched)?.to_vec();
            (products, state.next_snapshot())
        };
        self.publish(snapshot);

        info!(products = products.len(), "product catalog fetched");
        Ok(products)
    }

    /// Fetch the catalog, then reconcile current entitlements against it.
    ///
    /// A reconciliation failure is returned, but the fetched catalog is kept.
    pub async fn fetch_products(&self) -> StoreResult<Vec<Product>> {
        let products = self.fetch_catalog().await?;
        self.reconcile_entitlements().await?;
        Ok(products)
    }

    /// Restore purchases: re-fetch and reconcile, returning the reconcile summary.
    pub async fn restore_purchases(&self) -> StoreResult<ReconcileReport> {
        self.fetch_catalog().await?;
        self.reconcile_entitlements().await
    }

    // ---- shared verify/grant/finish -----------------------------------

    /// Map `id` onto the catalog and add it to the owned set in one step.
    fn grant(&self, id: &ProductId) -> Grant {
        let (grant, snapshot) = {
            let mut state = self.state();
            let Some(product) = state.catalog.lookup(id).cloned() else {
                return Grant::Unmappable;
            };
            let added = state.owned.insert(id.clone(), product.clone()).is_none();
            let snapshot = added.then(|| state.next_snapshot());
            (Grant::Granted { product, added }, snapshot)
        };

        if let Some(snapshot) = snapshot {
            debug!(product_id = %id, "product granted");
            self.publish(snapshot);
        }
        grant
    }

    /// Finish `transaction` unless some path already did or is doing so.
    ///
    /// The id is claimed before the store call so concurrent paths cannot both
    /// finish it, and enters the ledger only once the store call returns. If
    /// this future is dropped mid-call the claim is released again.
    async fn finalize(&self, transaction: &Transaction) -> bool {
        let id = transaction.id();
        let claimed = {
            let mut state = self.state();
            !state.finished.contains(&id) && state.in_flight.insert(id)
        };
        if !claimed {
            debug!(transaction_id = %id, "transaction already finished");
            return false;
        }

        let claim = FinishClaim::new(&self.state, id);
        self.store.finish(transaction).await;
        claim.settle();
        debug!(
            transaction_id = %transaction.id(),
            product_id = %transaction.product_id(),
            "transaction finished"
        );
        true
    }

    pub fn is_finished(&self, id: TransactionId) -> bool {
        self.state().finished.contains(&id)
    }

    /// Size of the finished-transaction ledger.
    pub fn finished_count(&self) -> usize {
        self.state().finished.len()
    }

    // ---- purchase ------------------------------------------------------

    /// Run one purchase attempt to its outcome.
    ///
    /// Never fails: transport errors come back as [`PurchaseOutcome::TransportError`].
    pub async fn request_purchase(&self, product: &Product) -> PurchaseOutcome {
        let product_id = product.id();
        info!(product_id = %product_id, "purchase requested");

        let response = match self.store.initiate_purchase(product).await {
            Ok(response) => response,
            Err(err) => {
                warn!(product_id = %product_id, error = %err, "purchase request failed");
                return PurchaseOutcome::TransportError(err);
            }
        };

        let outcome = match response {
            PurchaseResponse::UserCancelled => PurchaseOutcome::Canceled,
            PurchaseResponse::Pending => PurchaseOutcome::Pending,
            PurchaseResponse::Unrecognized => PurchaseOutcome::Unknown,
            PurchaseResponse::Completed(result) => self.complete_purchase(result).await,
        };

        info!(product_id = %product_id, outcome = outcome.kind(), "purchase finished");
        outcome
    }

    async fn complete_purchase(&self, result: VerificationResult) -> PurchaseOutcome {
        let transaction = match verify(result) {
            Ok(transaction) => transaction,
            Err(failure) => {
                // Left unfinished: content is not delivered and the store keeps
                // the transaction visible for investigation.
                warn!(
                    transaction_id = %failure.transaction.id(),
                    product_id = %failure.product_id(),
                    reason = %failure.reason,
                    "purchased transaction failed verification"
                );
                return PurchaseOutcome::VerificationFailed {
                    reason: failure.reason,
                };
            }
        };

        match self.grant(transaction.product_id()) {
            Grant::Granted { product, .. } => {
                self.finalize(&transaction).await;
                PurchaseOutcome::Success(product)
            }
            Grant::Unmappable => {
                warn!(
                    transaction_id = %transaction.id(),
                    product_id = %transaction.product_id(),
                    finish = self.config.finish_unmappable_purchases,
                    "verified purchase does not map to a catalog product"
                );
                if self.config.finish_unmappable_purchases {
                    self.finalize(&transaction).await;
                }
                PurchaseOutcome::Unmappable(transaction.product_id().clone())
            }
        }
    }

    // ---- reconciliation ------------------------------------------------

    /// Ask the store for the current entitlement of every catalog product and
    /// finish each one.
    ///
    /// Verified entitlements are granted first. Unverified ones are reported to
    /// the error sink first and listed in [`ReconcileReport::rejected`]; an
    /// entitlement finished on an earlier pass is not reported again. Only a
    /// transport failure is an error, and grants made before it are kept.
    pub async fn reconcile_entitlements(&self) -> StoreResult<ReconcileReport> {
        let products = self.fetched_products();
        let mut report = ReconcileReport::default();

        for product in &products {
            let Some(result) = self.store.current_entitlement(product).await? else {
                continue;
            };

            match verify(result) {
                Ok(transaction) => {
                    if let Grant::Granted { added: true, .. } = self.grant(transaction.product_id()) {
                        report.granted.push(transaction.product_id().clone());
                    }
                    if self.finalize(&transaction).await {
                        report.finished += 1;
                    }
                }
                Err(failure) => {
                    if self.is_finished(failure.transaction.id()) {
                        continue;
                    }
                    self.sink.report(FailureOrigin::Reconcile, &failure);
                    report.rejected.push(product.id().clone());
                    if self.finalize(&failure.transaction).await {
                        report.finished += 1;
                    }
                }
            }
        }

        info!(
            granted = report.granted.len(),
            finished = report.finished,
            rejected = report.rejected.len(),
            "entitlements reconciled"
        );

        Ok(report)
    }

    // ---- background updates -------------------------------------------

    /// Process one store-pushed update (listener path).
    ///
    /// Always finishes the transaction: verified ones after granting (if
    /// mappable), unverified ones after reporting to the error sink.
    pub async fn process_update(&self, result: VerificationResult) -> ProcessedUpdate {
        match verify(result) {
            Ok(transaction) => {
                let disposition = match self.grant(transaction.product_id()) {
                    Grant::Granted { product, .. } => UpdateDisposition::Granted(product),
                    Grant::Unmappable => {
                        debug!(
                            transaction_id = %transaction.id(),
                            product_id = %transaction.product_id(),
                            "update does not map to a catalog product"
                        );
                        UpdateDisposition::Unmappable(transaction.product_id().clone())
                    }
                };
                let newly_finished = self.finalize(&transaction).await;
                ProcessedUpdate {
                    transaction_id: transaction.id(),
                    disposition,
                    newly_finished,
                }
            }
            Err(failure) => {
                self.sink.report(FailureOrigin::Listener, &failure);
                let newly_finished = self.finalize(&failure.transaction).await;
                ProcessedUpdate {
                    transaction_id: failure.transaction.id(),
                    disposition: UpdateDisposition::Rejected(failure),
                    newly_finished,
                }
            }
        }
    }
}

impl<S: ?Sized> core::fmt::Debug for PurchaseEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PurchaseEngine")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
