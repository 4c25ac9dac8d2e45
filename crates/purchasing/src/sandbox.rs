//! In-memory store for tests/dev.
//!
//! Scripted purchase responses, settable entitlements, injectable transport
//! failures and a broadcast update stream. Records every completed `finish`
//! call so tests can assert exactly-once acknowledgement.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use iapkit_core::{
    Product, ProductId, Transaction, TransactionId, TransportError, VerificationResult,
};

use crate::client::{PurchaseResponse, StoreClient, TransactionUpdates};

/// Updates buffered per subscriber before it starts lagging.
const UPDATE_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct SandboxState {
    catalog: Vec<Product>,
    purchase_script: VecDeque<Result<PurchaseResponse, TransportError>>,
    entitlements: HashMap<ProductId, VerificationResult>,
    catalog_failures: VecDeque<TransportError>,
    entitlement_failure: Option<TransportError>,
    stall_next_finish: bool,
    finished: Vec<TransactionId>,
    purchase_requests: Vec<ProductId>,
    catalog_requests: usize,
}

/// Scriptable [`StoreClient`].
///
/// Without a scripted response a purchase completes with a fresh verified
/// transaction for the requested product.
#[derive(Debug)]
pub struct SandboxStore {
    state: Mutex<SandboxState>,
    updates: Mutex<Option<UpdateSender>>,
}

type UpdateSender = broadcast::Sender<Result<VerificationResult, TransportError>>;

impl Default for SandboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            state: Mutex::new(SandboxState::default()),
            updates: Mutex::new(Some(updates)),
        }
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        store.set_catalog(products.into_iter().collect());
        store
    }

    fn state(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- scripting -----------------------------------------------------

    pub fn set_catalog(&self, products: Vec<Product>) {
        self.state().catalog = products;
    }

    pub fn add_product(&self, product: Product) {
        self.state().catalog.push(product);
    }

    /// Queue the answer for the next purchase request.
    pub fn script_purchase(&self, response: PurchaseResponse) {
        self.state().purchase_script.push_back(Ok(response));
    }

    /// Make the next purchase request fail.
    pub fn script_purchase_failure(&self, err: TransportError) {
        self.state().purchase_script.push_back(Err(err));
    }

    /// Make the next catalog fetch fail.
    pub fn fail_next_catalog_fetch(&self, err: TransportError) {
        self.state().catalog_failures.push_back(err);
    }

    /// Make every entitlement lookup fail until cleared with `None`.
    pub fn fail_entitlement_lookups(&self, err: Option<TransportError>) {
        self.state().entitlement_failure = err;
    }

    /// Set the current entitlement for the result's product.
    pub fn set_entitlement(&self, result: VerificationResult) {
        let product_id = result.transaction().product_id().clone();
        self.state().entitlements.insert(product_id, result);
    }

    /// Make the next `finish` call hang forever without acknowledging.
    pub fn stall_next_finish(&self) {
        self.state().stall_next_finish = true;
    }

    pub fn clear_entitlement(&self, product_id: &ProductId) {
        self.state().entitlements.remove(product_id);
    }

    fn send_update(&self, update: Result<VerificationResult, TransportError>) -> usize {
        let updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
        match updates.as_ref() {
            Some(tx) => tx.send(update).unwrap_or(0),
            None => 0,
        }
    }

    /// Push a background update. Returns how many listeners received it.
    pub fn push_update(&self, result: VerificationResult) -> usize {
        self.send_update(Ok(result))
    }

    /// Fail the update stream for every current listener.
    pub fn fail_updates(&self, err: TransportError) -> usize {
        self.send_update(Err(err))
    }

    /// End the update stream; listeners see it close after draining.
    pub fn close_updates(&self) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn update_subscribers(&self) -> usize {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    // ---- inspection ----------------------------------------------------

    pub fn finished(&self) -> Vec<TransactionId> {
        self.state().finished.clone()
    }

    pub fn finish_count(&self, id: TransactionId) -> usize {
        self.state().finished.iter().filter(|f| **f == id).count()
    }

    pub fn purchase_requests(&self) -> Vec<ProductId> {
        self.state().purchase_requests.clone()
    }

    pub fn catalog_requests(&self) -> usize {
        self.state().catalog_requests
    }
}

#[async_trait]
impl StoreClient for SandboxStore {
    async fn fetch_catalog(&self, identifiers: &[ProductId]) -> Result<Vec<Product>, TransportError> {
        let mut state = self.state();
        state.catalog_requests += 1;
        if let Some(err) = state.catalog_failures.pop_front() {
            return Err(err);
        }
        Ok(state
            .catalog
            .iter()
            .filter(|p| identifiers.contains(p.id()))
            .cloned()
            .collect())
    }

    async fn initiate_purchase(&self, product: &Product) -> Result<PurchaseResponse, TransportError> {
        let mut state = self.state();
        state.purchase_requests.push(product.id().clone());
        state.purchase_script.pop_front().unwrap_or_else(|| {
            Ok(PurchaseResponse::Completed(VerificationResult::verified(
                Transaction::new(product.id().clone()),
            )))
        })
    }

    async fn current_entitlement(
        &self,
        product: &Product,
    ) -> Result<Option<VerificationResult>, TransportError> {
        let state = self.state();
        if let Some(err) = &state.entitlement_failure {
            return Err(err.clone());
        }
        Ok(state.entitlements.get(product.id()).cloned())
    }

    fn transaction_updates(&self) -> TransactionUpdates {
        let receiver = {
            let updates = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
            match updates.as_ref() {
                Some(tx) => tx.subscribe(),
                None => {
                    return Box::pin(tokio_stream::empty::<Result<VerificationResult, TransportError>>());
                }
            }
        };
        let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
            Ok(update) => Some(update),
            Err(err) => {
                tracing::warn!(error = %err, "sandbox update subscriber lagged");
                None
            }
        });
        Box::pin(stream)
    }

    async fn finish(&self, transaction: &Transaction) {
        let stall = std::mem::take(&mut self.state().stall_next_finish);
        if stall {
            std::future::pending::<()>().await;
        }
        self.state().finished.push(transaction.id());
    }
}
