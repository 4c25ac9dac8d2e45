//! Adapter for queue-style purchase callbacks.
//!
//! Older store APIs push batches of updated transactions to an observer. The
//! adapter does not process them itself: a batch containing a settled
//! transaction simply triggers the engine's normal fetch + reconcile path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use iapkit_core::{ProductId, StoreResult};

use crate::client::StoreClient;
use crate::engine::{PurchaseEngine, ReconcileReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedTransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

impl QueuedTransactionState {
    /// Whether this state can change what the user is entitled to.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            QueuedTransactionState::Purchased | QueuedTransactionState::Restored
        )
    }
}

/// One entry of a queue callback batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTransaction {
    pub product_id: ProductId,
    pub state: QueuedTransactionState,
}

impl QueuedTransaction {
    pub fn new(product_id: impl Into<ProductId>, state: QueuedTransactionState) -> Self {
        Self {
            product_id: product_id.into(),
            state,
        }
    }
}

pub struct LegacyQueueAdapter<S: ?Sized> {
    engine: Arc<PurchaseEngine<S>>,
}

impl<S: ?Sized> Clone for LegacyQueueAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S> LegacyQueueAdapter<S>
where
    S: StoreClient + ?Sized,
{
    pub fn new(engine: Arc<PurchaseEngine<S>>) -> Self {
        Self { engine }
    }

    /// Handle one batch of updated queue transactions.
    ///
    /// Returns `Ok(None)` when nothing in the batch settled.
    pub async fn updated_transactions(
        &self,
        batch: &[QueuedTransaction],
    ) -> StoreResult<Option<ReconcileReport>> {
        if !batch.iter().any(|t| t.state.is_settled()) {
            tracing::debug!(entries = batch.len(), "queue batch has no settled transactions");
            return Ok(None);
        }

        tracing::info!(entries = batch.len(), "queue batch settled; refreshing entitlements");
        self.engine.restore_purchases().await.map(Some)
    }
}
