//! Immutable engine snapshots and the observer-side mirror.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use iapkit_core::{Product, ProductId};

/// Point-in-time view of the engine's observable state.
///
/// `revision` increases by one for every change the engine makes, so observers
/// can discard snapshots that arrive out of order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub fetched_products: Vec<Product>,
    pub purchased_products: Vec<Product>,
}

impl StoreSnapshot {
    pub fn is_purchased(&self, product_id: &ProductId) -> bool {
        self.purchased_products.iter().any(|p| p.id() == product_id)
    }

    pub fn fetched_ids(&self) -> Vec<ProductId> {
        self.fetched_products.iter().map(|p| p.id().clone()).collect()
    }

    pub fn purchased_ids(&self) -> Vec<ProductId> {
        self.purchased_products.iter().map(|p| p.id().clone()).collect()
    }
}

/// Holds the newest snapshot seen by an observer.
///
/// Readers always get a whole snapshot (never fetched products from one
/// revision and purchased products from another).
#[derive(Debug, Default)]
pub struct SnapshotMirror {
    current: RwLock<Arc<StoreSnapshot>>,
}

impl SnapshotMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `snapshot` if it is newer than the held one.
    ///
    /// Returns `false` for stale or duplicate revisions.
    pub fn apply(&self, snapshot: &StoreSnapshot) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.revision <= current.revision {
            tracing::debug!(
                held = current.revision,
                found = snapshot.revision,
                "ignoring stale store snapshot"
            );
            return false;
        }
        *current = Arc::new(snapshot.clone());
        true
    }

    pub fn current(&self) -> Arc<StoreSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn revision(&self) -> u64 {
        self.current().revision
    }
}
