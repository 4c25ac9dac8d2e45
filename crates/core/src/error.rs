//! Error model for catalog, purchase and reconciliation flows.

use std::sync::Arc;

use thiserror::Error;

use crate::id::ProductId;
use crate::transaction::Transaction;

/// Result type used across the purchasing layer.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures that propagate to callers of fetch/restore operations.
///
/// Expected purchase branches (cancel, pending, unmappable, unverified) are *not*
/// errors; they are reported as [`crate::PurchaseOutcome`] values.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The collaborator returned no products for the configured identifiers.
    ///
    /// Treated as a configuration error, not a transient one.
    #[error("product catalog is empty")]
    EmptyCatalog,

    /// A collaborator call failed.
    #[error("store transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl StoreError {
    pub fn transport(cause: impl Into<anyhow::Error>) -> Self {
        Self::Transport(TransportError::new(cause))
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::EmptyCatalog => "No products are available right now.",
            StoreError::Transport(_) => "Could not reach the store. Please try again.",
        }
    }
}

/// Failure reported by the store collaborator (network, backend, platform error).
///
/// Cloneable so it can travel inside outcomes and broadcast streams; the underlying
/// cause chain is preserved.
#[derive(Debug, Clone, Error)]
#[error("{0:#}")]
pub struct TransportError(Arc<anyhow::Error>);

impl TransportError {
    pub fn new(cause: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(cause.into()))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(anyhow::anyhow!(message.into()))
    }

    /// Underlying cause chain.
    pub fn cause(&self) -> &anyhow::Error {
        &self.0
    }
}

/// A transaction the collaborator could not vouch for.
///
/// Carries the transaction so the caller can decide whether to finalize it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction {} for {} failed verification: {reason}", .transaction.id(), .transaction.product_id())]
pub struct VerificationFailure {
    pub transaction: Transaction,
    pub reason: String,
}

impl VerificationFailure {
    pub fn product_id(&self) -> &ProductId {
        self.transaction.product_id()
    }
}
