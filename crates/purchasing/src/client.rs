//! Store collaborator contract.
//!
//! The platform's store client (catalog lookup, payment sheet, signed
//! receipts) sits behind [`StoreClient`]. The engine only consumes its
//! verification results; it never inspects receipts itself.

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use iapkit_core::{Product, ProductId, Transaction, TransportError, VerificationResult};

/// Unbounded stream of store-pushed transaction updates (renewals, family
/// sharing, purchases made on other devices, resolved pending purchases).
///
/// An `Err` item is an unrecoverable stream failure; the listener stops on it.
pub type TransactionUpdates =
    Pin<Box<dyn Stream<Item = Result<VerificationResult, TransportError>> + Send>>;

/// What the store answered to a purchase request.
#[derive(Debug, Clone)]
pub enum PurchaseResponse {
    /// The payment flow finished and produced a transaction.
    Completed(VerificationResult),
    UserCancelled,
    /// Requires external action (parental approval, SCA, ...).
    Pending,
    /// A response kind newer than this client understands.
    Unrecognized,
}

/// Storefront / payment backend used by the purchase engine.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Look up catalog entries for `identifiers`.
    async fn fetch_catalog(&self, identifiers: &[ProductId]) -> Result<Vec<Product>, TransportError>;

    /// Present the purchase flow for `product` and wait for the store's answer.
    async fn initiate_purchase(&self, product: &Product) -> Result<PurchaseResponse, TransportError>;

    /// The transaction currently entitling the user to `product`, if any.
    async fn current_entitlement(
        &self,
        product: &Product,
    ) -> Result<Option<VerificationResult>, TransportError>;

    /// Subscribe to background transaction updates.
    fn transaction_updates(&self) -> TransactionUpdates;

    /// Acknowledge a processed transaction.
    ///
    /// Not idempotent on the store side; callers must invoke it once per
    /// transaction.
    async fn finish(&self, transaction: &Transaction);
}
