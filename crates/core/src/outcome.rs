//! Result of a single purchase attempt.

use crate::error::TransportError;
use crate::id::ProductId;
use crate::product::Product;

/// Outcome of a purchase request.
///
/// Cancel, pending, unverified and unmappable are normal business outcomes and
/// are returned as values so callers cannot mistake "user cancelled" for a crash.
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    /// Verified, mapped to a catalog product, granted and finished.
    Success(Product),
    /// The user dismissed the purchase.
    Canceled,
    /// Awaiting external action (e.g. parental approval); a background update
    /// resolves it later.
    Pending,
    /// The store could not vouch for the transaction. Nothing was granted.
    VerificationFailed { reason: String },
    /// Verified, but the product is not in the current catalog. Nothing was granted.
    Unmappable(ProductId),
    /// The purchase call itself failed.
    TransportError(TransportError),
    /// The store answered with a response kind this layer does not know.
    Unknown,
}

impl PurchaseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PurchaseOutcome::Success(_))
    }

    pub fn product(&self) -> Option<&Product> {
        match self {
            PurchaseOutcome::Success(product) => Some(product),
            _ => None,
        }
    }

    /// Short user-facing message. Cancellation needs no explanation.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            PurchaseOutcome::Success(_) => Some("Purchase complete."),
            PurchaseOutcome::Canceled => None,
            PurchaseOutcome::Pending => Some("Your purchase is pending approval."),
            PurchaseOutcome::VerificationFailed { .. } => {
                Some("Your purchase could not be verified.")
            }
            PurchaseOutcome::Unmappable(_) => {
                Some("This purchase is not available in the current catalog.")
            }
            PurchaseOutcome::TransportError(_) => {
                Some("Could not reach the store. Please try again.")
            }
            PurchaseOutcome::Unknown => Some("Something went wrong with your purchase."),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PurchaseOutcome::Success(_) => "success",
            PurchaseOutcome::Canceled => "canceled",
            PurchaseOutcome::Pending => "pending",
            PurchaseOutcome::VerificationFailed { .. } => "verification_failed",
            PurchaseOutcome::Unmappable(_) => "unmappable",
            PurchaseOutcome::TransportError(_) => "transport_error",
            PurchaseOutcome::Unknown => "unknown",
        }
    }
}
