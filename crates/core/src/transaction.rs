//! Transactions and the verification result model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VerificationFailure;
use crate::id::{ProductId, TransactionId};

/// How the user came to hold the entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipType {
    Purchased,
    FamilyShared,
}

/// One purchase or entitlement event issued by the store.
///
/// Each transaction must be acknowledged (finished) exactly once after it has
/// been processed; the engine tracks that, not this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    product_id: ProductId,
    purchased_at: DateTime<Utc>,
    ownership: OwnershipType,
}

impl Transaction {
    /// New purchased transaction for `product_id`, stamped now.
    pub fn new(product_id: impl Into<ProductId>) -> Self {
        Self::with_id(TransactionId::new(), product_id, Utc::now())
    }

    pub fn with_id(
        id: TransactionId,
        product_id: impl Into<ProductId>,
        purchased_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product_id: product_id.into(),
            purchased_at,
            ownership: OwnershipType::Purchased,
        }
    }

    pub fn family_shared(mut self) -> Self {
        self.ownership = OwnershipType::FamilyShared;
        self
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn purchased_at(&self) -> DateTime<Utc> {
        self.purchased_at
    }

    pub fn ownership(&self) -> OwnershipType {
        self.ownership
    }
}

/// Store verdict on a transaction's authenticity.
///
/// Produced by the collaborator for every purchase attempt, entitlement lookup
/// and background update. The unverified arm keeps the transaction so callers
/// can still acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    Verified {
        transaction: Transaction,
    },
    Unverified {
        transaction: Transaction,
        reason: String,
    },
}

impl VerificationResult {
    pub fn verified(transaction: Transaction) -> Self {
        Self::Verified { transaction }
    }

    pub fn unverified(transaction: Transaction, reason: impl Into<String>) -> Self {
        Self::Unverified {
            transaction,
            reason: reason.into(),
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            VerificationResult::Verified { transaction }
            | VerificationResult::Unverified { transaction, .. } => transaction,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified { .. })
    }
}

/// Accept a transaction only if the store marked it verified.
///
/// Every path that grants entitlements (direct purchase, background updates,
/// reconciliation) goes through this function.
pub fn verify(result: VerificationResult) -> Result<Transaction, VerificationFailure> {
    match result {
        VerificationResult::Verified { transaction } => Ok(transaction),
        VerificationResult::Unverified {
            transaction,
            reason,
        } => Err(VerificationFailure {
            transaction,
            reason,
        }),
    }
}
