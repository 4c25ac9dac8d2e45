//! `iapkit-core`: domain building blocks for in-app purchases.
//!
//! This crate contains **pure domain** types (no IO, no async): product and
//! transaction records, the verification result model, purchase outcomes and
//! the error taxonomy shared by every other crate.

pub mod error;
pub mod id;
pub mod outcome;
pub mod product;
pub mod transaction;

pub use error::{StoreError, StoreResult, TransportError, VerificationFailure};
pub use id::{ProductId, TransactionId};
pub use outcome::PurchaseOutcome;
pub use product::Product;
pub use transaction::{OwnershipType, Transaction, VerificationResult, verify};
