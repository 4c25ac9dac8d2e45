//! In-app purchase engine.
//!
//! Fetches purchasable products from a store collaborator, drives purchase
//! attempts to a typed outcome, verifies transactions before granting
//! entitlements, and drains the store's background transaction updates,
//! finishing each transaction exactly once.
//!
//! ```ignore
//! let store = Arc::new(PlatformStore::new());
//! let engine = PurchaseEngine::new(store, EngineConfig::from_env());
//! let facade = StoreFacade::start(engine);
//!
//! let products = facade.fetch_products().await?;
//! let outcome = facade.request_and_handle_purchase(&products[0]).await?;
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod facade;
pub mod legacy;
pub mod listener;
pub mod sandbox;
pub mod sink;

pub use catalog::ProductCatalog;
pub use client::{PurchaseResponse, StoreClient, TransactionUpdates};
pub use config::EngineConfig;
pub use engine::{ProcessedUpdate, PurchaseEngine, ReconcileReport, UpdateDisposition};
pub use facade::StoreFacade;
pub use legacy::{LegacyQueueAdapter, QueuedTransaction, QueuedTransactionState};
pub use listener::{ListenerExit, ListenerHandle, ListenerStats, TransactionListener};
pub use sandbox::SandboxStore;
pub use sink::{ErrorSink, FailureOrigin, RecordingErrorSink, TracingErrorSink};
