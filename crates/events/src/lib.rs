//! State-change publishing for observers of the purchase engine.
//!
//! The engine publishes an immutable [`StoreSnapshot`] after every change to its
//! fetched catalog or owned products. Observers either hold a channel
//! [`Subscription`] or register a callback; [`SnapshotMirror`] keeps the newest
//! snapshot for synchronous reads.

pub mod bus;
pub mod in_memory_bus;
pub mod snapshot;

pub use bus::{EventBus, Listener, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use snapshot::{SnapshotMirror, StoreSnapshot};
