//! Publish/subscribe abstraction (mechanics only).
//!
//! Each subscriber gets a copy of every message published after it subscribed
//! (broadcast semantics). Messages published before subscribing are not
//! replayed; observers that need current state read a [`crate::SnapshotMirror`]
//! first.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// Callback invoked synchronously for each published message.
pub type Listener<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// A channel subscription to a bus.
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(snapshot) => render(&snapshot),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued, returning the last message (if any).
    pub fn latest(&self) -> Option<M> {
        self.receiver.try_iter().last()
    }
}

/// Transport-agnostic pub/sub contract.
///
/// `Send + Sync` so the engine can publish from foreground calls and the
/// background listener concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;

    /// Register a callback invoked for every message published from now on.
    fn listen(&self, listener: Listener<M>);
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }

    fn listen(&self, listener: Listener<M>) {
        (**self).listen(listener)
    }
}
