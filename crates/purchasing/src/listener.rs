//! Background consumer of store-pushed transaction updates.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use iapkit_core::TransportError;

use crate::client::{StoreClient, TransactionUpdates};
use crate::engine::{ProcessedUpdate, PurchaseEngine, UpdateDisposition};

/// Why the listener loop stopped.
#[derive(Debug, Clone)]
pub enum ListenerExit {
    /// Stop was requested (engine teardown).
    Cancelled,
    /// The store closed the update stream.
    StreamEnded,
    /// The update stream failed; the listener does not restart itself.
    StreamFailed(TransportError),
    /// The listener task panicked or was aborted.
    Crashed(String),
}

/// Listener runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub received: u64,
    pub granted: u64,
    pub unmappable: u64,
    pub rejected: u64,
    /// Updates whose transaction had already been finished by another path.
    pub duplicates: u64,
}

impl ListenerStats {
    fn record(&mut self, processed: &ProcessedUpdate) {
        self.received += 1;
        match processed.disposition {
            UpdateDisposition::Granted(_) => self.granted += 1,
            UpdateDisposition::Unmappable(_) => self.unmappable += 1,
            UpdateDisposition::Rejected(_) => self.rejected += 1,
        }
        if !processed.newly_finished {
            self.duplicates += 1;
        }
    }
}

/// Handle to stop and join a running listener.
///
/// Dropping the handle requests a stop without waiting for it.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<ListenerExit>>,
    stats: Arc<Mutex<ListenerStats>>,
}

impl ListenerHandle {
    /// Request a stop and wait for the loop to exit.
    ///
    /// An update already taken off the stream is processed to completion first.
    pub async fn shutdown(mut self) -> ListenerExit {
        self.shutdown.notify_one();
        self.wait().await
    }

    /// Wait for the loop to exit on its own (stream end or failure).
    pub async fn join(mut self) -> ListenerExit {
        self.wait().await
    }

    async fn wait(&mut self) -> ListenerExit {
        match self.join.take() {
            Some(join) => join
                .await
                .unwrap_or_else(|err| ListenerExit::Crashed(err.to_string())),
            None => ListenerExit::Cancelled,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.shutdown.notify_one();
        }
    }
}

/// Spawns the update loop for an engine.
#[derive(Debug)]
pub struct TransactionListener;

impl TransactionListener {
    /// Subscribe to the store's update stream and drain it on a tokio task.
    ///
    /// The subscription is taken before this returns, so updates pushed right
    /// after spawning are not missed. Must be called within a tokio runtime.
    pub fn spawn<S>(engine: Arc<PurchaseEngine<S>>) -> ListenerHandle
    where
        S: StoreClient + ?Sized + 'static,
    {
        let updates = engine.store().transaction_updates();
        let shutdown = Arc::new(Notify::new());
        let stats = Arc::new(Mutex::new(ListenerStats::default()));

        let join = tokio::spawn(listen_loop(engine, updates, shutdown.clone(), stats.clone()));

        ListenerHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }
}

async fn listen_loop<S>(
    engine: Arc<PurchaseEngine<S>>,
    mut updates: TransactionUpdates,
    shutdown: Arc<Notify>,
    stats: Arc<Mutex<ListenerStats>>,
) -> ListenerExit
where
    S: StoreClient + ?Sized,
{
    let name = engine.config().listener_name.clone();
    info!(listener = %name, "transaction listener started");

    let exit = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.notified() => break ListenerExit::Cancelled,
            next = updates.next() => next,
        };

        match next {
            Some(Ok(result)) => {
                let processed = engine.process_update(result).await;
                debug!(
                    listener = %name,
                    transaction_id = %processed.transaction_id,
                    newly_finished = processed.newly_finished,
                    "transaction update processed"
                );
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&processed);
            }
            Some(Err(err)) => {
                error!(listener = %name, error = %err, "transaction update stream failed");
                break ListenerExit::StreamFailed(err);
            }
            None => break ListenerExit::StreamEnded,
        }
    };

    info!(listener = %name, exit = ?exit, "transaction listener stopped");
    exit
}
