//! Where rejected transactions are reported.

use std::sync::{Mutex, PoisonError};

use iapkit_core::VerificationFailure;

/// Which path observed the verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// Background transaction update.
    Listener,
    /// Current-entitlement lookup during reconciliation.
    Reconcile,
}

/// Receives verification failures that are swallowed by the engine.
///
/// Implementations must not block; they run inline on the listener task.
pub trait ErrorSink: Send + Sync {
    fn report(&self, origin: FailureOrigin, failure: &VerificationFailure);
}

/// Default sink: logs at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, origin: FailureOrigin, failure: &VerificationFailure) {
        tracing::warn!(
            origin = ?origin,
            transaction_id = %failure.transaction.id(),
            product_id = %failure.product_id(),
            reason = %failure.reason,
            "transaction failed verification"
        );
    }
}

/// Sink that keeps every report in memory (tests, diagnostics screens).
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<(FailureOrigin, VerificationFailure)>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(FailureOrigin, VerificationFailure)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, origin: FailureOrigin, failure: &VerificationFailure) {
        TracingErrorSink.report(origin, failure);
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((origin, failure.clone()));
    }
}
