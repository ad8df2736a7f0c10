//! Cancellation signals observed by the evaluator.

use crate::error::{EvalError, EvalResult};
use tokio_util::sync::CancellationToken;

/// Sticky, edge-triggered cancellation signal. Once pulsed it stays
/// pulsed; pulsing again is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Interruptor {
    token: CancellationToken,
}

impl Interruptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulse(&self) {
        self.token.cancel();
    }

    pub fn is_pulsed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is pulsed.
    pub async fn pulsed(&self) {
        self.token.cancelled().await;
    }
}

/// Signal that is pulsed iff either of its two inputs is pulsed.
#[derive(Debug, Clone)]
pub struct CompositeInterruptor {
    a: Interruptor,
    b: Interruptor,
}

impl CompositeInterruptor {
    pub fn new(a: Interruptor, b: Interruptor) -> Self {
        Self { a, b }
    }

    pub fn is_pulsed(&self) -> bool {
        self.a.is_pulsed() || self.b.is_pulsed()
    }

    pub async fn pulsed(&self) {
        tokio::select! {
            _ = self.a.pulsed() => {}
            _ = self.b.pulsed() => {}
        }
    }

    /// Edge check used at evaluator suspension points.
    pub fn check(&self) -> EvalResult<()> {
        if self.is_pulsed() {
            Err(EvalError::Interrupted)
        } else {
            Ok(())
        }
    }
}
