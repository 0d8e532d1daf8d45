//! Typed control signals delivered to channel workers.
//!
//! Each worker owns one [`SignalSlot`], a single-value mailbox with
//! latest-pending-wins semantics. Posting is idempotent: delivering the same
//! signal twice before the worker consumes it is indistinguishable from
//! delivering it once. Signals are consumed at safe points in the streaming
//! loop, never mid-write.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// An externally delivered per-worker control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Unwind cleanly: tear down everything and exit the worker.
    Terminate,
    /// Reconnect without touching the hand-off resource or decoder.
    SoftReset,
    /// Reconnect with full hand-off and decoder teardown.
    HardReset,
}

/// Why a streaming session is being torn down.
///
/// Supersedes the historical numeric reset codes: every reset flavor is a
/// distinct variant, including the health-monitor-driven one which has no
/// external signal equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    Terminate,
    SoftReset,
    HardReset,
    /// Forced by the health monitor (corrupt or stale decoder output).
    ContentReset,
}

impl ResetReason {
    /// Whether this reset tears down the hand-off resource and decoder.
    /// Only a soft reset preserves them across the reconnect.
    pub fn tears_down_output(self) -> bool {
        !matches!(self, ResetReason::SoftReset)
    }
}

impl From<ControlSignal> for ResetReason {
    fn from(signal: ControlSignal) -> Self {
        match signal {
            ControlSignal::Terminate => ResetReason::Terminate,
            ControlSignal::SoftReset => ResetReason::SoftReset,
            ControlSignal::HardReset => ResetReason::HardReset,
        }
    }
}

const EMPTY: u8 = 0;
const TERMINATE: u8 = 1;
const SOFT_RESET: u8 = 2;
const HARD_RESET: u8 = 3;

/// Single-value signal mailbox shared between a supervisor and one worker.
///
/// Cheap to clone; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SignalSlot {
    inner: Arc<AtomicU8>,
}

impl SignalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a signal. An unconsumed pending signal is overwritten
    /// (latest pending wins, no queue).
    pub fn post(&self, signal: ControlSignal) {
        let code = match signal {
            ControlSignal::Terminate => TERMINATE,
            ControlSignal::SoftReset => SOFT_RESET,
            ControlSignal::HardReset => HARD_RESET,
        };
        self.inner.store(code, Ordering::SeqCst);
    }

    /// Consume the pending signal, if any.
    pub fn take(&self) -> Option<ControlSignal> {
        match self.inner.swap(EMPTY, Ordering::SeqCst) {
            TERMINATE => Some(ControlSignal::Terminate),
            SOFT_RESET => Some(ControlSignal::SoftReset),
            HARD_RESET => Some(ControlSignal::HardReset),
            _ => None,
        }
    }

    /// Whether a signal is pending without consuming it.
    pub fn is_pending(&self) -> bool {
        self.inner.load(Ordering::SeqCst) != EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_pending_signal() {
        let slot = SignalSlot::new();
        assert_eq!(slot.take(), None);

        slot.post(ControlSignal::SoftReset);
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(ControlSignal::SoftReset));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn double_delivery_is_idempotent() {
        let slot = SignalSlot::new();
        slot.post(ControlSignal::HardReset);
        slot.post(ControlSignal::HardReset);

        assert_eq!(slot.take(), Some(ControlSignal::HardReset));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn latest_pending_wins() {
        let slot = SignalSlot::new();
        slot.post(ControlSignal::SoftReset);
        slot.post(ControlSignal::Terminate);

        assert_eq!(slot.take(), Some(ControlSignal::Terminate));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn clones_share_the_slot() {
        let slot = SignalSlot::new();
        let clone = slot.clone();
        clone.post(ControlSignal::Terminate);
        assert_eq!(slot.take(), Some(ControlSignal::Terminate));
    }

    #[test]
    fn only_soft_reset_preserves_output() {
        assert!(!ResetReason::SoftReset.tears_down_output());
        assert!(ResetReason::HardReset.tears_down_output());
        assert!(ResetReason::ContentReset.tears_down_output());
        assert!(ResetReason::Terminate.tears_down_output());
    }
}
