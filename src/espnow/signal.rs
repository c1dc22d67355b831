//! Send confirmation rendezvous between the driver callback and the worker.
//!
//! Two bits, "delivered" and "failed", guarded by a mutex and a condvar. The
//! callback sets one bit and notifies; the worker waits with a timeout and
//! consumes whatever fired. The worker clears the bits immediately before
//! every send, so a confirmation that arrives after its attempt timed out
//! cannot be attributed to the next attempt (except in the short window
//! between the clear and the driver call).

use super::event::SendStatus;
use super::lock_recover;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const DELIVERED: u8 = 1 << 0;
const FAILED: u8 = 1 << 1;

/// Outcome observed by [`ConfirmationSignal::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Confirmation {
    Delivered,
    Failed,
}

pub(crate) struct ConfirmationSignal {
    bits: Mutex<u8>,
    cond: Condvar,
}

impl ConfirmationSignal {
    pub(crate) fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Record a driver confirmation. Called from callback context.
    pub(crate) fn set(&self, status: SendStatus) {
        let bit = match status {
            SendStatus::Success => DELIVERED,
            SendStatus::Fail => FAILED,
        };
        let mut bits = lock_recover(&self.bits);
        *bits |= bit;
        drop(bits);
        self.cond.notify_one();
    }

    /// Forget any confirmation received so far.
    pub(crate) fn clear(&self) {
        *lock_recover(&self.bits) = 0;
    }

    /// Wait up to `timeout` for a confirmation and consume it.
    ///
    /// Returns `None` on timeout. Both bits are cleared either way.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Confirmation> {
        let bits = lock_recover(&self.bits);
        let (mut bits, _) = match self.cond.wait_timeout_while(bits, timeout, |b| *b == 0) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };

        let fired = std::mem::take(&mut *bits);
        if fired & DELIVERED != 0 {
            Some(Confirmation::Delivered)
        } else if fired & FAILED != 0 {
            Some(Confirmation::Failed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out_without_confirmation() {
        let signal = ConfirmationSignal::new();
        let start = Instant::now();
        assert_eq!(signal.wait(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_set_before_wait_is_consumed_once() {
        let signal = ConfirmationSignal::new();
        signal.set(SendStatus::Success);
        assert_eq!(
            signal.wait(Duration::from_millis(10)),
            Some(Confirmation::Delivered)
        );
        assert_eq!(signal.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_failed_confirmation() {
        let signal = ConfirmationSignal::new();
        signal.set(SendStatus::Fail);
        assert_eq!(
            signal.wait(Duration::from_millis(10)),
            Some(Confirmation::Failed)
        );
    }

    #[test]
    fn test_clear_discards_stale_confirmation() {
        let signal = ConfirmationSignal::new();
        signal.set(SendStatus::Success);
        signal.clear();
        assert_eq!(signal.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wakes_on_confirmation_from_other_thread() {
        let signal = Arc::new(ConfirmationSignal::new());
        let setter = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set(SendStatus::Success);
        });

        let start = Instant::now();
        let result = signal.wait(Duration::from_secs(2));
        handle.join().unwrap();

        assert_eq!(result, Some(Confirmation::Delivered));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
