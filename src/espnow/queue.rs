//! Transfer queue between producers (driver callbacks, public API) and the
//! processing worker.
//!
//! The queue is a bounded `tokio::sync::mpsc` channel. Its free-slot count
//! doubles as the back-pressure signal: new work is refused once fewer than
//! 10% of the slots are free, before anything is allocated for it.

use super::address::MacAddr;
use super::error::EspNowError;
use super::read_recover;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};

/// Direction of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// Received from a peer, to be published.
    Inbound,
    /// Submitted by the application, to be transmitted.
    Outbound,
}

/// One unit of work for the worker. Owns its payload.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub kind: EntryKind,
    pub peer: MacAddr,
    pub payload: Vec<u8>,
}

impl QueueEntry {
    pub(crate) fn inbound(peer: MacAddr, payload: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Inbound,
            peer,
            payload,
        }
    }

    pub(crate) fn outbound(peer: MacAddr, payload: Vec<u8>) -> Self {
        Self {
            kind: EntryKind::Outbound,
            peer,
            payload,
        }
    }
}

/// Worker side of the queue.
pub(crate) type QueueReceiver = mpsc::Receiver<QueueEntry>;

/// Why a frame from callback context was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    /// The queue is closed or being reconfigured.
    Closed,
    /// Fewer free slots than the low-water mark.
    Backpressure,
    /// Lost the race against another producer for the last slots.
    Full,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "queue closed"),
            Self::Backpressure => write!(f, "queue nearly full"),
            Self::Full => write!(f, "queue full"),
        }
    }
}

/// Producer side of the queue, shared by all producers.
///
/// The sender sits behind an `RwLock` so shutdown can close the queue while
/// producers keep a reference to it; the worker's `blocking_recv` returns
/// `None` once the last sender is gone and the queue is drained.
pub(crate) struct TransferQueue {
    tx: RwLock<Option<mpsc::Sender<QueueEntry>>>,
    capacity: usize,
}

/// Low-water mark check: admit while at least 10% of the slots are free.
fn admits(free: usize, capacity: usize) -> bool {
    free * 10 >= capacity
}

impl TransferQueue {
    /// Create a queue with `capacity` slots and return its receiving end.
    pub(crate) fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx: RwLock::new(Some(tx)),
            capacity,
        };
        (queue, rx)
    }

    /// Configured number of slots.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries currently queued (including reserved slots).
    pub(crate) fn depth(&self) -> usize {
        match read_recover(&self.tx).as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    /// Queue a received frame. Never blocks.
    ///
    /// The payload is copied only after the back-pressure check passed; on
    /// any failure the copy is dropped again before returning.
    pub(crate) fn push_from_callback(&self, peer: MacAddr, data: &[u8]) -> Result<(), DropReason> {
        let guard = self.tx.try_read().map_err(|_| DropReason::Closed)?;
        let tx = guard.as_ref().ok_or(DropReason::Closed)?;

        if !admits(tx.capacity(), self.capacity) {
            return Err(DropReason::Backpressure);
        }

        let entry = QueueEntry::inbound(peer, data.to_vec());
        tx.try_send(entry).map_err(|e| match e {
            TrySendError::Full(_) => DropReason::Full,
            TrySendError::Closed(_) => DropReason::Closed,
        })
    }

    /// Queue an outbound frame without waiting.
    pub(crate) fn try_push_outbound(&self, peer: MacAddr, data: &[u8]) -> Result<(), EspNowError> {
        let guard = read_recover(&self.tx);
        let tx = guard.as_ref().ok_or(EspNowError::NotInitialized)?;

        if !admits(tx.capacity(), self.capacity) {
            return Err(EspNowError::Backpressure);
        }

        tx.try_send(QueueEntry::outbound(peer, data.to_vec()))
            .map_err(|e| match e {
                TrySendError::Full(_) => EspNowError::ResourceExhausted("transfer queue full"),
                TrySendError::Closed(_) => EspNowError::NotInitialized,
            })
    }

    /// Queue an outbound frame, waiting at most `timeout` for a free slot.
    pub(crate) async fn push_outbound(
        &self,
        peer: MacAddr,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), EspNowError> {
        // Clone the sender so no lock guard is held across the await.
        let tx = read_recover(&self.tx)
            .clone()
            .ok_or(EspNowError::NotInitialized)?;

        if !admits(tx.capacity(), self.capacity) {
            return Err(EspNowError::Backpressure);
        }

        tx.send_timeout(QueueEntry::outbound(peer, data.to_vec()), timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => {
                    EspNowError::ResourceExhausted("transfer queue full")
                }
                SendTimeoutError::Closed(_) => EspNowError::NotInitialized,
            })
    }

    /// Stop accepting entries. Already queued entries stay for the worker.
    pub(crate) fn close(&self) {
        let sender = match self.tx.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }
}
