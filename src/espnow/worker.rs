//! Processing worker.
//!
//! One dedicated thread drains the transfer queue in FIFO order. Outbound
//! entries run the send-with-retry protocol to completion, including every
//! confirmation wait, before the next entry is looked at; this keeps exactly
//! one send awaiting confirmation at any time. The price is that a slow or
//! unreachable peer delays all traffic behind it by up to
//! `attempts * confirm_timeout`.

use super::address::MacAddr;
use super::config::EspNowConfig;
use super::driver::{DriverError, PeerInfo, RadioDriver};
use super::event::{EspNowEvent, SendStatus};
use super::queue::{EntryKind, QueueEntry, QueueReceiver};
use super::signal::Confirmation;
use super::Shared;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Worker thread name.
pub(crate) const WORKER_NAME: &str = "espnow_processing";

/// Smallest worker stack on hosted targets, where `stack_size` is sized
/// for a FreeRTOS task and too tight for std formatting and logging.
#[cfg(not(feature = "esp32"))]
const HOST_MIN_STACK_SIZE: usize = 64 * 1024;

/// Driver peer record that lives for one attempt sequence.
///
/// Removes the peer again on drop, on every exit path. A peer that was
/// already registered by someone else is used as-is and left in place.
pub(crate) struct PeerGuard<'a, D: RadioDriver> {
    driver: &'a D,
    address: MacAddr,
    owned: bool,
}

impl<'a, D: RadioDriver> PeerGuard<'a, D> {
    pub(crate) fn add(driver: &'a D, peer: PeerInfo) -> Result<Self, DriverError> {
        let owned = match driver.add_peer(&peer) {
            Ok(()) => true,
            Err(DriverError::PeerExists) => {
                debug!("Peer {} already registered, reusing", peer.address);
                false
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            driver,
            address: peer.address,
            owned,
        })
    }
}

impl<D: RadioDriver> Drop for PeerGuard<'_, D> {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.driver.remove_peer(&self.address) {
                warn!("Failed to remove peer {}: {}", self.address, e);
            }
        }
    }
}

pub(crate) struct Worker<D: RadioDriver> {
    driver: Arc<D>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl<D: RadioDriver> Worker<D> {
    pub(crate) fn new(driver: Arc<D>, shared: Arc<Shared>, cancel: CancellationToken) -> Self {
        Self {
            driver,
            shared,
            cancel,
        }
    }

    /// Start the worker thread with the configured stack size and priority.
    pub(crate) fn spawn(
        self,
        rx: QueueReceiver,
        config: &EspNowConfig,
    ) -> std::io::Result<JoinHandle<()>> {
        #[cfg(feature = "esp32")]
        apply_task_config(config);
        #[cfg(feature = "esp32")]
        let stack_size = config.stack_size;
        #[cfg(not(feature = "esp32"))]
        let stack_size = config.stack_size.max(HOST_MIN_STACK_SIZE);

        let result = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .stack_size(stack_size)
            .spawn(move || self.run(rx));

        #[cfg(feature = "esp32")]
        reset_task_config();

        result
    }

    /// Worker loop. Returns once the queue is closed and drained.
    pub(crate) fn run(self, mut rx: QueueReceiver) {
        info!("ESP-NOW worker started");
        let mut released = 0usize;

        while let Some(entry) = rx.blocking_recv() {
            if self.cancel.is_cancelled() {
                released += 1;
                continue;
            }
            match entry.kind {
                EntryKind::Outbound => self.process_outbound(entry),
                EntryKind::Inbound => self.process_inbound(entry),
            }
        }

        if released > 0 {
            info!("Released {} unprocessed entries on shutdown", released);
        }
        info!("ESP-NOW worker stopped");
    }

    /// Send-with-retry protocol for one outbound entry.
    fn process_outbound(&self, entry: QueueEntry) {
        let attempts = self.shared.attempts();
        let peer = PeerInfo::new(entry.peer, self.shared.interface);

        let _peer = match PeerGuard::add(self.driver.as_ref(), peer) {
            Ok(guard) => guard,
            Err(e) => {
                error!("Cannot send to {}: failed to add peer: {}", entry.peer, e);
                return;
            }
        };

        let mut status = SendStatus::Fail;
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                debug!("Shutdown during send to {}, abandoning", entry.peer);
                return;
            }

            self.shared.signal.clear();
            if let Err(e) = self.driver.send_frame(&entry.peer, &entry.payload) {
                debug!(
                    "TX {}/{} to {} rejected by driver: {}",
                    attempt, attempts, entry.peer, e
                );
                continue;
            }

            match self.shared.signal.wait(self.shared.confirm_timeout) {
                Some(Confirmation::Delivered) => {
                    debug!("TX {}/{} to {} delivered", attempt, attempts, entry.peer);
                    status = SendStatus::Success;
                    break;
                }
                Some(Confirmation::Failed) => {
                    debug!("TX {}/{} to {} failed", attempt, attempts, entry.peer);
                }
                None => {
                    debug!("TX {}/{} to {} timed out", attempt, attempts, entry.peer);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return;
        }

        self.shared.stats.record_sent(status.is_success());
        if !status.is_success() {
            warn!("Send to {} failed after {} attempts", entry.peer, attempts);
        }
        self.emit(EspNowEvent::SendCompleted {
            address: entry.peer,
            status,
        });
    }

    /// Publish one received frame. The payload moves into the event.
    fn process_inbound(&self, entry: QueueEntry) {
        self.shared.stats.record_received();
        debug!("RX {} bytes from {}", entry.payload.len(), entry.peer);
        self.emit(EspNowEvent::DataReceived {
            address: entry.peer,
            data: entry.payload,
        });
    }

    fn emit(&self, event: EspNowEvent) {
        if let Err(e) = self.shared.events.send(event) {
            warn!("No subscribers, dropped event for {}", e.0.address());
        }
    }
}

#[cfg(feature = "esp32")]
fn apply_task_config(config: &EspNowConfig) {
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    let task_config = ThreadSpawnConfiguration {
        name: Some(&b"espnow_processing\0"[..]),
        stack_size: config.stack_size,
        priority: config.task_priority,
        ..Default::default()
    };
    if let Err(e) = task_config.set() {
        warn!("Failed to apply worker task configuration: {:?}", e);
    }
}

#[cfg(feature = "esp32")]
fn reset_task_config() {
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;

    if let Err(e) = ThreadSpawnConfiguration::default().set() {
        warn!("Failed to restore default task configuration: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::espnow::WifiInterface;
    use crate::radio::SimulatedRadio;

    const PEER: MacAddr = MacAddr::new([0x24, 0x6F, 0x28, 0x00, 0x00, 0x03]);

    fn initialized_radio() -> SimulatedRadio {
        let radio = SimulatedRadio::new(MacAddr::new([0x24, 0x6F, 0x28, 0x00, 0x00, 0x99]));
        radio.init().unwrap();
        radio
    }

    #[test]
    fn test_peer_guard_removes_peer_on_drop() {
        let radio = initialized_radio();
        {
            let _guard = PeerGuard::add(&radio, PeerInfo::new(PEER, WifiInterface::Sta)).unwrap();
            assert!(radio.has_peer(&PEER));
        }
        assert!(!radio.has_peer(&PEER));
    }

    #[test]
    fn test_peer_guard_leaves_foreign_peer() {
        let radio = initialized_radio();
        radio
            .add_peer(&PeerInfo::new(PEER, WifiInterface::Sta))
            .unwrap();
        {
            let _guard = PeerGuard::add(&radio, PeerInfo::new(PEER, WifiInterface::Sta)).unwrap();
        }
        assert!(radio.has_peer(&PEER));
    }

    #[test]
    fn test_peer_guard_propagates_failure() {
        let radio = SimulatedRadio::new(MacAddr::new([0x24, 0x6F, 0x28, 0x00, 0x00, 0x98]));
        // not initialized
        let result = PeerGuard::add(&radio, PeerInfo::new(PEER, WifiInterface::Sta));
        assert!(matches!(result, Err(DriverError::NotInitialized)));
    }
}
