//! ESP-NOW messaging core.
//!
//! This module turns the radio driver's callback-driven, fire-and-forget
//! frame interface into confirmed, retried datagram messaging:
//!
//! - [`capture`]: driver callbacks, which only queue frames or set a signal
//! - [`queue`]: bounded transfer queue and back-pressure policy
//! - [`signal`]: send confirmation rendezvous
//! - [`worker`]: single processing thread, send-with-retry and delivery
//! - [`stats`]: send/receive counters
//!
//! # Example
//!
//! ```
//! use espnow_rs_esp32::radio::{SimulatedAir, SimulatedRadio};
//! use espnow_rs_esp32::{EspNow, EspNowConfig, EspNowEvent, MacAddr};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let air = SimulatedAir::new();
//! let node = EspNow::new(SimulatedRadio::on_air(MacAddr::new([2, 0, 0, 0, 0, 1]), &air));
//! node.initialize(&EspNowConfig::default())?;
//!
//! let mut events = node.subscribe();
//! node.send(None, b"hello").await?;
//!
//! if let EspNowEvent::SendCompleted { status, .. } = events.recv().await? {
//!     println!("broadcast finished: {:?}", status);
//! }
//! node.shutdown();
//! # Ok(())
//! # }
//! ```

mod address;
mod capture;
mod config;
mod driver;
mod error;
mod event;
mod queue;
mod signal;
mod stats;
mod worker;


pub use address::{MacAddr, ParseMacError, MAC_LEN};
pub use config::{
    EspNowConfig, WifiInterface, CONFIRM_TIMEOUT, ENQUEUE_TIMEOUT, MAX_CHANNEL, MAX_DATA_LEN,
    MAX_QUEUE_SIZE, MIN_CHANNEL, MIN_STACK_SIZE,
};
pub use driver::{DriverError, PeerInfo, RadioDriver, RecvCallback, SendCallback};
pub use error::EspNowError;
pub use event::{EspNowEvent, SendStatus};
pub use stats::StatsSnapshot;

use config::{validate_attempts, validate_channel, validate_payload};
use log::{debug, error, info, warn};
use queue::{QueueReceiver, TransferQueue};
use signal::ConfirmationSignal;
use stats::Stats;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use worker::Worker;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// State shared between the API, the driver callbacks and the worker.
pub(crate) struct Shared {
    pub(crate) queue: TransferQueue,
    pub(crate) signal: ConfirmationSignal,
    pub(crate) stats: Arc<Stats>,
    pub(crate) events: broadcast::Sender<EspNowEvent>,
    pub(crate) interface: WifiInterface,
    pub(crate) confirm_timeout: Duration,
    /// False while in low-power mode. Callbacks hold a read guard while
    /// queueing, so taking the write guard waits out any in-flight receive.
    pub(crate) receive_enabled: RwLock<bool>,
    pub(crate) dropped_frames: AtomicU64,
    attempts: AtomicU8,
}

impl Shared {
    pub(crate) fn new(
        config: &EspNowConfig,
        stats: Arc<Stats>,
        events: broadcast::Sender<EspNowEvent>,
    ) -> (Arc<Self>, QueueReceiver) {
        let (queue, rx) = TransferQueue::new(config.queue_size);
        let shared = Self {
            queue,
            signal: ConfirmationSignal::new(),
            stats,
            events,
            interface: config.wifi_interface,
            confirm_timeout: config.confirm_timeout,
            receive_enabled: RwLock::new(!config.low_power),
            dropped_frames: AtomicU64::new(0),
            attempts: AtomicU8::new(config.attempts),
        };
        (Arc::new(shared), rx)
    }

    pub(crate) fn attempts(&self) -> u8 {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// Resources that exist only between `initialize` and `shutdown`.
struct Running {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// ESP-NOW messaging handle.
///
/// Owns the driver and, while initialized, the transfer queue, the
/// confirmation signal and the worker thread. All methods take `&self`, so
/// the handle can be shared behind an `Arc`. Dropping the handle shuts it
/// down.
pub struct EspNow<D: RadioDriver> {
    driver: Arc<D>,
    events: broadcast::Sender<EspNowEvent>,
    stats: Arc<Stats>,
    initialized: AtomicBool,
    /// Serializes initialize, shutdown and receive-hook reconfiguration.
    state: Mutex<Option<Running>>,
    created_at: Instant,
}

impl<D: RadioDriver> EspNow<D> {
    /// Create an uninitialized handle over `driver`.
    pub fn new(driver: D) -> Self {
        Self::with_event_capacity(driver, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a handle whose subscribers buffer up to `capacity` events.
    pub fn with_event_capacity(driver: D, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            driver: Arc::new(driver),
            events,
            stats: Arc::new(Stats::new()),
            initialized: AtomicBool::new(false),
            state: Mutex::new(None),
            created_at: Instant::now(),
        }
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Subscribe to `SendCompleted` and `DataReceived` events.
    ///
    /// Subscriptions survive `shutdown` and re-`initialize`.
    pub fn subscribe(&self) -> broadcast::Receiver<EspNowEvent> {
        self.events.subscribe()
    }

    /// Bring up the driver, queue, callbacks and worker.
    ///
    /// Calling this while already initialized changes nothing and returns
    /// `Ok(())`. On failure everything created so far is torn down again,
    /// the previous channel is restored and the handle stays uninitialized.
    pub fn initialize(&self, config: &EspNowConfig) -> Result<(), EspNowError> {
        let mut state = lock_recover(&self.state);
        if state.is_some() {
            info!("ESP-NOW already initialized");
            return Ok(());
        }

        config.validate()?;
        let previous_channel = self.driver.channel().ok();
        self.driver.set_channel(config.channel)?;

        let running = match self.start(config) {
            Ok(running) => running,
            Err(e) => {
                if let Some(channel) = previous_channel {
                    if let Err(re) = self.driver.set_channel(channel) {
                        warn!("Failed to restore channel {}: {}", channel, re);
                    }
                }
                return Err(e);
            }
        };
        *state = Some(running);
        self.initialized.store(true, Ordering::Release);

        info!(
            "ESP-NOW initialized: channel {}, {} attempts, queue {}, low power {}",
            config.channel, config.attempts, config.queue_size, config.low_power
        );
        Ok(())
    }

    /// Driver bring-up after the channel is set. Undoes its own steps on
    /// failure.
    fn start(&self, config: &EspNowConfig) -> Result<Running, EspNowError> {
        let (shared, rx) = Shared::new(config, self.stats.clone(), self.events.clone());

        self.driver.init()?;

        if let Err(e) = self
            .driver
            .register_send_callback(capture::send_hook(shared.clone()))
        {
            self.driver.deinit();
            return Err(e.into());
        }

        if !config.low_power {
            if let Err(e) = self
                .driver
                .register_recv_callback(capture::recv_hook(shared.clone()))
            {
                self.release_driver();
                return Err(e.into());
            }
        }

        let cancel = CancellationToken::new();
        let worker = Worker::new(self.driver.clone(), shared.clone(), cancel.clone());
        match worker.spawn(rx, config) {
            Ok(handle) => Ok(Running {
                shared,
                worker: Some(handle),
                cancel,
            }),
            Err(e) => {
                error!("Failed to spawn ESP-NOW worker: {}", e);
                self.release_driver();
                Err(EspNowError::ResourceExhausted("worker thread"))
            }
        }
    }

    /// Stop the worker and release the driver.
    ///
    /// New work is refused from the moment this is called. Queued entries
    /// are released unprocessed and no further events are published. Does
    /// nothing when not initialized.
    pub fn shutdown(&self) {
        let mut state = lock_recover(&self.state);
        let Some(mut running) = state.take() else {
            return;
        };

        self.initialized.store(false, Ordering::Release);
        running.cancel.cancel();
        running.shared.queue.close();

        if let Some(handle) = running.worker.take() {
            if handle.join().is_err() {
                error!("ESP-NOW worker panicked");
            }
        }

        self.release_driver();
        info!("ESP-NOW shut down");
    }

    /// Returns true between a successful `initialize` and `shutdown`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Queue `data` for `target`, or for broadcast when `target` is `None`.
    ///
    /// Waits at most [`ENQUEUE_TIMEOUT`] for queue space. `Ok` means the
    /// message was accepted; its outcome arrives later as exactly one
    /// [`EspNowEvent::SendCompleted`].
    pub async fn send(&self, target: Option<MacAddr>, data: &[u8]) -> Result<(), EspNowError> {
        validate_payload(data)?;
        let shared = self.shared()?;
        let peer = target.unwrap_or(MacAddr::BROADCAST);

        shared
            .queue
            .push_outbound(peer, data, ENQUEUE_TIMEOUT)
            .await?;
        debug!("TX queued: {} bytes to {}", data.len(), peer);
        Ok(())
    }

    /// Like [`send`](Self::send) but never waits; for callers without an
    /// async runtime.
    pub fn try_send(&self, target: Option<MacAddr>, data: &[u8]) -> Result<(), EspNowError> {
        validate_payload(data)?;
        let shared = self.shared()?;
        let peer = target.unwrap_or(MacAddr::BROADCAST);

        shared.queue.try_push_outbound(peer, data)?;
        debug!("TX queued: {} bytes to {}", data.len(), peer);
        Ok(())
    }

    /// ESP-NOW protocol version reported by the driver.
    pub fn version(&self) -> Result<u32, EspNowError> {
        self.shared()?;
        Ok(self.driver.version()?)
    }

    /// This node's address on the configured interface.
    pub fn own_address(&self) -> Result<MacAddr, EspNowError> {
        let shared = self.shared()?;
        Ok(self.driver.own_address(shared.interface)?)
    }

    /// Current send/receive counters.
    pub fn stats(&self) -> Result<StatsSnapshot, EspNowError> {
        self.shared()?;
        Ok(self.stats.snapshot())
    }

    /// Zero all counters.
    pub fn reset_stats(&self) -> Result<(), EspNowError> {
        self.shared()?;
        self.stats.reset();
        Ok(())
    }

    /// Send attempts per outbound message.
    pub fn attempts(&self) -> Result<u8, EspNowError> {
        Ok(self.shared()?.attempts())
    }

    /// Change the send attempts; applies from the next outbound message.
    pub fn set_attempts(&self, attempts: u8) -> Result<(), EspNowError> {
        validate_attempts(attempts)?;
        let shared = self.shared()?;
        shared.attempts.store(attempts, Ordering::Relaxed);
        info!("ESP-NOW attempts set to {}", attempts);
        Ok(())
    }

    /// Current radio channel.
    pub fn channel(&self) -> Result<u8, EspNowError> {
        self.shared()?;
        Ok(self.driver.channel()?)
    }

    /// Switch the radio channel (1..=14).
    pub fn set_channel(&self, channel: u8) -> Result<(), EspNowError> {
        validate_channel(channel)?;
        self.shared()?;
        self.driver.set_channel(channel)?;
        info!("ESP-NOW channel set to {}", channel);
        Ok(())
    }

    /// Returns true while inbound frames are ignored.
    pub fn low_power(&self) -> Result<bool, EspNowError> {
        let shared = self.shared()?;
        let enabled = *read_recover(&shared.receive_enabled);
        Ok(!enabled)
    }

    /// Enable or disable low-power mode (receiving off).
    ///
    /// Blocks until any receive callback already in progress has finished,
    /// then re-registers the receive hook as needed. Frames arriving while
    /// the hook is being swapped are dropped.
    pub fn set_low_power(&self, low_power: bool) -> Result<(), EspNowError> {
        let state = lock_recover(&self.state);
        let shared = match state.as_ref() {
            Some(running) if self.is_initialized() => running.shared.clone(),
            _ => return Err(EspNowError::NotInitialized),
        };

        let mut enabled = write_recover(&shared.receive_enabled);
        self.driver.unregister_recv_callback()?;
        *enabled = false;

        if !low_power {
            self.driver
                .register_recv_callback(capture::recv_hook(shared.clone()))?;
            *enabled = true;
        }
        drop(enabled);
        drop(state);

        info!("ESP-NOW low power mode {}", if low_power { "on" } else { "off" });
        Ok(())
    }

    /// Entries waiting in the transfer queue.
    pub fn queue_depth(&self) -> Result<usize, EspNowError> {
        Ok(self.shared()?.queue.depth())
    }

    /// Transfer queue capacity.
    pub fn queue_capacity(&self) -> Result<usize, EspNowError> {
        Ok(self.shared()?.queue.capacity())
    }

    /// Inbound frames dropped since initialize (invalid, back-pressure,
    /// receiving disabled).
    pub fn dropped_frames(&self) -> Result<u64, EspNowError> {
        Ok(self.shared()?.dropped_frames.load(Ordering::Relaxed))
    }

    /// Seconds since the handle was created.
    pub fn uptime_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }

    fn shared(&self) -> Result<Arc<Shared>, EspNowError> {
        if !self.is_initialized() {
            return Err(EspNowError::NotInitialized);
        }
        lock_recover(&self.state)
            .as_ref()
            .map(|running| running.shared.clone())
            .ok_or(EspNowError::NotInitialized)
    }

    fn release_driver(&self) {
        if let Err(e) = self.driver.unregister_recv_callback() {
            debug!("Unregistering receive callback: {}", e);
        }
        if let Err(e) = self.driver.unregister_send_callback() {
            debug!("Unregistering send callback: {}", e);
        }
        self.driver.deinit();
    }
}

impl<D: RadioDriver> Drop for EspNow<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("ESP-NOW mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read_recover<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("ESP-NOW lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("ESP-NOW lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
