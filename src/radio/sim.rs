//! In-memory radio for host builds and tests.
//!
//! A [`SimulatedAir`] connects any number of [`SimulatedRadio`]s. A frame
//! sent on one radio reaches every other initialized radio on the same
//! channel whose address matches the destination (or all of them for the
//! broadcast address). How the send is confirmed is chosen per radio with
//! [`AckMode`], which is how tests provoke retries and timeouts.
//!
//! Callbacks run on the sending thread, or on a short-lived helper thread
//! when an ack delay is set, never while an internal lock is held.

use crate::espnow::{
    DriverError, MacAddr, PeerInfo, RadioDriver, RecvCallback, SendCallback, SendStatus,
    WifiInterface, MAX_CHANNEL, MIN_CHANNEL,
};
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Peer table size of the ESP-NOW driver.
pub const MAX_PEERS: usize = 20;

/// Protocol version reported by the simulator.
pub const SIMULATED_VERSION: u32 = 1;

/// Sent frames kept by [`SimulatedRadio::sent_frames`]; older ones are
/// discarded.
pub const SENT_LOG_CAPACITY: usize = 256;

type SharedSendCallback = Arc<dyn Fn(&[u8], SendStatus) + Send + Sync>;
type SharedRecvCallback = Arc<dyn Fn(&[u8], &[u8]) + Send + Sync>;

/// How a [`SimulatedRadio`] confirms sent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Success for broadcasts, and for unicasts that reached a radio.
    #[default]
    Air,
    /// Always report success.
    Deliver,
    /// Always report failure. Nothing is delivered.
    Fail,
    /// Never confirm. Nothing is delivered.
    Silent,
    /// Refuse the frame synchronously.
    Reject,
}

/// Driver call that a [`SimulatedRadio`] can be told to refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `init` fails.
    Init,
    /// `register_send_callback` fails.
    SendCallback,
    /// `register_recv_callback` fails.
    RecvCallback,
}

/// A frame handed to [`SimulatedRadio::send_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Destination address.
    pub to: MacAddr,
    /// Frame payload.
    pub data: Vec<u8>,
    /// When the driver accepted (or refused) the frame.
    pub at: Instant,
}

/// Shared medium between simulated radios.
#[derive(Default)]
pub struct SimulatedAir {
    radios: Mutex<Vec<Weak<RadioInner>>>,
}

impl SimulatedAir {
    /// Create an empty medium.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of radios still attached.
    pub fn radio_count(&self) -> usize {
        let mut radios = lock(&self.radios);
        radios.retain(|r| r.strong_count() > 0);
        radios.len()
    }

    fn attach(&self, radio: &Arc<RadioInner>) {
        let mut radios = lock(&self.radios);
        radios.retain(|r| r.strong_count() > 0);
        radios.push(Arc::downgrade(radio));
    }

    /// Deliver `data` from `from` on `channel`. Returns true when at least
    /// one radio took the frame.
    fn transmit(&self, from: MacAddr, to: MacAddr, channel: u8, data: &[u8]) -> bool {
        let receivers: Vec<Option<SharedRecvCallback>> = lock(&self.radios)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|r| r.address != from && (to.is_broadcast() || r.address == to))
            .filter_map(|r| {
                let state = lock(&r.state);
                let listening = state.initialized && state.channel == channel;
                let callback = state.recv_callback.clone();
                drop(state);
                listening.then_some(callback)
            })
            .collect();

        for callback in receivers.iter().flatten() {
            callback(from.as_bytes(), data);
        }
        !receivers.is_empty()
    }
}

struct RadioState {
    initialized: bool,
    channel: u8,
    peers: HashSet<MacAddr>,
    send_callback: Option<SharedSendCallback>,
    recv_callback: Option<SharedRecvCallback>,
    ack_mode: AckMode,
    ack_delay: Option<Duration>,
    fault: Option<Fault>,
    sent: VecDeque<SentFrame>,
    sent_total: usize,
}

impl RadioState {
    fn check_fault(&self, point: Fault) -> Result<(), DriverError> {
        if self.fault == Some(point) {
            return Err(DriverError::Rejected(format!("simulated {:?} fault", point)));
        }
        Ok(())
    }
}

struct RadioInner {
    address: MacAddr,
    state: Mutex<RadioState>,
}

/// Simulated ESP-NOW driver.
///
/// Mirrors the driver rules the core depends on: everything but
/// `set_channel` requires `init`, sending requires a registered peer, and
/// the peer table holds at most [`MAX_PEERS`] entries.
pub struct SimulatedRadio {
    inner: Arc<RadioInner>,
    air: Option<Arc<SimulatedAir>>,
}

impl SimulatedRadio {
    /// A radio that is not attached to any medium.
    pub fn new(address: MacAddr) -> Self {
        Self {
            inner: Arc::new(RadioInner {
                address,
                state: Mutex::new(RadioState {
                    initialized: false,
                    channel: MIN_CHANNEL,
                    peers: HashSet::new(),
                    send_callback: None,
                    recv_callback: None,
                    ack_mode: AckMode::default(),
                    ack_delay: None,
                    fault: None,
                    sent: VecDeque::new(),
                    sent_total: 0,
                }),
            }),
            air: None,
        }
    }

    /// A radio attached to `air`.
    pub fn on_air(address: MacAddr, air: &Arc<SimulatedAir>) -> Self {
        let mut radio = Self::new(address);
        air.attach(&radio.inner);
        radio.air = Some(air.clone());
        radio
    }

    /// Station address of this radio.
    pub fn address(&self) -> MacAddr {
        self.inner.address
    }

    /// Change how sent frames are confirmed.
    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state().ack_mode = mode;
    }

    /// Delay confirmations by `delay`, or confirm inline with `None`.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.state().ack_delay = delay;
    }

    /// Make `point` fail with [`DriverError::Rejected`] until cleared with
    /// `None`.
    pub fn set_fault(&self, point: Option<Fault>) {
        self.state().fault = point;
    }

    /// The last [`SENT_LOG_CAPACITY`] frames passed to `send_frame`,
    /// oldest first.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state().sent.iter().cloned().collect()
    }

    /// Number of frames passed to `send_frame` so far.
    pub fn sent_count(&self) -> usize {
        self.state().sent_total
    }

    /// Forget the logged frames. `sent_count` is not affected.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Returns true if `address` is in the peer table.
    pub fn has_peer(&self, address: &MacAddr) -> bool {
        self.state().peers.contains(address)
    }

    /// Number of entries in the peer table.
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    /// Returns true while a receive callback is registered.
    pub fn has_recv_callback(&self) -> bool {
        self.state().recv_callback.is_some()
    }

    /// Returns true between `init` and `deinit`.
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Hand `data` to the receive callback as if it arrived from `src`.
    ///
    /// Returns false when the radio is down or no callback is registered.
    pub fn inject(&self, src: &[u8], data: &[u8]) -> bool {
        let callback = {
            let state = self.state();
            if !state.initialized {
                return false;
            }
            state.recv_callback.clone()
        };
        match callback {
            Some(callback) => {
                callback(src, data);
                true
            }
            None => false,
        }
    }

    fn state(&self) -> MutexGuard<'_, RadioState> {
        lock(&self.inner.state)
    }

    fn confirm(
        callback: Option<SharedSendCallback>,
        delay: Option<Duration>,
        peer: MacAddr,
        status: SendStatus,
    ) {
        let Some(callback) = callback else {
            debug!("No send callback registered, confirmation for {} lost", peer);
            return;
        };
        match delay {
            None => callback(peer.as_bytes(), status),
            Some(delay) => {
                let spawned = thread::Builder::new()
                    .name("sim_ack".to_string())
                    .spawn(move || {
                        thread::sleep(delay);
                        callback(peer.as_bytes(), status);
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn ack thread: {}", e);
                }
            }
        }
    }
}

impl RadioDriver for SimulatedRadio {
    fn init(&self) -> Result<(), DriverError> {
        let mut state = self.state();
        state.check_fault(Fault::Init)?;
        state.initialized = true;
        drop(state);
        debug!("Simulated radio {} up", self.inner.address);
        Ok(())
    }

    fn deinit(&self) {
        let mut state = self.state();
        state.initialized = false;
        state.peers.clear();
        state.send_callback = None;
        state.recv_callback = None;
        debug!("Simulated radio {} down", self.inner.address);
    }

    fn send_frame(&self, peer: &MacAddr, data: &[u8]) -> Result<(), DriverError> {
        let (mode, delay, callback, channel) = {
            let mut state = self.state();
            if !state.initialized {
                return Err(DriverError::NotInitialized);
            }
            if !state.peers.contains(peer) {
                return Err(DriverError::PeerNotFound);
            }
            if state.sent.len() == SENT_LOG_CAPACITY {
                state.sent.pop_front();
            }
            state.sent.push_back(SentFrame {
                to: *peer,
                data: data.to_vec(),
                at: Instant::now(),
            });
            state.sent_total += 1;
            (
                state.ack_mode,
                state.ack_delay,
                state.send_callback.clone(),
                state.channel,
            )
        };

        let status = match mode {
            AckMode::Reject => return Err(DriverError::Rejected("simulated refusal".into())),
            AckMode::Silent => return Ok(()),
            AckMode::Fail => SendStatus::Fail,
            AckMode::Deliver | AckMode::Air => {
                let reached = self
                    .air
                    .as_ref()
                    .is_some_and(|air| air.transmit(self.inner.address, *peer, channel, data));
                if mode == AckMode::Deliver || peer.is_broadcast() || reached {
                    SendStatus::Success
                } else {
                    SendStatus::Fail
                }
            }
        };

        Self::confirm(callback, delay, *peer, status);
        Ok(())
    }

    fn register_send_callback(&self, callback: SendCallback) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        state.check_fault(Fault::SendCallback)?;
        state.send_callback = Some(Arc::from(callback));
        Ok(())
    }

    fn unregister_send_callback(&self) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        state.send_callback = None;
        Ok(())
    }

    fn register_recv_callback(&self, callback: RecvCallback) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        state.check_fault(Fault::RecvCallback)?;
        state.recv_callback = Some(Arc::from(callback));
        Ok(())
    }

    fn unregister_recv_callback(&self) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        state.recv_callback = None;
        Ok(())
    }

    fn add_peer(&self, peer: &PeerInfo) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        if state.peers.contains(&peer.address) {
            return Err(DriverError::PeerExists);
        }
        if state.peers.len() >= MAX_PEERS {
            return Err(DriverError::PeerListFull);
        }
        state.peers.insert(peer.address);
        Ok(())
    }

    fn remove_peer(&self, peer: &MacAddr) -> Result<(), DriverError> {
        let mut state = self.state();
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        if state.peers.remove(peer) {
            Ok(())
        } else {
            Err(DriverError::PeerNotFound)
        }
    }

    fn set_channel(&self, channel: u8) -> Result<(), DriverError> {
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(DriverError::InvalidArgument("channel out of range"));
        }
        self.state().channel = channel;
        Ok(())
    }

    fn channel(&self) -> Result<u8, DriverError> {
        Ok(self.state().channel)
    }

    fn version(&self) -> Result<u32, DriverError> {
        if !self.state().initialized {
            return Err(DriverError::NotInitialized);
        }
        Ok(SIMULATED_VERSION)
    }

    fn own_address(&self, interface: WifiInterface) -> Result<MacAddr, DriverError> {
        let mut bytes = *self.inner.address.as_bytes();
        // The soft-AP MAC is derived from the station MAC.
        if interface == WifiInterface::SoftAp {
            bytes[5] = bytes[5].wrapping_add(1);
        }
        Ok(MacAddr::new(bytes))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Simulated radio mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    const A: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0A]);
    const B: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x0B]);

    fn status_channel(radio: &SimulatedRadio) -> mpsc::Receiver<SendStatus> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        radio
            .register_send_callback(Box::new(move |_, status| {
                let _ = lock(&tx).send(status);
            }))
            .unwrap();
        rx
    }

    #[test]
    fn test_requires_init() {
        let radio = SimulatedRadio::new(A);
        assert_eq!(
            radio.add_peer(&PeerInfo::new(B, WifiInterface::Sta)),
            Err(DriverError::NotInitialized)
        );
        assert_eq!(radio.send_frame(&B, b"x"), Err(DriverError::NotInitialized));
        assert_eq!(radio.version(), Err(DriverError::NotInitialized));
        assert!(radio.set_channel(6).is_ok());
    }

    #[test]
    fn test_peer_table() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        let peer = PeerInfo::new(B, WifiInterface::Sta);

        radio.add_peer(&peer).unwrap();
        assert_eq!(radio.add_peer(&peer), Err(DriverError::PeerExists));
        radio.remove_peer(&B).unwrap();
        assert_eq!(radio.remove_peer(&B), Err(DriverError::PeerNotFound));

        for i in 0..MAX_PEERS as u8 {
            let addr = MacAddr::new([0x06, 0, 0, 0, 1, i]);
            radio.add_peer(&PeerInfo::new(addr, WifiInterface::Sta)).unwrap();
        }
        assert_eq!(radio.add_peer(&peer), Err(DriverError::PeerListFull));
        assert_eq!(radio.peer_count(), MAX_PEERS);
    }

    #[test]
    fn test_send_without_peer_refused() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        assert_eq!(radio.send_frame(&B, b"x"), Err(DriverError::PeerNotFound));
        assert_eq!(radio.sent_count(), 0);
    }

    #[test]
    fn test_unicast_reaches_peer_on_same_channel() {
        let air = SimulatedAir::new();
        let a = SimulatedRadio::on_air(A, &air);
        let b = SimulatedRadio::on_air(B, &air);
        a.init().unwrap();
        b.init().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        b.register_recv_callback(Box::new(move |src, data| {
            lock(&sink).push((src.to_vec(), data.to_vec()));
        }))
        .unwrap();

        let statuses = status_channel(&a);
        a.add_peer(&PeerInfo::new(B, WifiInterface::Sta)).unwrap();
        a.send_frame(&B, b"ping").unwrap();

        assert_eq!(statuses.recv().unwrap(), SendStatus::Success);
        assert_eq!(
            *lock(&received),
            vec![(A.as_bytes().to_vec(), b"ping".to_vec())]
        );
        assert_eq!(air.radio_count(), 2);
    }

    #[test]
    fn test_unicast_to_other_channel_fails() {
        let air = SimulatedAir::new();
        let a = SimulatedRadio::on_air(A, &air);
        let b = SimulatedRadio::on_air(B, &air);
        a.init().unwrap();
        b.init().unwrap();
        b.set_channel(11).unwrap();

        let statuses = status_channel(&a);
        a.add_peer(&PeerInfo::new(B, WifiInterface::Sta)).unwrap();
        a.send_frame(&B, b"ping").unwrap();
        assert_eq!(statuses.recv().unwrap(), SendStatus::Fail);
    }

    #[test]
    fn test_broadcast_always_succeeds() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        let statuses = status_channel(&radio);
        radio
            .add_peer(&PeerInfo::new(MacAddr::BROADCAST, WifiInterface::Sta))
            .unwrap();
        radio.send_frame(&MacAddr::BROADCAST, b"hi").unwrap();
        assert_eq!(statuses.recv().unwrap(), SendStatus::Success);
    }

    #[test]
    fn test_ack_modes() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        let statuses = status_channel(&radio);
        radio.add_peer(&PeerInfo::new(B, WifiInterface::Sta)).unwrap();

        radio.set_ack_mode(AckMode::Deliver);
        radio.send_frame(&B, b"1").unwrap();
        assert_eq!(statuses.recv().unwrap(), SendStatus::Success);

        radio.set_ack_mode(AckMode::Fail);
        radio.send_frame(&B, b"2").unwrap();
        assert_eq!(statuses.recv().unwrap(), SendStatus::Fail);

        radio.set_ack_mode(AckMode::Silent);
        radio.send_frame(&B, b"3").unwrap();
        assert!(statuses.recv_timeout(Duration::from_millis(20)).is_err());

        radio.set_ack_mode(AckMode::Reject);
        assert!(matches!(
            radio.send_frame(&B, b"4"),
            Err(DriverError::Rejected(_))
        ));
        assert_eq!(radio.sent_count(), 4);
    }

    #[test]
    fn test_ack_delay() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        let statuses = status_channel(&radio);
        radio.add_peer(&PeerInfo::new(B, WifiInterface::Sta)).unwrap();
        radio.set_ack_mode(AckMode::Deliver);
        radio.set_ack_delay(Some(Duration::from_millis(30)));

        let start = Instant::now();
        radio.send_frame(&B, b"late").unwrap();
        assert!(statuses.try_recv().is_err());
        assert_eq!(
            statuses.recv_timeout(Duration::from_secs(1)).unwrap(),
            SendStatus::Success
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_inject_and_deinit() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        radio
            .register_recv_callback(Box::new(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(radio.inject(B.as_bytes(), b"x"));
        radio.deinit();
        assert!(!radio.inject(B.as_bytes(), b"x"));
        assert!(!radio.has_recv_callback());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fault_points() {
        let radio = SimulatedRadio::new(A);
        radio.set_fault(Some(Fault::Init));
        assert!(matches!(radio.init(), Err(DriverError::Rejected(_))));
        assert!(!radio.is_initialized());

        radio.set_fault(Some(Fault::RecvCallback));
        radio.init().unwrap();
        assert!(radio.register_send_callback(Box::new(|_, _| {})).is_ok());
        assert!(matches!(
            radio.register_recv_callback(Box::new(|_, _| {})),
            Err(DriverError::Rejected(_))
        ));
        assert!(!radio.has_recv_callback());

        radio.set_fault(None);
        assert!(radio.register_recv_callback(Box::new(|_, _| {})).is_ok());
    }

    #[test]
    fn test_sent_log_is_bounded() {
        let radio = SimulatedRadio::new(A);
        radio.init().unwrap();
        radio.set_ack_mode(AckMode::Deliver);
        radio.add_peer(&PeerInfo::new(B, WifiInterface::Sta)).unwrap();

        let total = SENT_LOG_CAPACITY + 44;
        for i in 0..total {
            radio.send_frame(&B, &(i as u32).to_le_bytes()).unwrap();
        }

        let frames = radio.sent_frames();
        assert_eq!(frames.len(), SENT_LOG_CAPACITY);
        assert_eq!(frames[0].data, 44u32.to_le_bytes().to_vec());
        assert_eq!(radio.sent_count(), total);

        radio.clear_sent();
        assert!(radio.sent_frames().is_empty());
        assert_eq!(radio.sent_count(), total);
    }

    #[test]
    fn test_own_address() {
        let radio = SimulatedRadio::new(A);
        assert_eq!(radio.own_address(WifiInterface::Sta).unwrap(), A);
        assert_eq!(
            radio.own_address(WifiInterface::SoftAp).unwrap(),
            MacAddr::new([0x02, 0, 0, 0, 0, 0x0B])
        );
    }
}
