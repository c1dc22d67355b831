//! Radio driver abstraction.
//!
//! The core never talks to hardware directly. It drives a [`RadioDriver`],
//! which on ESP32 wraps the ESP-IDF ESP-NOW component and on the host is
//! the in-memory simulator from [`crate::radio`].
//!
//! Callbacks registered through this trait may be invoked from the driver's
//! own execution context (the Wi-Fi task on ESP32) at any time, concurrently
//! with every other method. They must return quickly and must not call back
//! into the driver.

use super::address::MacAddr;
use super::config::WifiInterface;
use super::event::SendStatus;
use std::fmt;

/// Send-completion callback: `(peer address bytes, outcome)`.
///
/// The address slice is empty when the driver could not supply one.
pub type SendCallback = Box<dyn Fn(&[u8], SendStatus) + Send + Sync>;

/// Receive callback: `(source address bytes, payload)`.
pub type RecvCallback = Box<dyn Fn(&[u8], &[u8]) + Send + Sync>;

/// A driver-level peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer address.
    pub address: MacAddr,
    /// Interface the peer is reached through.
    pub interface: WifiInterface,
    /// Channel to use, 0 for the current channel.
    pub channel: u8,
}

impl PeerInfo {
    /// Peer on the current channel of `interface`. Encryption is never used.
    pub fn new(address: MacAddr, interface: WifiInterface) -> Self {
        Self {
            address,
            interface,
            channel: 0,
        }
    }
}

/// Radio driver interface consumed by the core.
pub trait RadioDriver: Send + Sync + 'static {
    /// Bring up the ESP-NOW protocol layer.
    fn init(&self) -> Result<(), DriverError>;

    /// Tear down the protocol layer. Drops all registered callbacks.
    fn deinit(&self);

    /// Queue one frame for transmission.
    ///
    /// `Ok` only means the driver accepted the frame; the outcome arrives
    /// later through the send callback.
    fn send_frame(&self, peer: &MacAddr, data: &[u8]) -> Result<(), DriverError>;

    /// Register the send-completion callback, replacing any previous one.
    fn register_send_callback(&self, callback: SendCallback) -> Result<(), DriverError>;

    /// Remove the send-completion callback.
    fn unregister_send_callback(&self) -> Result<(), DriverError>;

    /// Register the receive callback, replacing any previous one.
    fn register_recv_callback(&self, callback: RecvCallback) -> Result<(), DriverError>;

    /// Remove the receive callback.
    fn unregister_recv_callback(&self) -> Result<(), DriverError>;

    /// Add a peer to the driver's peer table.
    fn add_peer(&self, peer: &PeerInfo) -> Result<(), DriverError>;

    /// Remove a peer from the driver's peer table.
    fn remove_peer(&self, peer: &MacAddr) -> Result<(), DriverError>;

    /// Switch the radio to `channel`.
    fn set_channel(&self, channel: u8) -> Result<(), DriverError>;

    /// Current primary channel.
    fn channel(&self) -> Result<u8, DriverError>;

    /// ESP-NOW protocol version.
    fn version(&self) -> Result<u32, DriverError>;

    /// This node's address on `interface`.
    fn own_address(&self, interface: WifiInterface) -> Result<MacAddr, DriverError>;
}

/// Driver errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The protocol layer (or Wi-Fi underneath it) is not initialized.
    NotInitialized,
    /// The peer is already in the peer table.
    PeerExists,
    /// The peer is not in the peer table.
    PeerNotFound,
    /// The peer table is full.
    PeerListFull,
    /// An argument was rejected by the driver.
    InvalidArgument(&'static str),
    /// The driver refused the call for another reason.
    Rejected(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "driver not initialized"),
            Self::PeerExists => write!(f, "peer already exists"),
            Self::PeerNotFound => write!(f, "peer not found"),
            Self::PeerListFull => write!(f, "peer list full"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

impl std::error::Error for DriverError {}
