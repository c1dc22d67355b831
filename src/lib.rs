//! ESP-NOW messaging for ESP32.
//!
//! Confirmed, retried datagram messaging on top of the ESP-NOW radio driver.
//! Everything except the [`radio::EspRadio`] adapter is platform-independent
//! and tested on the host against [`radio::SimulatedRadio`].

pub mod espnow;
pub mod radio;
pub mod stats_server;

// Re-export commonly used items
pub use espnow::{
    DriverError, EspNow, EspNowConfig, EspNowError, EspNowEvent, MacAddr, PeerInfo, RadioDriver,
    SendStatus, StatsSnapshot, WifiInterface, MAX_DATA_LEN,
};
pub use stats_server::{StatsServer, StatsSource, DEFAULT_STATS_PORT};
