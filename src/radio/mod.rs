//! Radio driver adapters.
//!
//! This module contains:
//! - [`SimulatedRadio`]: in-memory driver for host builds and tests
//! - [`EspRadio`]: ESP-IDF ESP-NOW driver (ESP32 only)

mod sim;

#[cfg(feature = "esp32")]
mod esp;

pub use sim::{
    AckMode, Fault, SentFrame, SimulatedAir, SimulatedRadio, MAX_PEERS, SENT_LOG_CAPACITY,
    SIMULATED_VERSION,
};

#[cfg(feature = "esp32")]
pub use esp::EspRadio;
