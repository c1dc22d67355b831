//! ESP-NOW configuration.
//!
//! Frame limits and timing constants are fixed by the ESP-NOW protocol and
//! the single-worker design; everything else is set per [`EspNowConfig`].
//!
//! # Example
//!
//! ```
//! use espnow_rs_esp32::{EspNowConfig, WifiInterface};
//!
//! let config = EspNowConfig::default()
//!     .with_channel(6)
//!     .with_attempts(5)
//!     .with_interface(WifiInterface::SoftAp);
//! assert!(config.validate().is_ok());
//! ```

use super::error::EspNowError;
use std::time::Duration;

/// Maximum payload of one ESP-NOW frame in bytes.
pub const MAX_DATA_LEN: usize = 250;

/// Lowest valid 2.4 GHz Wi-Fi channel.
pub const MIN_CHANNEL: u8 = 1;

/// Highest valid 2.4 GHz Wi-Fi channel.
pub const MAX_CHANNEL: u8 = 14;

/// Default wait for the driver's send confirmation, per attempt.
///
/// Must exceed the link-layer ACK latency while keeping
/// `attempts * CONFIRM_TIMEOUT` short, since the single worker is occupied
/// for that long by an unreachable peer.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest the async `send` waits for queue space before giving up.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Smallest worker stack that fits the send path plus logging.
pub const MIN_STACK_SIZE: usize = 2048;

/// Largest transfer queue accepted by [`EspNowConfig::validate`].
pub const MAX_QUEUE_SIZE: usize = 255;

/// Wi-Fi interface the peer records are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiInterface {
    /// Station interface.
    #[default]
    Sta,
    /// Soft access point interface.
    SoftAp,
}

/// Configuration for [`EspNow::initialize`](super::EspNow::initialize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspNowConfig {
    /// Worker task priority (applied on ESP32 only).
    pub task_priority: u8,
    /// Worker stack size in bytes.
    pub stack_size: usize,
    /// Transfer queue capacity in entries.
    pub queue_size: usize,
    /// Interface the peers are registered on.
    pub wifi_interface: WifiInterface,
    /// Radio channel, 1..=14.
    pub channel: u8,
    /// Send attempts per outbound message, at least 1.
    pub attempts: u8,
    /// When set, inbound frames are not observed at all.
    pub low_power: bool,
    /// Per-attempt confirmation wait.
    pub confirm_timeout: Duration,
}

impl Default for EspNowConfig {
    fn default() -> Self {
        Self {
            task_priority: 4,
            stack_size: 4096,
            queue_size: 32,
            wifi_interface: WifiInterface::Sta,
            channel: 1,
            attempts: 3,
            low_power: false,
            confirm_timeout: CONFIRM_TIMEOUT,
        }
    }
}

impl EspNowConfig {
    /// Set the radio channel.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Set the number of send attempts.
    pub fn with_attempts(mut self, attempts: u8) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the transfer queue capacity.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the peer interface.
    pub fn with_interface(mut self, wifi_interface: WifiInterface) -> Self {
        self.wifi_interface = wifi_interface;
        self
    }

    /// Start with receiving disabled.
    pub fn with_low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    /// Set the per-attempt confirmation wait.
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), EspNowError> {
        validate_channel(self.channel)?;
        validate_attempts(self.attempts)?;
        if self.queue_size == 0 {
            return Err(EspNowError::InvalidArgument("queue_size must be > 0"));
        }
        if self.queue_size > MAX_QUEUE_SIZE {
            return Err(EspNowError::InvalidArgument("queue_size must be <= 255"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(EspNowError::InvalidArgument("stack_size must be >= 2048"));
        }
        if self.confirm_timeout.is_zero() || self.confirm_timeout > Duration::from_secs(1) {
            return Err(EspNowError::InvalidArgument(
                "confirm_timeout must be within 1ms..=1s",
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_channel(channel: u8) -> Result<(), EspNowError> {
    if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        return Err(EspNowError::InvalidArgument("channel must be within 1..=14"));
    }
    Ok(())
}

pub(crate) fn validate_attempts(attempts: u8) -> Result<(), EspNowError> {
    if attempts == 0 {
        return Err(EspNowError::InvalidArgument("attempts must be >= 1"));
    }
    Ok(())
}

pub(crate) fn validate_payload(data: &[u8]) -> Result<(), EspNowError> {
    if data.is_empty() {
        return Err(EspNowError::InvalidArgument("payload is empty"));
    }
    if data.len() > MAX_DATA_LEN {
        return Err(EspNowError::InvalidArgument("payload exceeds 250 bytes"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EspNowConfig::default();
        assert_eq!(config.task_priority, 4);
        assert_eq!(config.queue_size, 32);
        assert_eq!(config.wifi_interface, WifiInterface::Sta);
        assert_eq!(config.channel, 1);
        assert_eq!(config.attempts, 3);
        assert!(!config.low_power);
        assert_eq!(config.confirm_timeout, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_channel_bounds() {
        assert!(EspNowConfig::default().with_channel(1).validate().is_ok());
        assert!(EspNowConfig::default().with_channel(14).validate().is_ok());
        assert!(matches!(
            EspNowConfig::default().with_channel(0).validate(),
            Err(EspNowError::InvalidArgument(_))
        ));
        assert!(matches!(
            EspNowConfig::default().with_channel(15).validate(),
            Err(EspNowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(
            EspNowConfig::default().with_attempts(0).validate(),
            Err(EspNowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_queue_size_bounds() {
        assert!(EspNowConfig::default().with_queue_size(0).validate().is_err());
        assert!(EspNowConfig::default().with_queue_size(1).validate().is_ok());
        assert!(EspNowConfig::default().with_queue_size(255).validate().is_ok());
        assert!(EspNowConfig::default().with_queue_size(256).validate().is_err());
    }

    #[test]
    fn test_small_stack_rejected() {
        let config = EspNowConfig {
            stack_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confirm_timeout_bounds() {
        let zero = EspNowConfig::default().with_confirm_timeout(Duration::ZERO);
        assert!(zero.validate().is_err());
        let long = EspNowConfig::default().with_confirm_timeout(Duration::from_secs(2));
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_payload_validation() {
        assert!(validate_payload(&[]).is_err());
        assert!(validate_payload(&[0u8; 1]).is_ok());
        assert!(validate_payload(&[0u8; MAX_DATA_LEN]).is_ok());
        assert!(validate_payload(&[0u8; MAX_DATA_LEN + 1]).is_err());
    }
}
