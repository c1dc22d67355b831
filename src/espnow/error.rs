//! Errors returned by the public ESP-NOW API.

use super::driver::DriverError;
use std::fmt;

/// ESP-NOW API errors.
///
/// Re-initializing an already initialized handle is not an error; it is a
/// no-op that returns `Ok(())`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EspNowError {
    /// Empty or oversized payload, out-of-range channel, invalid config.
    InvalidArgument(&'static str),
    /// The operation requires a successful `initialize` first.
    NotInitialized,
    /// Queue full or a resource (thread, buffer) could not be created.
    ResourceExhausted(&'static str),
    /// Queue occupancy is above the low-water mark. Soft reject, retry later.
    Backpressure,
    /// The underlying radio driver rejected a call.
    Driver(DriverError),
}

impl fmt::Display for EspNowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::NotInitialized => write!(f, "ESP-NOW not initialized"),
            Self::ResourceExhausted(what) => write!(f, "resource exhausted: {}", what),
            Self::Backpressure => write!(f, "transfer queue nearly full"),
            Self::Driver(e) => write!(f, "driver error: {}", e),
        }
    }
}

impl std::error::Error for EspNowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for EspNowError {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            EspNowError::InvalidArgument("channel out of range").to_string(),
            "invalid argument: channel out of range"
        );
        assert_eq!(
            EspNowError::NotInitialized.to_string(),
            "ESP-NOW not initialized"
        );
        assert_eq!(
            EspNowError::Backpressure.to_string(),
            "transfer queue nearly full"
        );
    }

    #[test]
    fn test_driver_error_is_source() {
        let err: EspNowError = DriverError::PeerListFull.into();
        assert!(matches!(err, EspNowError::Driver(DriverError::PeerListFull)));
        assert!(err.source().is_some());
        assert!(EspNowError::Backpressure.source().is_none());
    }
}
