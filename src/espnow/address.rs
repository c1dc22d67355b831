//! Link-layer peer addresses.
//!
//! ESP-NOW addresses peers by their 6-byte Wi-Fi MAC address. The type is a
//! plain byte array with no padding, so `as_bytes()` is exactly what goes on
//! the wire and into the driver's peer table.
//!
//! # Example
//!
//! ```
//! use espnow_rs_esp32::MacAddr;
//!
//! let addr: MacAddr = "24:6f:28:aa:bb:cc".parse().unwrap();
//! assert_eq!(addr.to_string(), "24:6f:28:aa:bb:cc");
//! assert!(!addr.is_broadcast());
//! assert!(MacAddr::BROADCAST.is_broadcast());
//! ```

use std::fmt;
use std::str::FromStr;

/// Length of a link-layer address in bytes.
pub const MAC_LEN: usize = 6;

/// A 6-byte link-layer (MAC) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr([u8; MAC_LEN]);

impl MacAddr {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddr = MacAddr([0xFF; MAC_LEN]);

    /// Create an address from raw bytes.
    pub const fn new(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an address from a slice, as delivered by driver callbacks.
    ///
    /// Returns `None` unless the slice is exactly [`MAC_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; MAC_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; MAC_LEN] {
        &self.0
    }

    /// Returns true for FF:FF:FF:FF:FF:FF.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl From<[u8; MAC_LEN]> for MacAddr {
    fn from(bytes: [u8; MAC_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<MacAddr> for [u8; MAC_LEN] {
    fn from(addr: MacAddr) -> Self {
        addr.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error parsing a textual MAC address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacError(String);

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address: {}", self.0)
    }
}

impl std::error::Error for ParseMacError {}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Parse `aa:bb:cc:dd:ee:ff` (colon or dash separated, any case).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; MAC_LEN];
        let mut parts = s.split(|c| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }

        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_is_all_ones() {
        assert_eq!(MacAddr::BROADCAST.as_bytes(), &[0xFF; 6]);
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(!MacAddr::new([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]).is_broadcast());
    }

    #[test]
    fn test_from_slice_requires_exact_length() {
        assert_eq!(
            MacAddr::from_slice(&[1, 2, 3, 4, 5, 6]),
            Some(MacAddr::new([1, 2, 3, 4, 5, 6]))
        );
        assert_eq!(MacAddr::from_slice(&[]), None);
        assert_eq!(MacAddr::from_slice(&[1, 2, 3, 4, 5]), None);
        assert_eq!(MacAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7]), None);
    }

    #[test]
    fn test_display_lowercase_colon_separated() {
        let addr = MacAddr::new([0x24, 0x6F, 0x28, 0x0A, 0xBB, 0x01]);
        assert_eq!(addr.to_string(), "24:6f:28:0a:bb:01");
    }

    #[test]
    fn test_parse_accepts_dashes_and_uppercase() {
        let addr: MacAddr = "24-6F-28-0A-BB-01".parse().unwrap();
        assert_eq!(addr, MacAddr::new([0x24, 0x6F, 0x28, 0x0A, 0xBB, 0x01]));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<MacAddr>().is_err());
        assert!("24:6f:28:0a:bb".parse::<MacAddr>().is_err());
        assert!("24:6f:28:0a:bb:01:02".parse::<MacAddr>().is_err());
        assert!("24:6f:28:0a:bb:zz".parse::<MacAddr>().is_err());
        assert!("246:f2:80:ab:b0:1".parse::<MacAddr>().is_err());
    }
}
