//! Events published to subscribers.

use super::address::MacAddr;

/// Outcome of a send, as reported by the driver or by the retry protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The frame reached the peer's link layer.
    Success,
    /// The frame was not acknowledged.
    Fail,
}

impl SendStatus {
    /// Returns true for [`SendStatus::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Event published by the processing worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EspNowEvent {
    /// One accepted `send` finished its attempt sequence.
    SendCompleted {
        /// Destination of the send.
        address: MacAddr,
        /// Final status after all attempts.
        status: SendStatus,
    },
    /// A frame arrived from a peer.
    DataReceived {
        /// Source address.
        address: MacAddr,
        /// Frame payload.
        data: Vec<u8>,
    },
}

impl EspNowEvent {
    /// Peer address the event refers to.
    pub fn address(&self) -> MacAddr {
        match self {
            Self::SendCompleted { address, .. } | Self::DataReceived { address, .. } => *address,
        }
    }
}
