//! Driver callbacks.
//!
//! These run in the driver's execution context (the Wi-Fi task on ESP32),
//! which is shared with other radio work. They never block, allocate at
//! most one bounded copy of a frame, and swallow every failure: a dropped
//! frame is counted and logged, never reported back to the driver.

use super::address::MacAddr;
use super::config::MAX_DATA_LEN;
use super::driver::{RecvCallback, SendCallback};
use super::event::SendStatus;
use super::Shared;
use log::debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Build the send-completion hook registered with the driver.
pub(crate) fn send_hook(shared: Arc<Shared>) -> SendCallback {
    Box::new(move |peer, status| on_send(&shared, peer, status))
}

/// Build the receive hook registered with the driver.
pub(crate) fn recv_hook(shared: Arc<Shared>) -> RecvCallback {
    Box::new(move |src, data| on_recv(&shared, src, data))
}

/// Forward a send confirmation to the waiting worker.
pub(crate) fn on_send(shared: &Shared, peer: &[u8], status: SendStatus) {
    if MacAddr::from_slice(peer).is_none() {
        debug!("Send confirmation without peer address, ignored");
        return;
    }
    shared.signal.set(status);
}

/// Queue a received frame for the worker, or drop it.
pub(crate) fn on_recv(shared: &Shared, src: &[u8], data: &[u8]) {
    let Some(peer) = MacAddr::from_slice(src) else {
        drop_frame(shared, "malformed source address");
        return;
    };

    if data.is_empty() || data.len() > MAX_DATA_LEN {
        drop_frame(shared, "invalid frame length");
        return;
    }

    // Held until the frame is queued so a low-power toggle waits for us.
    let Ok(enabled) = shared.receive_enabled.try_read() else {
        drop_frame(shared, "receive gate busy");
        return;
    };
    if !*enabled {
        drop_frame(shared, "receiving disabled");
        return;
    }

    match shared.queue.push_from_callback(peer, data) {
        Ok(()) => debug!("RX queued: {} bytes from {}", data.len(), peer),
        Err(reason) => {
            shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
            debug!("RX dropped from {}: {}", peer, reason);
        }
    }
}

fn drop_frame(shared: &Shared, reason: &str) {
    shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
    debug!("RX dropped: {}", reason);
}
