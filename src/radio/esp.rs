//! ESP-IDF ESP-NOW driver adapter.
//!
//! Wraps `esp_idf_svc::espnow::EspNow`. Wi-Fi must be started (station or
//! soft-AP) before [`RadioDriver::init`] is called; this adapter never
//! touches the Wi-Fi driver beyond channel and MAC queries.

use crate::espnow::{
    DriverError, MacAddr, PeerInfo, RadioDriver, RecvCallback, SendCallback, SendStatus,
    WifiInterface,
};
use esp_idf_svc::espnow::{
    EspNow as IdfEspNow, PeerInfo as IdfPeerInfo, ReceiveInfo, SendStatus as IdfSendStatus,
};
use esp_idf_sys::{self as sys, esp, EspError};
use log::{info, warn};
use std::sync::{Mutex, MutexGuard};

/// ESP-NOW on the ESP32 Wi-Fi radio.
#[derive(Default)]
pub struct EspRadio {
    espnow: Mutex<Option<IdfEspNow<'static>>>,
}

impl EspRadio {
    /// Create the adapter. The protocol layer stays down until `init`.
    pub fn new() -> Self {
        Self::default()
    }

    fn espnow(&self) -> MutexGuard<'_, Option<IdfEspNow<'static>>> {
        match self.espnow.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("ESP-NOW driver mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn with_espnow<T>(
        &self,
        f: impl FnOnce(&IdfEspNow<'static>) -> Result<T, EspError>,
    ) -> Result<T, DriverError> {
        let guard = self.espnow();
        let espnow = guard.as_ref().ok_or(DriverError::NotInitialized)?;
        f(espnow).map_err(map_error)
    }
}

impl RadioDriver for EspRadio {
    fn init(&self) -> Result<(), DriverError> {
        let mut guard = self.espnow();
        if guard.is_none() {
            *guard = Some(IdfEspNow::take().map_err(map_error)?);
            info!("ESP-NOW driver initialized");
        }
        Ok(())
    }

    fn deinit(&self) {
        // Dropping the handle deinitializes the protocol layer.
        if self.espnow().take().is_some() {
            info!("ESP-NOW driver deinitialized");
        }
    }

    fn send_frame(&self, peer: &MacAddr, data: &[u8]) -> Result<(), DriverError> {
        self.with_espnow(|espnow| espnow.send(*peer.as_bytes(), data))
    }

    fn register_send_callback(&self, callback: SendCallback) -> Result<(), DriverError> {
        self.with_espnow(|espnow| {
            espnow.register_send_cb(move |peer: &[u8], status: IdfSendStatus| {
                let status = match status {
                    IdfSendStatus::SUCCESS => SendStatus::Success,
                    _ => SendStatus::Fail,
                };
                callback(peer, status);
            })
        })
    }

    fn unregister_send_callback(&self) -> Result<(), DriverError> {
        self.with_espnow(|espnow| espnow.unregister_send_cb())
    }

    fn register_recv_callback(&self, callback: RecvCallback) -> Result<(), DriverError> {
        self.with_espnow(|espnow| {
            espnow.register_recv_cb(move |info: &ReceiveInfo, data: &[u8]| {
                callback(&info.src_addr[..], data);
            })
        })
    }

    fn unregister_recv_callback(&self) -> Result<(), DriverError> {
        self.with_espnow(|espnow| espnow.unregister_recv_cb())
    }

    fn add_peer(&self, peer: &PeerInfo) -> Result<(), DriverError> {
        let info = IdfPeerInfo {
            peer_addr: *peer.address.as_bytes(),
            channel: peer.channel,
            ifidx: interface_index(peer.interface),
            encrypt: false,
            ..Default::default()
        };
        self.with_espnow(|espnow| espnow.add_peer(info))
    }

    fn remove_peer(&self, peer: &MacAddr) -> Result<(), DriverError> {
        self.with_espnow(|espnow| espnow.del_peer(*peer.as_bytes()))
    }

    fn set_channel(&self, channel: u8) -> Result<(), DriverError> {
        // SAFETY: plain FFI call; Wi-Fi must be started, reported as an error otherwise.
        esp!(unsafe {
            sys::esp_wifi_set_channel(channel, sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE)
        })
        .map_err(map_error)
    }

    fn channel(&self) -> Result<u8, DriverError> {
        let mut primary = 0u8;
        let mut second = sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE;
        // SAFETY: both out-pointers are valid for the duration of the call.
        esp!(unsafe { sys::esp_wifi_get_channel(&mut primary, &mut second) }).map_err(map_error)?;
        Ok(primary)
    }

    fn version(&self) -> Result<u32, DriverError> {
        self.with_espnow(|espnow| espnow.get_version())
    }

    fn own_address(&self, interface: WifiInterface) -> Result<MacAddr, DriverError> {
        let mut mac = [0u8; 6];
        // SAFETY: `mac` is a valid 6-byte buffer.
        esp!(unsafe { sys::esp_wifi_get_mac(interface_index(interface), mac.as_mut_ptr()) })
            .map_err(map_error)?;
        Ok(MacAddr::new(mac))
    }
}

fn interface_index(interface: WifiInterface) -> sys::wifi_interface_t {
    match interface {
        WifiInterface::Sta => sys::wifi_interface_t_WIFI_IF_STA,
        WifiInterface::SoftAp => sys::wifi_interface_t_WIFI_IF_AP,
    }
}

fn map_error(e: EspError) -> DriverError {
    match e.code() as u32 {
        sys::ESP_ERR_ESPNOW_NOT_INIT
        | sys::ESP_ERR_WIFI_NOT_INIT
        | sys::ESP_ERR_WIFI_NOT_STARTED => DriverError::NotInitialized,
        sys::ESP_ERR_ESPNOW_EXIST => DriverError::PeerExists,
        sys::ESP_ERR_ESPNOW_NOT_FOUND => DriverError::PeerNotFound,
        sys::ESP_ERR_ESPNOW_FULL => DriverError::PeerListFull,
        sys::ESP_ERR_ESPNOW_ARG | sys::ESP_ERR_INVALID_ARG => {
            DriverError::InvalidArgument("rejected by ESP-IDF")
        }
        _ => DriverError::Rejected(format!("{:?}", e)),
    }
}
