//! ESP-NOW ESP32 firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    println!("=== ESP-NOW ESP32 starting ===");

    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use espnow_rs_esp32::radio::EspRadio;
    use espnow_rs_esp32::{EspNow, EspNowConfig, EspNowEvent};
    use log::{error, info, warn};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    // ESP-NOW rides on the Wi-Fi driver, which only has to be started.
    let wifi = Peripherals::take()
        .and_then(|peripherals| {
            let sysloop = EspSystemEventLoop::take()?;
            let nvs = EspDefaultNvsPartition::take()?;
            let esp_wifi = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?;
            let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
            wifi.start()?;
            Ok(wifi)
        });
    // Keep Wi-Fi alive for the lifetime of the firmware
    let _wifi = match wifi {
        Ok(wifi) => wifi,
        Err(e) => {
            error!("Wi-Fi start failed: {:?}", e);
            return;
        }
    };

    let espnow = EspNow::new(EspRadio::new());
    if let Err(e) = espnow.initialize(&EspNowConfig::default()) {
        error!("ESP-NOW initialization failed: {}", e);
        return;
    }
    match espnow.own_address() {
        Ok(addr) => info!("ESP-NOW up as {}", addr),
        Err(e) => warn!("Own address unavailable: {}", e),
    }

    let mut events = espnow.subscribe();

    println!("Entering main loop...");
    let mut counter = 0u32;
    loop {
        std::thread::sleep(Duration::from_secs(2));
        counter += 1;

        let beacon = format!("heartbeat #{}", counter);
        if let Err(e) = espnow.try_send(None, beacon.as_bytes()) {
            warn!("Failed to queue heartbeat: {}", e);
        }

        loop {
            match events.try_recv() {
                Ok(EspNowEvent::DataReceived { address, data }) => {
                    info!("RX {} bytes from {}", data.len(), address);
                }
                Ok(EspNowEvent::SendCompleted { address, status }) => {
                    info!("TX to {}: {:?}", address, status);
                }
                Err(TryRecvError::Lagged(n)) => warn!("Missed {} events", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if let Ok(stats) = espnow.stats() {
            info!(
                "Heartbeat #{}: {} delivered, {} failed, {} received",
                counter, stats.sent_success, stats.sent_fail, stats.received
            );
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-node' for the host simulation.");
}
