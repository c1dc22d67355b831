//! Host-based ESP-NOW demo for development and testing.
//!
//! Runs two simulated nodes on a shared in-memory medium and provides:
//! - A ping/pong exchange between the nodes every few seconds
//! - HTTP stats endpoint at http://localhost:8080/stats (first node)
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-node
//! ```

use espnow_rs_esp32::radio::{SimulatedAir, SimulatedRadio};
use espnow_rs_esp32::{
    EspNow, EspNowConfig, EspNowEvent, MacAddr, StatsServer, StatsSource, DEFAULT_STATS_PORT,
};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PING_INTERVAL: Duration = Duration::from_secs(5);

type Node = EspNow<SimulatedRadio>;

/// Log every event of `node`; answer pings with a pong.
async fn run_listener(name: &'static str, node: Arc<Node>, cancel: CancellationToken) {
    let mut events = node.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(EspNowEvent::DataReceived { address, data }) => {
                info!(
                    "[{}] RX from {}: {}",
                    name,
                    address,
                    String::from_utf8_lossy(&data)
                );
                if data.starts_with(b"ping") {
                    if let Err(e) = node.send(Some(address), b"pong").await {
                        warn!("[{}] Failed to queue pong: {}", name, e);
                    }
                }
            }
            Ok(EspNowEvent::SendCompleted { address, status }) => {
                info!("[{}] TX to {}: {:?}", name, address, status);
            }
            Err(e) => warn!("[{}] Event stream: {}", name, e),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== ESP-NOW Host Node starting ===");

    let air = SimulatedAir::new();
    let alpha_addr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let beta_addr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    let alpha = Arc::new(EspNow::new(SimulatedRadio::on_air(alpha_addr, &air)));
    let beta = Arc::new(EspNow::new(SimulatedRadio::on_air(beta_addr, &air)));

    let config = EspNowConfig::default();
    for (name, node) in [("alpha", &alpha), ("beta", &beta)] {
        if let Err(e) = node.initialize(&config) {
            error!("Failed to initialize {}: {}", name, e);
            std::process::exit(1);
        }
    }

    // Keep server alive - variable intentionally unused except for Drop
    let source: Arc<dyn StatsSource> = alpha.clone();
    let _stats_server = match StatsServer::start(None, DEFAULT_STATS_PORT, source) {
        Ok(server) => {
            info!(
                "Stats server running at http://localhost:{}/stats",
                server.port()
            );
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            warn!("Continuing without stats server");
            None
        }
    };

    let cancel = CancellationToken::new();
    let listeners = [
        tokio::spawn(run_listener("alpha", alpha.clone(), cancel.clone())),
        tokio::spawn(run_listener("beta", beta.clone(), cancel.clone())),
    ];

    info!("Entering main loop (Ctrl+C to exit)...");

    let mut ticker = tokio::time::interval(PING_INTERVAL);
    let mut counter = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
            _ = ticker.tick() => {
                counter += 1;
                let ping = format!("ping #{}", counter);
                if let Err(e) = alpha.send(Some(beta_addr), ping.as_bytes()).await {
                    warn!("Failed to queue {}: {}", ping, e);
                }
                if counter % 3 == 0 {
                    if let Err(e) = beta.send(None, b"beacon").await {
                        warn!("Failed to queue beacon: {}", e);
                    }
                }
            }
        }
    }

    cancel.cancel();
    for listener in listeners {
        if let Err(e) = listener.await {
            warn!("Listener task failed: {}", e);
        }
    }

    for (name, node) in [("alpha", &alpha), ("beta", &beta)] {
        match node.stats() {
            Ok(stats) => info!("[{}] Final stats: {:?}", name, stats),
            Err(e) => warn!("[{}] No stats: {}", name, e),
        }
        node.shutdown();
    }
    info!("=== ESP-NOW Host Node stopped ===");
}
