//! HTTP stats server for node monitoring.
//!
//! Provides a simple `/stats` endpoint that returns ESP-NOW statistics as
//! JSON. Uses `tiny_http` which works on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "initialized": true,
//!   "stats": { "sent_success": 150, "sent_fail": 3, "received": 230 },
//!   "queue": { "depth": 2, "capacity": 32, "dropped_frames": 0 },
//!   "config": { "attempts": 3, "channel": 1, "low_power": false }
//! }
//! ```

use crate::espnow::{EspNow, RadioDriver, StatsSnapshot};
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Poll interval of the server loop; bounds how long `stop` takes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that can render itself as the `/stats` document.
pub trait StatsSource: Send + Sync {
    /// Serialize current statistics to JSON.
    fn to_json(&self) -> String;
}

fn counters_json(stats: &StatsSnapshot) -> String {
    format!(
        r#"{{"sent_success":{},"sent_fail":{},"received":{}}}"#,
        stats.sent_success, stats.sent_fail, stats.received
    )
}

impl<D: RadioDriver> StatsSource for EspNow<D> {
    fn to_json(&self) -> String {
        // Accessors fail only when not initialized; report zeros then.
        let stats = self.stats().unwrap_or_default();
        format!(
            r#"{{"uptime_secs":{},"initialized":{},"stats":{},"queue":{{"depth":{},"capacity":{},"dropped_frames":{}}},"config":{{"attempts":{},"channel":{},"low_power":{}}}}}"#,
            self.uptime_secs(),
            self.is_initialized(),
            counters_json(&stats),
            self.queue_depth().unwrap_or(0),
            self.queue_capacity().unwrap_or(0),
            self.dropped_frames().unwrap_or(0),
            self.attempts().unwrap_or(0),
            self.channel().unwrap_or(0),
            self.low_power().unwrap_or(false)
        )
    }
}

/// HTTP stats server.
///
/// Runs in a background thread and serves statistics as JSON.
pub struct StatsServer {
    /// Server thread handle.
    handle: Option<thread::JoinHandle<()>>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
    port: u16,
}

impl StatsServer {
    /// Start the stats server.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - IP address to bind to (use `None` for 0.0.0.0)
    /// * `port` - Port to listen on, 0 for any free port
    /// * `source` - Statistics to serve
    ///
    /// # Returns
    ///
    /// A handle to the running server. Drop it to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        source: Arc<dyn StatsSource>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .unwrap_or(port);

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("stats_server".to_string())
            .spawn(move || Self::run_server(server, source, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            port,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn run_server(server: Server, source: Arc<dyn StatsSource>, shutdown: Arc<AtomicBool>) {
        let (Ok(content_type), Ok(location), Ok(allow_get)) = (
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]),
            Header::from_bytes(&b"Location"[..], &b"/stats"[..]),
            Header::from_bytes(&b"Allow"[..], &b"GET"[..]),
        ) else {
            error!("Stats server failed to build response headers");
            return;
        };

        loop {
            // Acquire pairs with the Release store in stop()
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let response = Response::from_string("Method Not Allowed")
                            .with_status_code(405)
                            .with_header(allow_get.clone());
                        if let Err(e) = request.respond(response) {
                            warn!("Failed to send 405: {}", e);
                        }
                        continue;
                    }

                    let result = match request.url() {
                        "/stats" | "/stats/" => {
                            let response = Response::from_string(source.to_json())
                                .with_header(content_type.clone())
                                .with_status_code(200);
                            request.respond(response)
                        }
                        "/" => {
                            let response = Response::from_string("See /stats for node statistics")
                                .with_status_code(302)
                                .with_header(location.clone());
                            request.respond(response)
                        }
                        _ => {
                            let response = Response::from_string("Not Found").with_status_code(404);
                            request.respond(response)
                        }
                    };
                    if let Err(e) = result {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server.
    ///
    /// May take up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Stats server thread panicked");
            }
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
