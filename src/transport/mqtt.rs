//! MQTT publishing with a persistent reconnect task.
//!
//! `MqttPublisher::connect` returns immediately. A background thread drives the
//! rumqttc event loop; when the broker is unreachable it logs and backs off
//! (doubling, capped) and the next poll reconnects. Publishes issued while
//! disconnected wait in the client's request queue until it holds
//! `REQUEST_CAPACITY` messages; past that `publish` fails at once instead of
//! blocking the caller.

use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, ClientError, Connection, Event, Incoming, MqttOptions, Outgoing, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::tls::{MqttEndpoint, TlsMaterials};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Publishes held by the client while the broker is away.
const REQUEST_CAPACITY: usize = 64;
const STOP_POLL: Duration = Duration::from_millis(50);
/// Evidence images travel base64-encoded; leave room for full-frame PNGs.
const MAX_PACKET_BYTES: usize = 8 * 1024 * 1024;

/// Minimal publish seam so channels can be exercised without a broker.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Release the connection, waiting at most `grace`.
    fn disconnect(&self, _grace: Duration) {}
}

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub max_backoff: Duration,
}

pub struct MqttPublisher {
    client: Client,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let mut options = MqttOptions::new(
            &settings.client_id,
            &settings.endpoint.host,
            settings.endpoint.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(
            settings
                .tls
                .build_transport(&settings.endpoint)
                .context("configure MQTT transport")?,
        );

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = stop.clone();
            let connected = connected.clone();
            let max_backoff = settings.max_backoff.max(INITIAL_BACKOFF);
            std::thread::Builder::new()
                .name("mqtt-connection".into())
                .spawn(move || drive_connection(connection, stop, connected, max_backoff))
                .context("spawn MQTT connection thread")?
        };

        log::info!(
            "MQTT client started for {}:{} (TLS: {}, auth: {})",
            settings.endpoint.host,
            settings.endpoint.port,
            settings.endpoint.use_tls,
            settings.username.is_some()
        );

        Ok(Self {
            client,
            stop,
            connected,
            connection_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        match self.client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => {
                if !self.is_connected() {
                    log::info!("MQTT broker offline; publish to {} queued", topic);
                }
                Ok(())
            }
            Err(ClientError::TryRequest(_)) => Err(anyhow!(
                "MQTT request queue full ({} waiting); publish to {} dropped",
                REQUEST_CAPACITY,
                topic
            )),
            Err(e) => Err(e).with_context(|| format!("MQTT publish to {} failed", topic)),
        }
    }

    /// Queues a DISCONNECT behind the accepted publishes and lets the event
    /// loop flush them for at most `grace`. After that the reconnect task is
    /// stopped and whatever is still queued is abandoned.
    fn disconnect(&self, grace: Duration) {
        let handle = match self.connection_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                log::warn!("MQTT connection handle lock poisoned");
                None
            }
        };
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = self.client.try_disconnect() {
            log::warn!("MQTT disconnect not queued ({}); flushing until the deadline", e);
        }

        let deadline = Instant::now() + grace;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL);
        }
        if handle.is_finished() {
            let _ = handle.join();
            log::info!("MQTT connection closed");
        } else {
            self.stop.store(true, Ordering::SeqCst);
            log::warn!(
                "MQTT publishes not flushed within {:?}; abandoning queued alerts",
                grace
            );
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn drive_connection(
    mut connection: Connection,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    max_backoff: Duration,
) {
    let mut backoff = INITIAL_BACKOFF;
    for notification in connection.iter() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                connected.store(true, Ordering::SeqCst);
                backoff = INITIAL_BACKOFF;
                log::info!("MQTT connected ({:?})", ack.code);
            }
            // Everything queued before the DISCONNECT has been written.
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                log::warn!("MQTT connection error: {}. Reconnecting in {:?}", e, backoff);
                sleep_unless_stopped(backoff, &stop);
                backoff = next_backoff(backoff, max_backoff);
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    log::debug!("MQTT event loop exited");
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STOP_POLL.min(deadline - now));
    }
}
