//! Notification dispatch.
//!
//! The detection loop hands a confirmed `AlertEvent` to the dispatcher and
//! moves on. Every channel has its own bounded queue and workers, so a slow,
//! hung or saturated channel only backs up its own queue: the other channel
//! keeps delivering this event and every later one. An event is rejected and
//! handed back to the caller only when no channel had room for it; a channel
//! whose queue is full skips the event and records a failed delivery.
//!
//! Delivery is at most once per event and channel: there is no retry, and a
//! failure is recorded in the statistics and the log, never surfaced to the
//! caller.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::alert::{
    AlertEvent, ChannelKind, DeliveryChannelResult, DeliveryOutcome, ImageMessage, StatusMessage,
};
use crate::transport::{Contact, EmailRequest, MailSender, Publisher};

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_WORKERS: usize = 2;

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("alert queue is full; event dropped")]
    QueueFull(AlertEvent),
    #[error("dispatcher is shut down")]
    ShutDown(AlertEvent),
}

impl DispatchError {
    /// The event that was not accepted.
    pub fn into_event(self) -> AlertEvent {
        match self {
            Self::QueueFull(event) | Self::ShutDown(event) => event,
        }
    }
}

/// Receiver of confirmed detections. Must return promptly.
pub trait AlertSink {
    fn on_confirmed(&self, event: AlertEvent) -> Result<(), DispatchError>;
}

impl<T: AlertSink + ?Sized> AlertSink for &T {
    fn on_confirmed(&self, event: AlertEvent) -> Result<(), DispatchError> {
        (**self).on_confirmed(event)
    }
}

impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
    fn on_confirmed(&self, event: AlertEvent) -> Result<(), DispatchError> {
        (**self).on_confirmed(event)
    }
}

/// One delivery transport for alerts.
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn deliver(&self, event: &AlertEvent) -> Result<()>;

    /// Release underlying connections, waiting at most `grace`.
    fn shutdown(&self, _grace: Duration) {}
}

/// Status (and, with evidence, image) messages on a pub/sub broker.
pub struct PubSubChannel {
    publisher: Arc<dyn Publisher>,
    status_topic: String,
    image_topic: String,
    location: String,
}

impl PubSubChannel {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        status_topic: impl Into<String>,
        image_topic: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            status_topic: status_topic.into(),
            image_topic: image_topic.into(),
            location: location.into(),
        }
    }
}

impl AlertChannel for PubSubChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PubSub
    }

    fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let status = serde_json::to_vec(&StatusMessage::from_event(event, &self.location))
            .context("serialize status message")?;
        let status_result = self.publisher.publish(&self.status_topic, status);

        // The image goes out even if the status publish failed.
        let image_result = match ImageMessage::from_event(event) {
            Some(image) => {
                let payload = serde_json::to_vec(&image).context("serialize image message")?;
                self.publisher
                    .publish(&self.image_topic, payload)
                    .map(|()| log::debug!("image {} published", image.image_name))
            }
            None => Ok(()),
        };

        status_result?;
        image_result
    }

    fn shutdown(&self, grace: Duration) {
        self.publisher.disconnect(grace);
    }
}

/// HTML mail with the evidence image attached when there is one.
pub struct EmailChannel {
    mailer: Arc<dyn MailSender>,
    sender: Contact,
    recipient: Contact,
    location: String,
}

impl EmailChannel {
    pub fn new(
        mailer: Arc<dyn MailSender>,
        sender: Contact,
        recipient: Contact,
        location: impl Into<String>,
    ) -> Self {
        Self {
            mailer,
            sender,
            recipient,
            location: location.into(),
        }
    }
}

impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn deliver(&self, event: &AlertEvent) -> Result<()> {
        let request = EmailRequest::for_alert(event, &self.sender, &self.recipient, &self.location);
        let reply = self.mailer.send(&request)?;
        if !reply.is_accepted() {
            return Err(anyhow!(
                "email API returned status {}: {}",
                reply.status,
                reply.body
            ));
        }
        Ok(())
    }
}

/// Queue size and worker count, both per channel.
#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Point-in-time delivery counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub pubsub_sent: u64,
    pub pubsub_failed: u64,
    pub email_sent: u64,
    pub email_failed: u64,
}

impl DispatchStats {
    pub fn sent(&self, channel: ChannelKind) -> u64 {
        match channel {
            ChannelKind::PubSub => self.pubsub_sent,
            ChannelKind::Email => self.email_sent,
        }
    }

    pub fn failed(&self, channel: ChannelKind) -> u64 {
        match channel {
            ChannelKind::PubSub => self.pubsub_failed,
            ChannelKind::Email => self.email_failed,
        }
    }
}

#[derive(Default)]
struct StatsCounters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    pubsub_sent: AtomicU64,
    pubsub_failed: AtomicU64,
    email_sent: AtomicU64,
    email_failed: AtomicU64,
}

impl StatsCounters {
    fn record(&self, result: &DeliveryChannelResult) {
        let counter = match (result.channel, result.is_sent()) {
            (ChannelKind::PubSub, true) => &self.pubsub_sent,
            (ChannelKind::PubSub, false) => &self.pubsub_failed,
            (ChannelKind::Email, true) => &self.email_sent,
            (ChannelKind::Email, false) => &self.email_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            pubsub_sent: self.pubsub_sent.load(Ordering::Relaxed),
            pubsub_failed: self.pubsub_failed.load(Ordering::Relaxed),
            email_sent: self.email_sent.load(Ordering::Relaxed),
            email_failed: self.email_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every worker finished within the grace period.
    pub drained: bool,
    pub abandoned_workers: usize,
    /// Largest per-channel backlog when the grace period ran out.
    pub pending_events: usize,
}

/// A channel with its queue. Workers hold clones of `queue`.
struct Lane {
    channel: Arc<dyn AlertChannel>,
    queue: Receiver<Arc<AlertEvent>>,
}

pub struct NotificationDispatcher {
    /// One sender per lane, in lane order. `None` once shut down.
    intake: Mutex<Option<Vec<Sender<Arc<AlertEvent>>>>>,
    lanes: Vec<Lane>,
    workers: Mutex<Vec<(ChannelKind, JoinHandle<()>)>>,
    stats: Arc<StatsCounters>,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>, config: DispatchConfig) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be > 0"));
        }
        if config.workers == 0 {
            return Err(anyhow!("dispatch worker count must be > 0"));
        }
        if channels.is_empty() {
            log::warn!("notification dispatcher has no channels; alerts will only be logged");
        }

        let stats = Arc::new(StatsCounters::default());
        let mut senders = Vec::with_capacity(channels.len());
        let mut lanes = Vec::with_capacity(channels.len());
        let mut workers = Vec::with_capacity(channels.len() * config.workers);
        for channel in channels {
            let kind = channel.kind();
            let (tx, rx) = bounded(config.queue_capacity);
            for id in 0..config.workers {
                let rx = rx.clone();
                let channel = channel.clone();
                let stats = stats.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("alert-{}-{}", kind, id))
                    .spawn(move || lane_worker(rx, &*channel, &stats))
                    .with_context(|| format!("spawn {} alert worker {}", kind, id))?;
                workers.push((kind, handle));
            }
            senders.push(tx);
            lanes.push(Lane { channel, queue: rx });
        }

        log::info!(
            "notification dispatcher started: channels={:?}, per channel queue={} workers={}",
            lanes.iter().map(|l| l.channel.kind().as_str()).collect::<Vec<_>>(),
            config.queue_capacity,
            config.workers
        );

        Ok(Self {
            intake: Mutex::new(Some(senders)),
            lanes,
            workers: Mutex::new(workers),
            stats,
        })
    }

    /// Enqueue `event` on every channel without waiting on any network call.
    pub fn dispatch(&self, event: AlertEvent) -> Result<(), DispatchError> {
        let guard = match self.intake.lock() {
            Ok(guard) => guard,
            Err(_) => return Err(DispatchError::ShutDown(event)),
        };
        let Some(senders) = guard.as_ref() else {
            return Err(DispatchError::ShutDown(event));
        };
        if senders.is_empty() {
            log::warn!("alert from {} not delivered: no channels", event.formatted_timestamp());
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let event = Arc::new(event);
        let mut skipped = Vec::new();
        for (sender, lane) in senders.iter().zip(&self.lanes) {
            if sender.try_send(event.clone()).is_err() {
                skipped.push(lane.channel.kind());
            }
        }

        if skipped.len() == senders.len() {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            let event = Arc::try_unwrap(event).unwrap_or_else(|shared| (*shared).clone());
            log::warn!(
                "alert queues full ({} pending); rejecting alert from {}",
                self.pending(),
                event.formatted_timestamp()
            );
            return Err(DispatchError::QueueFull(event));
        }

        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        for kind in skipped {
            log::warn!(
                "{} alert queue full; skipping alert from {}",
                kind,
                event.formatted_timestamp()
            );
            self.stats.record(&DeliveryChannelResult {
                channel: kind,
                outcome: DeliveryOutcome::Failed("channel queue full".to_string()),
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.snapshot()
    }

    /// Events accepted but not yet picked up, on the most backed-up channel.
    pub fn pending(&self) -> usize {
        self.lanes.iter().map(|lane| lane.queue.len()).max().unwrap_or(0)
    }

    /// Stop intake, let workers drain their queues for at most `grace`, then
    /// release channel connections with whatever time is left. Workers still
    /// busy after that are left running detached.
    pub fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;
        if let Ok(mut intake) = self.intake.lock() {
            intake.take();
        }

        let mut running = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        while !running.is_empty() && Instant::now() < deadline {
            let (finished, busy): (Vec<_>, Vec<_>) =
                running.into_iter().partition(|(_, h)| h.is_finished());
            for (kind, handle) in finished {
                if handle.join().is_err() {
                    log::error!("{} alert worker panicked", kind);
                }
            }
            running = busy;
            if !running.is_empty() {
                std::thread::sleep(JOIN_POLL);
            }
        }

        let abandoned_workers = running.len();
        let pending_events = self.pending();
        for lane in &self.lanes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            lane.channel.shutdown(remaining);
        }

        let stats = self.stats();
        if abandoned_workers == 0 {
            log::info!("notification dispatcher drained: {:?}", stats);
        } else {
            let busy: Vec<&str> = running.iter().map(|(kind, _)| kind.as_str()).collect();
            log::warn!(
                "dispatcher stopped after {:?}: busy {:?}, {} queued alerts abandoned: {:?}",
                grace,
                busy,
                pending_events,
                stats
            );
        }

        ShutdownReport {
            drained: abandoned_workers == 0,
            abandoned_workers,
            pending_events,
        }
    }
}

impl AlertSink for NotificationDispatcher {
    fn on_confirmed(&self, event: AlertEvent) -> Result<(), DispatchError> {
        self.dispatch(event)
    }
}

fn lane_worker(rx: Receiver<Arc<AlertEvent>>, channel: &dyn AlertChannel, stats: &StatsCounters) {
    for event in rx.iter() {
        stats.record(&deliver_one(channel, &event));
    }
}

fn deliver_one(channel: &dyn AlertChannel, event: &AlertEvent) -> DeliveryChannelResult {
    let kind = channel.kind();
    let outcome = match channel.deliver(event) {
        Ok(()) => {
            log::info!("{} alert sent ({})", kind, event.formatted_timestamp());
            DeliveryOutcome::Sent
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            log::warn!("{} alert failed: {}", kind, reason);
            DeliveryOutcome::Failed(reason)
        }
    };
    DeliveryChannelResult {
        channel: kind,
        outcome,
    }
}
