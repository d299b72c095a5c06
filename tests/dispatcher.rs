use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};

use sos_sentinel::dispatch::DispatchError;
use sos_sentinel::transport::{
    Contact, EmailRequest, HttpReply, MailSender, MqttEndpoint, MqttPublisher, MqttSettings,
    Publisher, TlsMaterials,
};
use sos_sentinel::{
    AlertChannel, AlertEvent, AlertSink, DispatchConfig, EmailChannel, Evidence,
    NotificationDispatcher, PubSubChannel,
};

const STATUS_TOPIC: &str = "gesture/sos/status";
const IMAGE_TOPIC: &str = "gesture/sos/image";
const DRAIN: Duration = Duration::from_secs(5);

/// Blocks every call until the paired sender is dropped.
struct Gate(Receiver<()>);

fn gate() -> (Sender<()>, Arc<Gate>) {
    let (tx, rx) = unbounded();
    (tx, Arc::new(Gate(rx)))
}

impl Publisher for Gate {
    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
        let _ = self.0.recv();
        Ok(())
    }
}

impl MailSender for Gate {
    fn send(&self, _request: &EmailRequest) -> Result<HttpReply> {
        let _ = self.0.recv();
        Ok(HttpReply {
            status: 201,
            body: String::new(),
        })
    }
}

struct RecordingPublisher {
    sent: Mutex<Vec<(String, serde_json::Value)>>,
    notify: Sender<String>,
}

impl RecordingPublisher {
    fn new() -> (Arc<Self>, Receiver<String>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                notify: tx,
            }),
            rx,
        )
    }

    fn messages(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let value: serde_json::Value = serde_json::from_slice(&payload)?;
        self.sent.lock().unwrap().push((topic.to_string(), value));
        let _ = self.notify.send(topic.to_string());
        Ok(())
    }
}

struct FailingPublisher;

impl Publisher for FailingPublisher {
    fn publish(&self, topic: &str, _payload: Vec<u8>) -> Result<()> {
        Err(anyhow!("broker unreachable for {}", topic))
    }
}

struct RecordingMailer {
    status: u16,
    requests: Mutex<Vec<serde_json::Value>>,
}

impl RecordingMailer {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().unwrap().clone()
    }
}

impl MailSender for RecordingMailer {
    fn send(&self, request: &EmailRequest) -> Result<HttpReply> {
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request)?);
        Ok(HttpReply {
            status: self.status,
            body: "{\"code\":\"unauthorized\"}".to_string(),
        })
    }
}

fn contact(name: &str, email: &str) -> Contact {
    Contact {
        name: name.to_string(),
        email: email.to_string(),
    }
}

fn pubsub(publisher: Arc<dyn Publisher>) -> Arc<dyn AlertChannel> {
    Arc::new(PubSubChannel::new(publisher, STATUS_TOPIC, IMAGE_TOPIC, "Camera 1"))
}

fn email(mailer: Arc<dyn MailSender>) -> Arc<dyn AlertChannel> {
    Arc::new(EmailChannel::new(
        mailer,
        contact("SOS DETECTION", "alerts@example.com"),
        contact("Duty Desk", "desk@example.com"),
        "Camera 1",
    ))
}

fn event() -> AlertEvent {
    AlertEvent::new(
        "SOS Alert detected!",
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
    )
}

fn config(queue_capacity: usize, workers: usize) -> DispatchConfig {
    DispatchConfig {
        queue_capacity,
        workers,
    }
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn dispatch_returns_while_both_backends_block() {
    let (release_pub, publisher) = gate();
    let (release_mail, mailer) = gate();
    let dispatcher =
        NotificationDispatcher::new(vec![pubsub(publisher), email(mailer)], config(4, 2))
            .expect("dispatcher");

    for _ in 0..3 {
        let start = Instant::now();
        dispatcher.dispatch(event()).expect("queued");
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "dispatch took {:?}",
            start.elapsed()
        );
    }

    drop(release_pub);
    drop(release_mail);
    assert!(dispatcher.shutdown(DRAIN).drained);
}

#[test]
fn event_without_evidence_sends_status_and_plain_email() {
    let (publisher, _notify) = RecordingPublisher::new();
    let mailer = RecordingMailer::new(201);
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer.clone())],
        DispatchConfig::default(),
    )
    .expect("dispatcher");

    dispatcher.on_confirmed(event()).expect("queued");
    assert!(dispatcher.shutdown(DRAIN).drained);

    let messages = publisher.messages();
    assert_eq!(messages.len(), 1);
    let (topic, status) = &messages[0];
    assert_eq!(topic, STATUS_TOPIC);
    assert_eq!(status["message"], "SOS Alert detected!");
    assert_eq!(status["timestamp"], "2024-03-09 14:05:07");
    assert_eq!(status["location"], "Camera 1");

    let requests = mailer.requests();
    assert_eq!(requests.len(), 1);
    let mail = &requests[0];
    assert_eq!(mail["subject"], "SOS DETECTION - 2024-03-09 14:05:07");
    assert_eq!(mail["sender"]["email"], "alerts@example.com");
    assert_eq!(mail["to"][0]["name"], "Duty Desk");
    assert!(mail["htmlContent"]
        .as_str()
        .unwrap()
        .contains("SOS Alert detected!"));
    assert!(mail.get("attachment").is_none());

    let stats = dispatcher.stats();
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.pubsub_sent, 1);
    assert_eq!(stats.email_sent, 1);
}

#[test]
fn event_with_evidence_publishes_image_and_attaches_it() {
    let (publisher, _notify) = RecordingPublisher::new();
    let mailer = RecordingMailer::new(201);
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer.clone())],
        DispatchConfig::default(),
    )
    .expect("dispatcher");

    let evidence = Evidence::new(b"png".to_vec(), "screenshot_20240309_140507.png");
    dispatcher
        .dispatch(event().with_evidence(evidence))
        .expect("queued");
    assert!(dispatcher.shutdown(DRAIN).drained);

    let messages = publisher.messages();
    assert_eq!(messages.len(), 2);
    let image = messages
        .iter()
        .find(|(topic, _)| topic == IMAGE_TOPIC)
        .map(|(_, value)| value)
        .expect("image message");
    assert_eq!(image["image_data"], "cG5n");
    assert_eq!(image["timestamp"], "2024-03-09 14:05:07");
    assert!(image["image_name"]
        .as_str()
        .unwrap()
        .starts_with("screenshot_20240309_140507_"));
    assert!(messages.iter().any(|(topic, _)| topic == STATUS_TOPIC));

    let mail = &mailer.requests()[0];
    assert_eq!(mail["attachment"][0]["content"], "cG5n");
    assert_eq!(mail["attachment"][0]["name"], "screenshot_20240309_140507.png");
}

#[test]
fn email_rejection_does_not_stop_pubsub() {
    let (publisher, _notify) = RecordingPublisher::new();
    let mailer = RecordingMailer::new(401);
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer.clone())],
        DispatchConfig::default(),
    )
    .expect("dispatcher");

    dispatcher.dispatch(event()).expect("queued");
    assert!(dispatcher.shutdown(DRAIN).drained);

    assert_eq!(publisher.messages().len(), 1);
    assert_eq!(mailer.requests().len(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.pubsub_sent, 1);
    assert_eq!(stats.email_failed, 1);
    assert_eq!(stats.email_sent, 0);
}

#[test]
fn pubsub_failure_does_not_stop_email() {
    let mailer = RecordingMailer::new(201);
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(Arc::new(FailingPublisher)), email(mailer.clone())],
        DispatchConfig::default(),
    )
    .expect("dispatcher");

    dispatcher.dispatch(event()).expect("queued");
    assert!(dispatcher.shutdown(DRAIN).drained);

    assert_eq!(mailer.requests().len(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.pubsub_failed, 1);
    assert_eq!(stats.email_sent, 1);
}

#[test]
fn hung_email_does_not_delay_pubsub_for_same_event() {
    let (publisher, notify) = RecordingPublisher::new();
    let (release_mail, mailer) = gate();
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer)],
        config(4, 1),
    )
    .expect("dispatcher");

    dispatcher.dispatch(event()).expect("queued");
    let topic = notify
        .recv_timeout(Duration::from_secs(2))
        .expect("status published while email hangs");
    assert_eq!(topic, STATUS_TOPIC);

    drop(release_mail);
    assert!(dispatcher.shutdown(DRAIN).drained);
}

#[test]
fn full_queue_rejects_new_event_and_returns_it() {
    let (release, publisher) = gate();
    let dispatcher =
        NotificationDispatcher::new(vec![pubsub(publisher)], config(1, 1)).expect("dispatcher");

    dispatcher.dispatch(event()).expect("first queued");
    assert!(
        wait_until(Duration::from_secs(2), || dispatcher.pending() == 0),
        "worker never picked up the first alert"
    );
    dispatcher.dispatch(event()).expect("second fills the queue");

    let rejected = AlertEvent::new("third", Utc::now());
    match dispatcher.dispatch(rejected) {
        Err(DispatchError::QueueFull(event)) => assert_eq!(event.message(), "third"),
        other => panic!("expected QueueFull, got {other:?}"),
    }
    let stats = dispatcher.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.rejected, 1);

    drop(release);
    let report = dispatcher.shutdown(DRAIN);
    assert!(report.drained);
    assert_eq!(dispatcher.stats().pubsub_sent, 2);
}

#[test]
fn shutdown_abandons_blocked_work_after_grace() {
    let (release, publisher) = gate();
    let dispatcher =
        NotificationDispatcher::new(vec![pubsub(publisher)], config(4, 1)).expect("dispatcher");

    dispatcher.dispatch(event()).expect("queued");
    assert!(wait_until(Duration::from_secs(2), || dispatcher.pending() == 0));
    dispatcher.dispatch(event()).expect("queued behind the blocked one");

    let start = Instant::now();
    let report = dispatcher.shutdown(Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!report.drained);
    assert_eq!(report.abandoned_workers, 1);
    assert_eq!(report.pending_events, 1);

    assert!(matches!(
        dispatcher.dispatch(event()),
        Err(DispatchError::ShutDown(_))
    ));
    drop(release);
}

#[test]
fn hung_email_does_not_hold_back_later_status_publishes() {
    let (publisher, notify) = RecordingPublisher::new();
    let (release_mail, mailer) = gate();
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer)],
        DispatchConfig::default(),
    )
    .expect("dispatcher");

    for _ in 0..3 {
        dispatcher.dispatch(event()).expect("queued");
    }
    for n in 0..3 {
        let topic = notify
            .recv_timeout(Duration::from_secs(2))
            .unwrap_or_else(|_| panic!("status publish {} stuck behind email", n + 1));
        assert_eq!(topic, STATUS_TOPIC);
    }
    assert_eq!(dispatcher.stats().pubsub_sent, 3);

    drop(release_mail);
    assert!(dispatcher.shutdown(DRAIN).drained);
    assert_eq!(dispatcher.stats().email_sent, 3);
}

#[test]
fn full_email_queue_skips_email_but_keeps_publishing() {
    let (publisher, notify) = RecordingPublisher::new();
    let (release_mail, mailer) = gate();
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(publisher.clone()), email(mailer)],
        config(1, 1),
    )
    .expect("dispatcher");
    let published = || notify.recv_timeout(Duration::from_secs(2)).expect("status");

    // First alert occupies the mail worker, second waits in its queue.
    dispatcher.dispatch(event()).expect("first");
    published();
    assert!(wait_until(Duration::from_secs(2), || dispatcher.pending() == 0));
    dispatcher.dispatch(event()).expect("second");
    published();

    dispatcher.dispatch(event()).expect("accepted by pubsub");
    published();
    let stats = dispatcher.stats();
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.email_failed, 1);

    drop(release_mail);
    assert!(dispatcher.shutdown(DRAIN).drained);
    let stats = dispatcher.stats();
    assert_eq!(stats.pubsub_sent, 3);
    assert_eq!(stats.email_sent, 2);
}

#[test]
fn broker_outage_does_not_stop_email() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let settings = MqttSettings {
        endpoint: MqttEndpoint::parse(&format!("127.0.0.1:{port}"), false).expect("endpoint"),
        tls: TlsMaterials::default(),
        client_id: "sos-outage-test".to_string(),
        username: None,
        password: None,
        keep_alive: Duration::from_secs(30),
        max_backoff: Duration::from_secs(1),
    };
    let publisher = MqttPublisher::connect(&settings).expect("client");
    let mailer = RecordingMailer::new(201);
    let dispatcher = NotificationDispatcher::new(
        vec![pubsub(Arc::new(publisher)), email(mailer.clone())],
        config(64, 1),
    )
    .expect("dispatcher");

    const ALERTS: u64 = 48;
    for n in 0..ALERTS {
        let evidence = Evidence::new(vec![n as u8; 256], format!("screenshot_{n}.png"));
        dispatcher
            .dispatch(event().with_evidence(evidence))
            .expect("queued");
    }

    let start = Instant::now();
    let report = dispatcher.shutdown(Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(report.drained);

    assert_eq!(mailer.requests().len() as u64, ALERTS);
    let stats = dispatcher.stats();
    assert_eq!(stats.email_sent, ALERTS);
    assert!(stats.pubsub_failed > 0, "{stats:?}");
    assert_eq!(stats.pubsub_sent + stats.pubsub_failed, ALERTS);
}
