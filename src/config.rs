use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::DEFAULT_ALERT_MESSAGE;
use crate::classify::ThumbCheck;
use crate::dispatch::{
    AlertChannel, DispatchConfig, EmailChannel, PubSubChannel, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_WORKERS,
};
use crate::evidence::{EvidenceCapture, DEFAULT_EVIDENCE_DIR};
use crate::gesture::{GestureConfig, DEFAULT_CONFIRM_WINDOW};
use crate::transport::email::{DEFAULT_EMAIL_ENDPOINT, DEFAULT_SENDER_NAME};
use crate::transport::{
    Contact, EmailSettings, HttpMailer, MqttEndpoint, MqttPublisher, MqttSettings, TlsFiles,
};

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_CLIENT_ID: &str = "sos_sentinel";
const DEFAULT_STATUS_TOPIC: &str = "gesture/sos/status";
const DEFAULT_IMAGE_TOPIC: &str = "gesture/sos/image";
const DEFAULT_LOCATION: &str = "Camera 1";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const MIN_KEEP_ALIVE_SECS: u64 = 5;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;
const DEFAULT_EMAIL_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct SosConfigFile {
    detector: Option<DetectorConfigFile>,
    evidence: Option<EvidenceConfigFile>,
    mqtt: Option<MqttConfigFile>,
    email: Option<EmailConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    alert_message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    confirm_window_secs: Option<f64>,
    thumb_check: Option<ThumbCheck>,
}

#[derive(Debug, Deserialize, Default)]
struct EvidenceConfigFile {
    dir: Option<PathBuf>,
    persist: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
    status_topic: Option<String>,
    image_topic: Option<String>,
    location: Option<String>,
    keep_alive_secs: Option<u64>,
    reconnect_max_backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EmailConfigFile {
    endpoint: Option<String>,
    api_key: Option<String>,
    sender_name: Option<String>,
    sender_email: Option<String>,
    recipient_email: Option<String>,
    recipient_name: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    queue_capacity: Option<usize>,
    workers: Option<usize>,
    shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SosConfig {
    pub detector: DetectorSettings,
    pub evidence: EvidenceSettings,
    pub mqtt: MqttConfig,
    pub email: EmailConfig,
    pub dispatch: DispatchSettings,
    pub alert_message: String,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub confirm_window: Duration,
    pub thumb_check: ThumbCheck,
}

#[derive(Debug, Clone)]
pub struct EvidenceSettings {
    pub dir: PathBuf,
    pub persist: bool,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_addr: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls: TlsFiles,
    pub status_topic: String,
    pub image_topic: String,
    pub location: String,
    pub keep_alive: Duration,
    pub reconnect_max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub sender_name: String,
    pub sender_email: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_name: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub shutdown_grace: Duration,
}

impl SosConfig {
    /// Defaults, then the file named by `SOS_CONFIG`, then `SOS_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = env_value("SOS_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit file taking the place of `SOS_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SosConfigFile) -> Result<Self> {
        let detector = file.detector.unwrap_or_default();
        let confirm_window = match detector.confirm_window_secs {
            Some(secs) => secs_to_duration(secs, "detector.confirm_window_secs")?,
            None => DEFAULT_CONFIRM_WINDOW,
        };
        let detector = DetectorSettings {
            confirm_window,
            thumb_check: detector.thumb_check.unwrap_or_default(),
        };

        let evidence = file.evidence.unwrap_or_default();
        let evidence = EvidenceSettings {
            dir: evidence
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
            persist: evidence.persist.unwrap_or(true),
        };

        let mqtt = file.mqtt.unwrap_or_default();
        let mqtt = MqttConfig {
            broker_addr: mqtt
                .broker_addr
                .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
            client_id: mqtt
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            username: mqtt.username,
            password: mqtt.password,
            use_tls: mqtt.use_tls.unwrap_or(false),
            tls: TlsFiles {
                ca: mqtt.tls_ca_path,
                client_cert: mqtt.tls_client_cert_path,
                client_key: mqtt.tls_client_key_path,
            },
            status_topic: mqtt
                .status_topic
                .unwrap_or_else(|| DEFAULT_STATUS_TOPIC.to_string()),
            image_topic: mqtt
                .image_topic
                .unwrap_or_else(|| DEFAULT_IMAGE_TOPIC.to_string()),
            location: mqtt
                .location
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            keep_alive: Duration::from_secs(
                mqtt.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            reconnect_max_backoff: Duration::from_secs(
                mqtt.reconnect_max_backoff_secs
                    .unwrap_or(DEFAULT_MAX_BACKOFF_SECS),
            ),
        };

        let email = file.email.unwrap_or_default();
        let email = EmailConfig {
            endpoint: email
                .endpoint
                .unwrap_or_else(|| DEFAULT_EMAIL_ENDPOINT.to_string()),
            api_key: email.api_key,
            sender_name: email
                .sender_name
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            sender_email: email.sender_email,
            recipient_email: email.recipient_email,
            recipient_name: email.recipient_name,
            timeout: Duration::from_secs(email.timeout_secs.unwrap_or(DEFAULT_EMAIL_TIMEOUT_SECS)),
        };

        let dispatch = file.dispatch.unwrap_or_default();
        let dispatch = DispatchSettings {
            queue_capacity: dispatch.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            workers: dispatch.workers.unwrap_or(DEFAULT_WORKERS),
            shutdown_grace: Duration::from_secs(
                dispatch
                    .shutdown_grace_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
        };

        Ok(Self {
            detector,
            evidence,
            mqtt,
            email,
            dispatch,
            alert_message: file
                .alert_message
                .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("SOS_MQTT_BROKER_ADDR") {
            self.mqtt.broker_addr = addr;
        }
        if let Some(user) = env_value("SOS_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = env_value("SOS_MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        if let Some(location) = env_value("SOS_LOCATION") {
            self.mqtt.location = location;
        }
        if let Some(key) = env_value("SOS_EMAIL_API_KEY") {
            self.email.api_key = Some(key);
        }
        if let Some(sender) = env_value("SOS_SENDER_EMAIL") {
            self.email.sender_email = Some(sender);
        }
        if let Some(recipient) = env_value("SOS_RECEIVER_EMAIL") {
            self.email.recipient_email = Some(recipient);
        }
        if let Some(name) = env_value("SOS_RECEIVER_NAME") {
            self.email.recipient_name = Some(name);
        }
        if let Some(dir) = env_value("SOS_EVIDENCE_DIR") {
            self.evidence.dir = PathBuf::from(dir);
        }
        let window = env_parse::<f64>("SOS_CONFIRM_WINDOW_SECS", "a number of seconds")?;
        if let Some(window) = window {
            self.detector.confirm_window = secs_to_duration(window, "SOS_CONFIRM_WINDOW_SECS")?;
        }
        let capacity = env_parse::<usize>("SOS_QUEUE_CAPACITY", "a positive integer")?;
        if let Some(capacity) = capacity {
            self.dispatch.queue_capacity = capacity;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.detector.confirm_window.is_zero() {
            return Err(anyhow!("confirm window must be greater than zero"));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be greater than zero"));
        }
        if self.dispatch.workers == 0 {
            return Err(anyhow!("dispatch workers must be greater than zero"));
        }
        if self.mqtt.keep_alive.as_secs() < MIN_KEEP_ALIVE_SECS {
            return Err(anyhow!(
                "mqtt keep alive must be at least {} seconds",
                MIN_KEEP_ALIVE_SECS
            ));
        }
        validate_topic("mqtt.status_topic", &self.mqtt.status_topic)?;
        validate_topic("mqtt.image_topic", &self.mqtt.image_topic)?;
        if self.mqtt.status_topic == self.mqtt.image_topic {
            return Err(anyhow!("mqtt status and image topics must differ"));
        }
        MqttEndpoint::parse(&self.mqtt.broker_addr, self.mqtt.use_tls)
            .context("invalid mqtt.broker_addr")?;
        Ok(())
    }

    pub fn gesture_config(&self) -> GestureConfig {
        GestureConfig {
            confirm_window: self.detector.confirm_window,
            thumb_check: self.detector.thumb_check,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: self.dispatch.queue_capacity,
            workers: self.dispatch.workers,
        }
    }

    pub fn evidence_capture(&self) -> EvidenceCapture {
        EvidenceCapture::new(&self.evidence.dir, self.evidence.persist)
    }

    /// Connect the configured transports. MQTT is always on; e-mail only when
    /// fully configured.
    pub fn alert_channels(&self) -> Result<Vec<Arc<dyn AlertChannel>>> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();

        let publisher = MqttPublisher::connect(&self.mqtt.settings()?)?;
        channels.push(Arc::new(PubSubChannel::new(
            Arc::new(publisher),
            &self.mqtt.status_topic,
            &self.mqtt.image_topic,
            &self.mqtt.location,
        )));

        match self.email.settings() {
            Some(settings) => {
                log::info!("email alerts go to {}", settings.recipient.email);
                let mailer = HttpMailer::from_settings(&settings);
                channels.push(Arc::new(EmailChannel::new(
                    Arc::new(mailer),
                    settings.sender,
                    settings.recipient,
                    &self.mqtt.location,
                )));
            }
            None => log::warn!(
                "email channel disabled: api_key, sender_email and recipient_email are required"
            ),
        }
        Ok(channels)
    }
}

impl MqttConfig {
    /// Resolve the broker address and read TLS material from disk.
    pub fn settings(&self) -> Result<MqttSettings> {
        let endpoint = MqttEndpoint::parse(&self.broker_addr, self.use_tls)?;
        Ok(MqttSettings {
            endpoint,
            tls: self.tls.read()?,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: self.keep_alive,
            max_backoff: self.reconnect_max_backoff,
        })
    }
}

impl EmailConfig {
    /// `None` unless the API key, sender and recipient are all set.
    pub fn settings(&self) -> Option<EmailSettings> {
        let api_key = self.api_key.clone()?;
        let sender_email = self.sender_email.clone()?;
        let recipient_email = self.recipient_email.clone()?;
        let recipient_name = self
            .recipient_name
            .clone()
            .unwrap_or_else(|| recipient_email.clone());
        Some(EmailSettings {
            endpoint: self.endpoint.clone(),
            api_key,
            sender: Contact {
                name: self.sender_name.clone(),
                email: sender_email,
            },
            recipient: Contact {
                name: recipient_name,
                email: recipient_email,
            },
            timeout: self.timeout,
        })
    }
}

fn secs_to_duration(secs: f64, field: &str) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", field));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{} is out of range: {}", field, e))
}

fn validate_topic(field: &str, topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", field));
    }
    if topic.contains(['+', '#']) {
        return Err(anyhow!("{} must not contain MQTT wildcards: {}", field, topic));
    }
    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_value(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<SosConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    parse_config(&raw, is_toml)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}

fn parse_config<T: DeserializeOwned>(raw: &str, is_toml: bool) -> Result<T> {
    if is_toml {
        Ok(toml::from_str(raw)?)
    } else {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SosConfig::from_file(SosConfigFile::default()).expect("defaults");
        cfg.validate().expect("valid");
        assert_eq!(cfg.detector.confirm_window, Duration::from_secs(3));
        assert_eq!(cfg.mqtt.status_topic, "gesture/sos/status");
        assert_eq!(cfg.dispatch.queue_capacity, 16);
        assert!(cfg.email.settings().is_none());
    }

    #[test]
    fn wildcard_topic_is_rejected() {
        let mut cfg = SosConfig::from_file(SosConfigFile::default()).expect("defaults");
        cfg.mqtt.image_topic = "gesture/sos/#".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shared_topic_is_rejected() {
        let mut cfg = SosConfig::from_file(SosConfigFile::default()).expect("defaults");
        cfg.mqtt.image_topic = cfg.mqtt.status_topic.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_window_is_rejected() {
        assert!(secs_to_duration(0.0, "w").is_err());
        assert!(secs_to_duration(f64::NAN, "w").is_err());
        assert_eq!(
            secs_to_duration(2.5, "w").unwrap(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn toml_sections_parse() {
        let file: SosConfigFile = parse_config(
            "alert_message = \"help\"\n[detector]\nthumb_check = \"extended\"\n",
            true,
        )
        .expect("toml");
        let cfg = SosConfig::from_file(file).expect("config");
        assert_eq!(cfg.alert_message, "help");
        assert_eq!(cfg.detector.thumb_check, ThumbCheck::Extended);
    }
}
