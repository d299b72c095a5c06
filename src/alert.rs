//! Alert events and delivery results.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::evidence::Evidence;

pub const DEFAULT_ALERT_MESSAGE: &str = "SOS Alert detected!";

/// Wire format for timestamps on every channel.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One confirmed detection, immutable once created.
///
/// Ownership moves into the dispatcher; nothing reads it back afterwards.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    message: String,
    timestamp: DateTime<Utc>,
    evidence: Option<Evidence>,
}

impl AlertEvent {
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            timestamp,
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        self.evidence.as_ref()
    }

    pub fn evidence_name(&self) -> Option<&str> {
        self.evidence.as_ref().map(|e| e.name.as_str())
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    PubSub,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PubSub => "pubsub",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
}

/// Outcome of one delivery attempt; used for logging and statistics only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryChannelResult {
    pub channel: ChannelKind,
    pub outcome: DeliveryOutcome,
}

impl DeliveryChannelResult {
    pub fn is_sent(&self) -> bool {
        self.outcome == DeliveryOutcome::Sent
    }
}

/// Payload for the status topic.
#[derive(Clone, Debug, Serialize)]
pub struct StatusMessage {
    pub message: String,
    pub timestamp: String,
    pub location: String,
}

impl StatusMessage {
    pub fn from_event(event: &AlertEvent, location: &str) -> Self {
        Self {
            message: event.message().to_string(),
            timestamp: event.formatted_timestamp(),
            location: location.to_string(),
        }
    }
}

/// Payload for the image topic, kept apart from status to keep large bodies
/// off the primary topic.
#[derive(Clone, Debug, Serialize)]
pub struct ImageMessage {
    pub timestamp: String,
    pub image_name: String,
    /// Base64 (standard alphabet, padded).
    pub image_data: String,
}

impl ImageMessage {
    pub fn from_event(event: &AlertEvent) -> Option<Self> {
        let evidence = event.evidence()?;
        Some(Self {
            timestamp: event.formatted_timestamp(),
            image_name: evidence.content_name(),
            image_data: BASE64.encode(&evidence.bytes),
        })
    }
}
