//! Network transports used by the alert channels.
//!
//! MQTT publishing (with TLS and a background reconnect task) and the
//! transactional e-mail HTTP client.

pub mod email;
pub mod mqtt;
mod tls;

pub use email::{
    Attachment, Contact, EmailRequest, EmailSettings, HttpMailer, HttpReply, MailSender,
};
pub use mqtt::{MqttPublisher, MqttSettings, Publisher};
pub use tls::{MqttEndpoint, TlsFiles, TlsMaterials};
