//! Transactional e-mail over HTTP.
//!
//! One POST per alert with an API key header. The transport reports the HTTP
//! status and body as-is; deciding what counts as delivered is the caller's job.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use std::time::Duration;

use crate::alert::AlertEvent;

pub const DEFAULT_EMAIL_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";
pub const DEFAULT_SENDER_NAME: &str = "SOS DETECTION";

/// Status the mail API returns when a message has been accepted.
pub const ACCEPTED_STATUS: u16 = 201;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Base64 (standard alphabet, padded).
    pub content: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct EmailRequest {
    pub sender: Contact,
    pub to: Vec<Contact>,
    pub subject: String,
    #[serde(rename = "htmlContent")]
    pub html_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Vec<Attachment>>,
}

/// Addressing for alert mail.
#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub endpoint: String,
    pub api_key: String,
    pub sender: Contact,
    pub recipient: Contact,
    pub timeout: Duration,
}

impl EmailRequest {
    pub fn for_alert(
        event: &AlertEvent,
        sender: &Contact,
        recipient: &Contact,
        location: &str,
    ) -> Self {
        let timestamp = event.formatted_timestamp();
        let attachment = event.evidence().map(|evidence| {
            vec![Attachment {
                content: BASE64.encode(&evidence.bytes),
                name: evidence.name.clone(),
            }]
        });
        Self {
            sender: sender.clone(),
            to: vec![recipient.clone()],
            subject: format!("SOS DETECTION - {}", timestamp),
            html_content: render_html(event.message(), &timestamp, location),
            attachment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED_STATUS
    }
}

/// Outbound mail seam. `Err` means the request never produced an HTTP reply.
pub trait MailSender: Send + Sync {
    fn send(&self, request: &EmailRequest) -> Result<HttpReply>;
}

pub struct HttpMailer {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl HttpMailer {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_settings(settings: &EmailSettings) -> Self {
        Self::new(&settings.endpoint, &settings.api_key, settings.timeout)
    }
}

impl MailSender for HttpMailer {
    fn send(&self, request: &EmailRequest) -> Result<HttpReply> {
        let body = serde_json::to_string(request).context("serialize email request")?;
        let result = self
            .agent
            .post(&self.endpoint)
            .set("accept", "application/json")
            .set("api-key", &self.api_key)
            .set("content-type", "application/json")
            .send_string(&body);

        match result {
            Ok(response) => {
                let status = response.status();
                Ok(HttpReply {
                    status,
                    body: response.into_string().unwrap_or_default(),
                })
            }
            Err(ureq::Error::Status(status, response)) => Ok(HttpReply {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(anyhow!("email request to {} failed: {}", self.endpoint, e)),
        }
    }
}

fn render_html(message: &str, timestamp: &str, location: &str) -> String {
    format!(
        "<html>\n<body>\n\
         <h1>SOS DETECTION ALERT</h1>\n\
         <p><strong>Message:</strong> {}</p>\n\
         <p><strong>Timestamp:</strong> {}</p>\n\
         <p><strong>Location:</strong> {}</p>\n\
         </body>\n</html>\n",
        escape_html(message),
        escape_html(timestamp),
        escape_html(location)
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
