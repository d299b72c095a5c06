//! Broker address resolution and transport selection.
//!
//! The broker address in the config decides whether TLS is used; the PEM
//! files named next to it decide how the server (and optionally the client)
//! is authenticated. Plain TCP with TLS files configured is refused rather
//! than silently sending alerts in the clear.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

/// PEM file locations from `mqtt.tls_*_path`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsFiles {
    /// Read the configured files. A client certificate needs its key and a
    /// CA to verify the broker against.
    pub fn read(&self) -> Result<TlsMaterials> {
        let ca = match self.ca.as_deref() {
            Some(path) => Some(read_pem(path, "CA certificate")?),
            None => None,
        };
        let client_auth = match (self.client_cert.as_deref(), self.client_key.as_deref()) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            (None, None) => None,
            _ => bail!("mqtt client certificate and key must be configured together"),
        };
        if client_auth.is_some() && ca.is_none() {
            bail!("mqtt client certificates require tls_ca_path");
        }
        Ok(TlsMaterials { ca, client_auth })
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read mqtt {} {}", what, path.display()))
}

/// PEM bytes loaded from `TlsFiles`.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// (certificate, key)
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    fn is_empty(&self) -> bool {
        self.ca.is_none() && self.client_auth.is_none()
    }

    pub fn build_transport(&self, endpoint: &MqttEndpoint) -> Result<Transport> {
        if !endpoint.use_tls {
            if !self.is_empty() {
                bail!(
                    "TLS files configured for plain broker {}; use mqtts:// or mqtt.use_tls",
                    endpoint
                );
            }
            return Ok(Transport::tcp());
        }
        match &self.ca {
            None => Ok(Transport::tls_with_default_config()),
            Some(ca) => Ok(Transport::tls(ca.clone(), self.client_auth.clone(), None)),
        }
    }
}

/// Where the alert broker lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl MqttEndpoint {
    /// Accepts `host:port`, `[v6]:port`, or the same behind `mqtt://`,
    /// `tcp://`, `mqtts://` or `ssl://`. With a scheme the port may be left
    /// out and defaults to 1883 or 8883. `force_tls` upgrades a plain address.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let addr = addr.trim();
        let (use_tls, authority, default_port) = match addr.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (force_tls, rest, Some(PLAIN_PORT)),
            Some(("mqtts" | "ssl", rest)) => (true, rest, Some(TLS_PORT)),
            Some((scheme, _)) => bail!("unsupported broker scheme '{}' in {}", scheme, addr),
            None => (force_tls, addr, None),
        };
        let (host, port) = split_authority(authority, default_port)
            .with_context(|| format!("invalid broker address '{}'", addr))?;
        Ok(Self {
            host,
            port,
            use_tls,
        })
    }
}

impl fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

fn split_authority(authority: &str, default_port: Option<u16>) -> Result<(String, u16)> {
    if let Ok(socket) = authority.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), socket.port()));
    }
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| anyhow!("port '{}' is not a number", port))?;
            (host, Some(port))
        }
        _ => (authority, None),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("missing host");
    }
    let port = port
        .or(default_port)
        .ok_or_else(|| anyhow!("missing port"))?;
    Ok((host.to_string(), port))
}
