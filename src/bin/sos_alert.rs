//! sos_alert - send one SOS alert through the configured channels.
//!
//! Headless front end for setups where recognition happens elsewhere: builds
//! the alert, optionally attaches an image file, hands it to the dispatcher and
//! waits for delivery.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use sos_sentinel::config::SosConfig;
use sos_sentinel::evidence::evidence_name;
use sos_sentinel::{AlertEvent, AlertSink, ChannelKind, Evidence, NotificationDispatcher};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a single SOS alert")]
struct Args {
    /// Config file (TOML or JSON). Falls back to defaults plus SOS_* variables.
    #[arg(long, env = "SOS_CONFIG")]
    config: Option<PathBuf>,

    /// Alert text. Defaults to the configured alert message.
    #[arg(long)]
    message: Option<String>,

    /// Image to attach as evidence.
    #[arg(long)]
    image: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SosConfig::load_from(args.config.as_deref())?;

    let now = Utc::now();
    let message = args.message.unwrap_or_else(|| cfg.alert_message.clone());
    let mut event = AlertEvent::new(message, now);
    if let Some(path) = args.image.as_ref() {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| evidence_name(now));
        event = event.with_evidence(Evidence::new(bytes, name));
    }

    let dispatcher = NotificationDispatcher::new(cfg.alert_channels()?, cfg.dispatch_config())?;
    if let Err(e) = dispatcher.on_confirmed(event) {
        dispatcher.shutdown(cfg.dispatch.shutdown_grace);
        return Err(anyhow!("alert not queued: {}", e));
    }

    let report = dispatcher.shutdown(cfg.dispatch.shutdown_grace);
    let stats = dispatcher.stats();
    for kind in [ChannelKind::PubSub, ChannelKind::Email] {
        log::info!(
            "{}: {} sent, {} failed",
            kind,
            stats.sent(kind),
            stats.failed(kind)
        );
    }
    if !report.drained {
        return Err(anyhow!(
            "alert delivery still in progress after {:?}",
            cfg.dispatch.shutdown_grace
        ));
    }
    if stats.pubsub_sent + stats.email_sent == 0 {
        return Err(anyhow!("alert was not delivered on any channel"));
    }
    Ok(())
}
