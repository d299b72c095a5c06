//! sos_sentineld - watch a frame stream for the SOS hand signal and raise alerts.
//!
//! Frames and landmarks come from a recorded landmark trace (JSON Lines, one
//! line per frame). Confirmed signals are published over MQTT and, when
//! configured, sent by e-mail. Ctrl-C stops the loop and drains pending alerts.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sos_sentinel::config::SosConfig;
use sos_sentinel::{
    DetectionLoop, GestureStateMachine, LandmarkTrace, NotificationDispatcher, ReplayExtractor,
    TraceConfig, TraceSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Silent SOS hand-signal detector")]
struct Args {
    /// Config file (TOML or JSON). Falls back to defaults plus SOS_* variables.
    #[arg(long, env = "SOS_CONFIG")]
    config: Option<PathBuf>,

    /// Landmark trace to replay.
    #[arg(long, env = "SOS_TRACE")]
    trace: PathBuf,

    /// Replay frame rate; 0 replays as fast as possible.
    #[arg(long, env = "SOS_TRACE_FPS", default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = SosConfig::load_from(args.config.as_deref())?;

    log::info!("sos_sentineld starting");
    log::info!("  MQTT broker: {}", cfg.mqtt.broker_addr);
    log::info!(
        "  topics: {} / {}",
        cfg.mqtt.status_topic,
        cfg.mqtt.image_topic
    );
    log::info!("  location: {}", cfg.mqtt.location);
    log::info!(
        "  confirm window: {:?} (thumb check: {})",
        cfg.detector.confirm_window,
        cfg.detector.thumb_check
    );
    log::info!(
        "  evidence: {} (persist: {})",
        cfg.evidence.dir.display(),
        cfg.evidence.persist
    );

    let trace = Arc::new(LandmarkTrace::load(&args.trace)?);
    log::info!("  trace: {} ({} frames)", args.trace.display(), trace.len());
    let mut source = TraceSource::new(
        TraceConfig {
            path: args.trace.clone(),
            target_fps: args.fps,
            width: args.width,
            height: args.height,
        },
        trace.clone(),
    );
    let mut extractor = ReplayExtractor::new(trace);

    let dispatcher = NotificationDispatcher::new(cfg.alert_channels()?, cfg.dispatch_config())?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let mut detection = DetectionLoop::new(
        GestureStateMachine::new(cfg.gesture_config()),
        cfg.evidence_capture(),
        &dispatcher,
    )
    .with_message(&cfg.alert_message);

    let outcome = detection.run(&mut source, &mut extractor, &stop);
    if stop.load(Ordering::SeqCst) {
        log::info!("shutdown signal received, draining alerts...");
    }

    let report = dispatcher.shutdown(cfg.dispatch.shutdown_grace);
    let stats = outcome?;
    log::info!(
        "processed {} frames, {} confirmed, {} alerts dispatched, {} rejected",
        stats.frames,
        stats.confirmed,
        stats.alerts_dispatched,
        stats.alerts_rejected
    );
    if !report.drained {
        log::warn!(
            "{} alert workers still busy at exit, {} alerts never attempted",
            report.abandoned_workers,
            report.pending_events
        );
    }
    Ok(())
}
