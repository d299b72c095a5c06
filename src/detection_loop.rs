//! Frame-by-frame driver.
//!
//! Pulls frames, asks the extractor for a hand, feeds the gesture machine and,
//! on confirmation, captures evidence and hands the alert to an `AlertSink`.
//! Everything here runs on the caller's thread; the sink must not block.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::alert::{AlertEvent, DEFAULT_ALERT_MESSAGE};
use crate::detect::LandmarkExtractor;
use crate::dispatch::{AlertSink, DispatchError};
use crate::evidence::EvidenceCapture;
use crate::frame::Frame;
use crate::gesture::{Decision, GestureStateMachine};
use crate::ingest::FrameSource;
use crate::landmarks::LandmarkSnapshot;

pub const SOS_LABEL: &str = "SOS DETECTION";
pub const IDLE_LABEL: &str = "No SOS";

/// What happened to the alert raised by a confirmed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AlertHandoff {
    Dispatched { with_evidence: bool },
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameOutcome {
    pub decision: Decision,
    pub hand_present: bool,
    pub handoff: Option<AlertHandoff>,
}

impl FrameOutcome {
    /// Overlay text for the frame.
    pub fn label(&self) -> &'static str {
        if self.decision.is_confirmed() {
            SOS_LABEL
        } else {
            IDLE_LABEL
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub frames_with_hand: u64,
    pub extract_errors: u64,
    pub confirmed: u64,
    pub resets: u64,
    pub alerts_dispatched: u64,
    pub alerts_rejected: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        self.frames += 1;
        if outcome.hand_present {
            self.frames_with_hand += 1;
        }
        match outcome.decision {
            Decision::Confirmed { .. } => self.confirmed += 1,
            Decision::Reset(_) => self.resets += 1,
            Decision::Pending => {}
        }
        match outcome.handoff {
            Some(AlertHandoff::Dispatched { .. }) => self.alerts_dispatched += 1,
            Some(AlertHandoff::Rejected(_)) => self.alerts_rejected += 1,
            None => {}
        }
    }
}

pub struct DetectionLoop<S: AlertSink> {
    machine: GestureStateMachine,
    capture: EvidenceCapture,
    sink: S,
    message: String,
}

impl<S: AlertSink> DetectionLoop<S> {
    pub fn new(machine: GestureStateMachine, capture: EvidenceCapture, sink: S) -> Self {
        Self {
            machine,
            capture,
            sink,
            message: DEFAULT_ALERT_MESSAGE.to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn machine(&self) -> &GestureStateMachine {
        &self.machine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Process one frame. `hand` is the extractor's result for `frame`.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        hand: Option<&LandmarkSnapshot>,
        now: Instant,
    ) -> FrameOutcome {
        let decision = match hand {
            Some(hand) => self.machine.observe(hand, now),
            None => self.machine.tick(now),
        };
        let handoff = match decision {
            Decision::Confirmed { .. } => Some(self.raise_alert(frame)),
            _ => None,
        };
        FrameOutcome {
            decision,
            hand_present: hand.is_some(),
            handoff,
        }
    }

    /// Run until the source ends or `stop` is set.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        extractor: &mut dyn LandmarkExtractor,
        stop: &AtomicBool,
    ) -> Result<LoopStats> {
        log::info!(
            "detection loop started: source={}, extractor={}",
            source.name(),
            extractor.name()
        );
        let mut stats = LoopStats::default();

        while !stop.load(Ordering::SeqCst) {
            let Some(frame) = source
                .next_frame()
                .with_context(|| format!("read frame from {}", source.name()))?
            else {
                log::info!("frame source {} ended", source.name());
                break;
            };

            let hand = match extractor.extract(&frame) {
                Ok(hand) => hand,
                Err(e) => {
                    stats.extract_errors += 1;
                    log::warn!("landmark extraction failed on frame {}: {:#}", frame.sequence, e);
                    None
                }
            };

            let outcome = self.process_frame(&frame, hand.as_ref(), frame.captured_at);
            log::debug!("frame {}: {}", frame.sequence, outcome.label());
            stats.record(&outcome);
        }

        log::info!("detection loop stopped: {:?}", stats);
        Ok(stats)
    }

    fn raise_alert(&mut self, frame: &Frame) -> AlertHandoff {
        let at = Utc::now();
        let mut event = AlertEvent::new(self.message.clone(), at);
        match self.capture.capture(frame, at) {
            Ok(evidence) => event = event.with_evidence(evidence),
            Err(e) => log::warn!("evidence capture failed, alerting without image: {:#}", e),
        }
        let with_evidence = event.evidence().is_some();

        match self.sink.on_confirmed(event) {
            Ok(()) => AlertHandoff::Dispatched { with_evidence },
            Err(e) => {
                let reason = e.to_string();
                match e {
                    DispatchError::QueueFull(dropped) => log::warn!(
                        "SOS alert from {} dropped: {}",
                        dropped.formatted_timestamp(),
                        reason
                    ),
                    DispatchError::ShutDown(_) => log::warn!("SOS alert not sent: {}", reason),
                }
                AlertHandoff::Rejected(reason)
            }
        }
    }
}
