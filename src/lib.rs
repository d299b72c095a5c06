//! SOS Sentinel
//!
//! Recognizes the silent "signal for help" hand gesture in a video stream and
//! raises alerts over MQTT and e-mail without stalling frame processing.
//!
//! # Architecture
//!
//! Recognition is single-threaded and owns all mutable gesture state:
//!
//! 1. A `FrameSource` yields frames; a `LandmarkExtractor` turns each into at
//!    most one hand (21 landmarks).
//! 2. `PoseClassifier` maps a hand to a shape; `GestureStateMachine` sequences
//!    shapes into the four-phase signal under a time window.
//! 3. On confirmation the `DetectionLoop` encodes the frame as evidence and
//!    hands an `AlertEvent` to an `AlertSink`.
//!
//! The `NotificationDispatcher` is the only concurrency boundary: a bounded
//! queue feeding worker threads that deliver to every channel in parallel.
//!
//! # Module Structure
//!
//! - `landmarks`, `classify`, `gesture`: recognition core
//! - `frame`, `ingest`, `detect`: frame acquisition and landmark extraction seams
//! - `evidence`, `alert`, `dispatch`, `transport`: alerting
//! - `detection_loop`: the driver tying both halves together
//! - `config`: file and environment configuration for the binaries

pub mod alert;
pub mod classify;
pub mod config;
pub mod detect;
pub mod detection_loop;
pub mod dispatch;
pub mod evidence;
pub mod frame;
pub mod gesture;
pub mod ingest;
pub mod landmarks;
pub mod transport;

pub use alert::{AlertEvent, ChannelKind, DeliveryChannelResult, DeliveryOutcome};
pub use classify::{PoseClassifier, ShapeClassification, ThumbCheck};
pub use detect::{LandmarkExtractor, ReplayExtractor};
pub use detection_loop::{AlertHandoff, DetectionLoop, FrameOutcome, LoopStats};
pub use dispatch::{
    AlertChannel, AlertSink, DispatchConfig, DispatchError, DispatchStats, EmailChannel,
    NotificationDispatcher, PubSubChannel, ShutdownReport,
};
pub use evidence::{Evidence, EvidenceCapture};
pub use frame::Frame;
pub use gesture::{Decision, GestureConfig, GestureState, GestureStateMachine, ResetCause};
pub use ingest::{FrameSource, LandmarkTrace, TraceConfig, TraceSource};
pub use landmarks::{Landmark, LandmarkSnapshot};
