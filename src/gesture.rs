//! SOS gesture sequencer.
//!
//! The signal is four shapes in order: open palm, thumb tucked, fingers folded
//! over the thumb, thumb-tucked again. The time between entering the tucked
//! phase and completing the sequence must stay under the confirm window.
//!
//! Exactly one phase is evaluated per observation, so the machine advances at
//! most one phase per frame. A watchdog collapses any cycle older than the
//! confirm window back to `Idle`.

use std::time::{Duration, Instant};

use crate::classify::{PoseClassifier, ThumbCheck};
use crate::landmarks::LandmarkSnapshot;

pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GestureState {
    Idle,
    Phase1Open,
    Phase2ThumbFold,
    Phase3AllFold,
    Phase4ThumbFoldConfirm,
}

impl GestureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Phase1Open => "phase1-open",
            Self::Phase2ThumbFold => "phase2-thumb-fold",
            Self::Phase3AllFold => "phase3-all-fold",
            Self::Phase4ThumbFoldConfirm => "phase4-thumb-fold-confirm",
        }
    }
}

/// Why a cycle was abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetCause {
    /// The watchdog fired: the cycle outlived the confirm window.
    Stale { phase: GestureState },
    /// The sequence completed, but too slowly.
    TooSlow { elapsed: Duration },
}

/// Result of one observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Pending,
    Confirmed { elapsed: Duration },
    Reset(ResetCause),
}

impl Decision {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GestureConfig {
    pub confirm_window: Duration,
    pub thumb_check: ThumbCheck,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            confirm_window: DEFAULT_CONFIRM_WINDOW,
            thumb_check: ThumbCheck::default(),
        }
    }
}

/// Long-lived recognizer, owned by the detection loop for the process lifetime.
#[derive(Debug)]
pub struct GestureStateMachine {
    config: GestureConfig,
    classifier: PoseClassifier,
    state: GestureState,
    /// Set on entering Phase1; the watchdog's reference until Phase2 starts the cycle.
    opened_at: Option<Instant>,
    cycle_start: Option<Instant>,
    cycle_end: Option<Instant>,
}

impl GestureStateMachine {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            classifier: PoseClassifier::new(config.thumb_check),
            state: GestureState::Idle,
            opened_at: None,
            cycle_start: None,
            cycle_end: None,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn cycle_start(&self) -> Option<Instant> {
        self.cycle_start
    }

    pub fn cycle_end(&self) -> Option<Instant> {
        self.cycle_end
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// Feeds one hand snapshot observed at `now`.
    pub fn observe(&mut self, hand: &LandmarkSnapshot, now: Instant) -> Decision {
        if let Some(decision) = self.watchdog(now) {
            return decision;
        }

        let c = self.classifier;
        match self.state {
            GestureState::Idle => {
                if c.is_all_fingers_open(hand) {
                    self.opened_at = Some(now);
                    self.advance(GestureState::Phase1Open);
                }
                Decision::Pending
            }
            GestureState::Phase1Open => {
                if c.is_thumb_folded_others_open(hand) {
                    self.cycle_start = Some(now);
                    self.advance(GestureState::Phase2ThumbFold);
                }
                Decision::Pending
            }
            GestureState::Phase2ThumbFold => {
                if c.is_all_folded_over_thumb(hand) {
                    self.advance(GestureState::Phase3AllFold);
                }
                Decision::Pending
            }
            GestureState::Phase3AllFold => {
                if c.is_thumb_folded_others_open(hand) {
                    self.cycle_end = Some(now);
                    self.advance(GestureState::Phase4ThumbFoldConfirm);
                    self.complete_cycle()
                } else {
                    Decision::Pending
                }
            }
            // Phase4 is resolved in the same call that enters it; reaching it
            // here means the cycle was never evaluated, so resolve it now.
            GestureState::Phase4ThumbFoldConfirm => self.complete_cycle(),
        }
    }

    /// Advances time without a hand in view. Only the watchdog can act.
    pub fn tick(&mut self, now: Instant) -> Decision {
        self.watchdog(now).unwrap_or(Decision::Pending)
    }

    /// Drops any in-flight cycle.
    pub fn reset(&mut self) {
        self.state = GestureState::Idle;
        self.opened_at = None;
        self.cycle_start = None;
        self.cycle_end = None;
    }

    fn advance(&mut self, next: GestureState) {
        log::debug!("sos gesture: {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
    }

    fn watchdog(&mut self, now: Instant) -> Option<Decision> {
        if self.state == GestureState::Idle {
            return None;
        }
        let reference = self.cycle_start.or(self.opened_at)?;
        if now.saturating_duration_since(reference) <= self.config.confirm_window {
            return None;
        }
        let phase = self.state;
        log::info!(
            "sos gesture cycle expired in {} after {:?}",
            phase.as_str(),
            now.saturating_duration_since(reference)
        );
        self.reset();
        Some(Decision::Reset(ResetCause::Stale { phase }))
    }

    fn complete_cycle(&mut self) -> Decision {
        let elapsed = match (self.cycle_start, self.cycle_end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::MAX,
        };
        self.reset();
        if elapsed < self.config.confirm_window {
            log::info!("sos gesture confirmed in {:?}", elapsed);
            Decision::Confirmed { elapsed }
        } else {
            log::info!("sos gesture too slow ({:?}), discarded", elapsed);
            Decision::Reset(ResetCause::TooSlow { elapsed })
        }
    }
}

impl Default for GestureStateMachine {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}
