//! Stateless hand-shape predicates.
//!
//! Every predicate is a pure function of one snapshot. Comparisons against NaN
//! are false in IEEE arithmetic, and each predicate is a conjunction of strict
//! comparisons, so degenerate input evaluates to `false` instead of failing.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::landmarks::{LandmarkSnapshot, FINGER_TIP_PIP, THUMB_IP, THUMB_MCP, THUMB_TIP};

/// Hand shapes the SOS signal is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeClassification {
    /// All five fingers extended.
    AllFingersOpen,
    /// Thumb tucked across the palm, the other four extended.
    ThumbFoldedOthersOpen,
    /// Four fingers curled down over the tucked thumb.
    AllFoldedOverThumb,
    None,
}

impl ShapeClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllFingersOpen => "all-fingers-open",
            Self::ThumbFoldedOthersOpen => "thumb-folded-others-open",
            Self::AllFoldedOverThumb => "all-folded-over-thumb",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ShapeClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the thumb is checked for the open-hand shape.
///
/// The deployed detector compared only thumb tip against thumb IP vertically;
/// its MCP operand was a bare coordinate and never constrained anything.
/// `TipAboveIp` reproduces that. `Extended` requires the whole thumb chain to
/// point upward (tip above IP above MCP).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbCheck {
    #[default]
    TipAboveIp,
    Extended,
}

impl FromStr for ThumbCheck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "tip_above_ip" | "tip-above-ip" | "observed" => Ok(Self::TipAboveIp),
            "extended" | "strict" => Ok(Self::Extended),
            other => Err(anyhow::anyhow!(
                "unknown thumb check '{}': expected 'tip_above_ip' or 'extended'",
                other
            )),
        }
    }
}

impl fmt::Display for ThumbCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TipAboveIp => write!(f, "tip_above_ip"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

/// Shape predicates parameterised only by the thumb policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoseClassifier {
    thumb_check: ThumbCheck,
}

impl PoseClassifier {
    pub fn new(thumb_check: ThumbCheck) -> Self {
        Self { thumb_check }
    }

    pub fn thumb_check(&self) -> ThumbCheck {
        self.thumb_check
    }

    /// Four fingers extended and the thumb raised.
    pub fn is_all_fingers_open(&self, hand: &LandmarkSnapshot) -> bool {
        let tip = hand.point(THUMB_TIP);
        let ip = hand.point(THUMB_IP);
        let thumb_up = match self.thumb_check {
            ThumbCheck::TipAboveIp => tip.y < ip.y,
            ThumbCheck::Extended => tip.y < ip.y && ip.y < hand.point(THUMB_MCP).y,
        };
        thumb_up && four_fingers_extended(hand)
    }

    /// Thumb tucked inward horizontally while the four fingers stay extended.
    pub fn is_thumb_folded_others_open(&self, hand: &LandmarkSnapshot) -> bool {
        let tip = hand.point(THUMB_TIP);
        let ip = hand.point(THUMB_IP);
        let mcp = hand.point(THUMB_MCP);
        tip.x > ip.x && ip.x > mcp.x && four_fingers_extended(hand)
    }

    /// Four fingers curled down (tips below their PIP joints).
    pub fn is_all_folded_over_thumb(&self, hand: &LandmarkSnapshot) -> bool {
        FINGER_TIP_PIP
            .iter()
            .all(|&(tip, pip)| hand.point(tip).y > hand.point(pip).y)
    }

    /// Single label for logging and overlays. The thumb-folded shape is checked
    /// before the open hand because it is the more specific of the two.
    pub fn classify(&self, hand: &LandmarkSnapshot) -> ShapeClassification {
        if self.is_all_folded_over_thumb(hand) {
            ShapeClassification::AllFoldedOverThumb
        } else if self.is_thumb_folded_others_open(hand) {
            ShapeClassification::ThumbFoldedOthersOpen
        } else if self.is_all_fingers_open(hand) {
            ShapeClassification::AllFingersOpen
        } else {
            ShapeClassification::None
        }
    }
}

fn four_fingers_extended(hand: &LandmarkSnapshot) -> bool {
    FINGER_TIP_PIP
        .iter()
        .all(|&(tip, pip)| hand.point(tip).y < hand.point(pip).y)
}

/// Synthetic hands used by tests across the crate.
#[doc(hidden)]
pub mod fixtures {
    use crate::landmarks::*;

    fn base() -> [Landmark; LANDMARK_COUNT] {
        [Landmark::new(0.5, 0.5, 0.0); LANDMARK_COUNT]
    }

    fn fingers(points: &mut [Landmark; LANDMARK_COUNT], extended: bool) {
        for (i, &(tip, pip)) in FINGER_TIP_PIP.iter().enumerate() {
            let x = 0.40 + 0.05 * i as f32;
            points[pip] = Landmark::new(x, 0.50, 0.0);
            points[tip] = Landmark::new(x, if extended { 0.30 } else { 0.60 }, 0.0);
        }
    }

    /// Open palm: every tip above its PIP, thumb pointing up but splayed outward.
    pub fn open_palm() -> LandmarkSnapshot {
        let mut p = base();
        fingers(&mut p, true);
        p[THUMB_MCP] = Landmark::new(0.30, 0.70, 0.0);
        p[THUMB_IP] = Landmark::new(0.25, 0.60, 0.0);
        p[THUMB_TIP] = Landmark::new(0.20, 0.50, 0.0);
        LandmarkSnapshot::new(p)
    }

    /// Thumb tucked across the palm (x increasing tip-ward), fingers extended.
    pub fn thumb_tucked() -> LandmarkSnapshot {
        let mut p = base();
        fingers(&mut p, true);
        p[THUMB_MCP] = Landmark::new(0.30, 0.65, 0.0);
        p[THUMB_IP] = Landmark::new(0.38, 0.66, 0.0);
        p[THUMB_TIP] = Landmark::new(0.46, 0.67, 0.0);
        LandmarkSnapshot::new(p)
    }

    /// Fist closed over the tucked thumb.
    pub fn fist_over_thumb() -> LandmarkSnapshot {
        let mut p = base();
        fingers(&mut p, false);
        p[THUMB_MCP] = Landmark::new(0.30, 0.65, 0.0);
        p[THUMB_IP] = Landmark::new(0.38, 0.66, 0.0);
        p[THUMB_TIP] = Landmark::new(0.46, 0.67, 0.0);
        LandmarkSnapshot::new(p)
    }

    /// Fingers half raised: matches none of the shapes.
    pub fn relaxed() -> LandmarkSnapshot {
        let mut p = base();
        for &(tip, pip) in FINGER_TIP_PIP.iter() {
            p[pip] = Landmark::new(0.45, 0.50, 0.0);
            p[tip] = Landmark::new(0.45, 0.50, 0.0);
        }
        LandmarkSnapshot::new(p)
    }
}
