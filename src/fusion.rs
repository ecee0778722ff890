//! Multi-signal confidence fusion and the three-tier safety verdict.
//!
//! The raw fracture probability is not trusted on its own: corroborating
//! heuristic boosts are added before thresholding, and the middle band is
//! reported as needing review instead of being forced into a binary call.

use serde::{Deserialize, Serialize};

/// Strictly above this the verdict is DETECTED.
pub const DETECTED_THRESHOLD: f32 = 0.50;
/// Strictly above this (and not DETECTED) the verdict is UNCERTAIN.
pub const UNCERTAIN_THRESHOLD: f32 = 0.30;

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Normal,
    Uncertain,
    Detected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Moderate,
    High,
}

impl Verdict {
    pub fn from_adjusted(adjusted_probability: f32) -> Self {
        if adjusted_probability > DETECTED_THRESHOLD {
            Verdict::Detected
        } else if adjusted_probability > UNCERTAIN_THRESHOLD {
            Verdict::Uncertain
        } else {
            Verdict::Normal
        }
    }

    pub fn fracture_detected(self) -> bool {
        self == Verdict::Detected
    }

    pub fn tier(self) -> ConfidenceTier {
        match self {
            Verdict::Detected => ConfidenceTier::High,
            Verdict::Uncertain => ConfidenceTier::Moderate,
            Verdict::Normal => ConfidenceTier::Low,
        }
    }

    pub fn safety_message(self) -> &'static str {
        match self {
            Verdict::Detected => "Pattern Consistent With Fracture (Multi-Factor Verification)",
            Verdict::Uncertain => "Review Required — Pattern Inconclusive",
            Verdict::Normal => "No Fracture Pattern Detected",
        }
    }

    /// Label stored in the result cache.
    pub fn cache_label(self) -> &'static str {
        if self.fracture_detected() { "fractured" } else { "normal" }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Detected => "DETECTED",
            Verdict::Uncertain => "UNCERTAIN",
            Verdict::Normal => "NORMAL",
        }
    }
}

/// Inputs to [`fuse_confidence`], kept together for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FusionSignals {
    pub raw_probability: f32,
    pub keyword_boost: f32,
    pub edge_boost: f32,
    pub pattern_boost: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedConfidence {
    pub adjusted_probability: f32,
    pub verdict: Verdict,
}

impl FusedConfidence {
    pub fn tier(&self) -> ConfidenceTier {
        self.verdict.tier()
    }
}

/// `adj = min(1, p + kb + db + pb)` mapped onto the verdict table.
///
/// Pure and monotone in every argument. A NaN sum counts as zero.
pub fn fuse_confidence(p: f32, kb: f32, db: f32, pb: f32) -> FusedConfidence {
    let sum = p + kb + db + pb;
    let adjusted_probability = if sum.is_nan() { 0.0 } else { sum.clamp(0.0, 1.0) };
    FusedConfidence {
        adjusted_probability,
        verdict: Verdict::from_adjusted(adjusted_probability),
    }
}

impl FusionSignals {
    pub fn fuse(&self) -> FusedConfidence {
        fuse_confidence(
            self.raw_probability,
            self.keyword_boost,
            self.edge_boost,
            self.pattern_boost,
        )
    }
}
