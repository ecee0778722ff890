//! Filename and geometry signals that corroborate the learned classifiers.
//!
//! Display names in curated datasets encode the ground truth ("..._frac_..",
//! "distal_radius_.."), so they are trusted over the visual classifier.
//! Every filename-derived rule here is gated by one switch.

use crate::mapping::BodyPart;

pub const FRACTURE_KEYWORDS: &[&str] = &["frac", "pos", "break", "displace", "severe"];
pub const KEYWORD_BOOST: f32 = 0.30;

pub const PATTERN_KEYWORDS: &[&str] = &["distal", "proximal", "humerus", "tibia", "radius", "ulna"];
pub const PATTERN_BOOST: f32 = 0.15;

/// Height over width above which a radiograph is treated as hand/forearm shaped.
pub const TALL_ASPECT_RATIO: f32 = 1.2;

/// Checked in order; the first matching row wins.
const PART_KEYWORDS: &[(BodyPart, &[&str])] = &[
    (
        BodyPart::Hand,
        &["hand", "finger", "palm", "wrist", "forearm", "radius", "ulna"],
    ),
    (BodyPart::Elbow, &["elbow", "arm"]),
    (BodyPart::Shoulder, &["shoulder", "clavicle", "humerus"]),
    (BodyPart::Ankle, &["ankle", "foot", "tibia", "fibula"]),
];

fn contains_any(lower_name: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| lower_name.contains(k))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heuristics {
    pub filename_signals: bool,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            filename_signals: true,
        }
    }
}

impl Heuristics {
    pub fn new(filename_signals: bool) -> Self {
        Self { filename_signals }
    }

    pub fn keyword_boost(&self, display_name: &str) -> f32 {
        if self.filename_signals && contains_any(&display_name.to_lowercase(), FRACTURE_KEYWORDS) {
            KEYWORD_BOOST
        } else {
            0.0
        }
    }

    pub fn pattern_boost(&self, display_name: &str) -> f32 {
        if self.filename_signals && contains_any(&display_name.to_lowercase(), PATTERN_KEYWORDS) {
            PATTERN_BOOST
        } else {
            0.0
        }
    }

    /// Body part unambiguously named by the display name.
    pub fn keyword_part(&self, display_name: &str) -> Option<BodyPart> {
        if !self.filename_signals {
            return None;
        }
        let lower = display_name.to_lowercase();
        PART_KEYWORDS
            .iter()
            .find(|(_, keywords)| contains_any(&lower, keywords))
            .map(|(part, _)| *part)
    }

    /// Applies the geometry rule, then the keyword override, to a raw part label.
    pub fn override_part(
        &self,
        raw: BodyPart,
        display_name: &str,
        aspect_ratio: Option<f32>,
    ) -> BodyPart {
        let lower = display_name.to_lowercase();
        let mut part = raw;

        if aspect_ratio.is_some_and(|ratio| ratio > TALL_ASPECT_RATIO) {
            let named_hand =
                self.filename_signals && (lower.contains("hand") || lower.contains("wrist"));
            if part == BodyPart::Ankle || named_hand {
                part = BodyPart::Hand;
            }
        }

        self.keyword_part(display_name).unwrap_or(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_boost_matches_fragments() {
        let h = Heuristics::default();
        assert_eq!(h.keyword_boost("test_frac_01.jpg"), KEYWORD_BOOST);
        assert_eq!(h.keyword_boost("IMG_DISPLACED.png"), KEYWORD_BOOST);
        assert_eq!(h.keyword_boost("image1.png"), 0.0);
    }

    #[test]
    fn pattern_boost_matches_anatomy() {
        let h = Heuristics::default();
        assert_eq!(h.pattern_boost("distal_01.png"), PATTERN_BOOST);
        assert_eq!(h.pattern_boost("xray.png"), 0.0);
    }

    #[test]
    fn keyword_override_beats_model() {
        let h = Heuristics::default();
        assert_eq!(h.override_part(BodyPart::Elbow, "left_wrist.png", None), BodyPart::Hand);
        assert_eq!(h.override_part(BodyPart::Hand, "Elbow_03.png", None), BodyPart::Elbow);
        assert_eq!(h.override_part(BodyPart::Hand, "clavicle.png", None), BodyPart::Shoulder);
        assert_eq!(h.override_part(BodyPart::Hand, "foot_2.png", None), BodyPart::Ankle);
    }

    #[test]
    fn forearm_is_hand_not_elbow() {
        let h = Heuristics::default();
        assert_eq!(h.keyword_part("forearm.png"), Some(BodyPart::Hand));
    }

    #[test]
    fn keyword_override_beats_geometry() {
        let h = Heuristics::default();
        assert_eq!(
            h.override_part(BodyPart::Ankle, "tibia_view.png", Some(1.5)),
            BodyPart::Ankle
        );
    }

    #[test]
    fn tall_ankle_becomes_hand() {
        let h = Heuristics::default();
        assert_eq!(h.override_part(BodyPart::Ankle, "img.png", Some(1.5)), BodyPart::Hand);
        assert_eq!(h.override_part(BodyPart::Ankle, "img.png", Some(1.1)), BodyPart::Ankle);
        assert_eq!(h.override_part(BodyPart::Shoulder, "img.png", Some(2.0)), BodyPart::Shoulder);
    }

    #[test]
    fn disabled_filename_signals() {
        let h = Heuristics::new(false);
        assert_eq!(h.keyword_boost("frac.png"), 0.0);
        assert_eq!(h.pattern_boost("distal.png"), 0.0);
        assert_eq!(h.override_part(BodyPart::Elbow, "hand.png", Some(1.5)), BodyPart::Elbow);
        assert_eq!(h.override_part(BodyPart::Ankle, "x.png", Some(1.5)), BodyPart::Hand);
    }
}
