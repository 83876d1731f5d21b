//! Threshold bundles the decision engine runs under.
//!
//! Two named instances exist: [`RuleSet::general`] for ordinary documents and
//! [`RuleSet::content_profile_b`], a more lenient profile for the specialized
//! document type the router detects. Both are plain values: built once from
//! configuration, validated, then shared read-only.

use crate::evaluator::StageId;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

const WEIGHT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    General,
    ContentProfileB,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "general" => Ok(Profile::General),
            "content_profile_b" | "b" => Ok(Profile::ContentProfileB),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::General => f.write_str("general"),
            Profile::ContentProfileB => f.write_str("content_profile_b"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageWeights {
    pub image_quality: f64,
    pub text_extraction: f64,
    pub handwriting: f64,
    pub perceptual: f64,
}

impl StageWeights {
    pub fn get(&self, id: StageId) -> f64 {
        match id {
            StageId::ImageQuality => self.image_quality,
            StageId::TextExtraction => self.text_extraction,
            StageId::Handwriting => self.handwriting,
            StageId::Perceptual => self.perceptual,
        }
    }

    pub fn sum(&self) -> f64 {
        self.image_quality + self.text_extraction + self.handwriting + self.perceptual
    }
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            image_quality: 0.35,
            text_extraction: 0.40,
            handwriting: 0.20,
            perceptual: 0.05,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RuleSetError {
    #[error("rule set configured under {slot} declares profile {declared}")]
    ProfileMismatch { slot: Profile, declared: Profile },
    #[error("{profile}: stage weights sum to {sum}, expected 1.0")]
    WeightSum { profile: Profile, sum: f64 },
    #[error("{profile}: weight for {stage:?} is negative ({value})")]
    NegativeWeight {
        profile: Profile,
        stage: StageId,
        value: f64,
    },
    #[error("{profile}: {field} must lie in [0, 100], got {value}")]
    OutOfRange {
        profile: Profile,
        field: &'static str,
        value: f64,
    },
    #[error("{profile}: {low_field} ({low}) must not exceed {high_field} ({high})")]
    Inverted {
        profile: Profile,
        low_field: &'static str,
        low: f64,
        high_field: &'static str,
        high: f64,
    },
}

/// Every threshold the engine consults. Percentages and scores are on a
/// 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub profile: Profile,

    // Raw critical thresholds.
    pub min_width: f64,
    pub min_height: f64,
    pub brightness_min: f64,
    pub brightness_max: f64,
    pub contrast_floor: f64,
    pub ocr_floor: f64,
    pub blur_floor: f64,
    pub handwriting_floor: f64,
    pub handwriting_spread_floor: f64,
    pub handwriting_spread_regions: f64,

    // Overrides.
    pub blur_override_ocr_floor: f64,
    pub blur_extreme_floor: f64,
    pub signature_low: f64,
    pub signature_high: f64,
    pub signature_spread_cap: f64,
    pub signature_override_ocr_floor: f64,
    pub readability_floor: f64,
    pub trust_ocr_floor: f64,
    pub ambiguity_low: f64,
    pub ambiguity_high: f64,

    // Verdict rules.
    pub ocr_high_floor: f64,
    pub lenient_high_score: f64,
    pub ocr_mid_floor: f64,
    pub lenient_mid_score: f64,
    pub ambiguity_handwriting_floor: f64,
    pub ambiguity_ocr_floor: f64,
    pub accept_score: f64,
    /// `None` means there is no review band: below `accept_score` is rejected.
    #[serde(default)]
    pub review_score: Option<f64>,

    pub weights: StageWeights,
}

impl RuleSet {
    /// Built-in thresholds for ordinary documents.
    ///
    /// With these values the signature suppression override is only reached
    /// through a handwriting failure the evaluator reports itself. Step 1
    /// marks a share in `[signature_low, signature_high)` critical only when
    /// the region spread exceeds `handwriting_spread_regions` (50), while the
    /// override needs a spread below `signature_spread_cap` (25).
    pub fn general() -> Self {
        Self {
            profile: Profile::General,
            weights: StageWeights::default(),
            min_width: 400.0,
            min_height: 300.0,
            brightness_min: 15.0,
            brightness_max: 250.0,
            contrast_floor: 15.0,
            ocr_floor: 25.0,
            blur_floor: 30.0,
            handwriting_floor: 40.0,
            handwriting_spread_floor: 25.0,
            handwriting_spread_regions: 50.0,
            blur_override_ocr_floor: 50.0,
            blur_extreme_floor: 15.0,
            signature_low: 15.0,
            signature_high: 30.0,
            signature_spread_cap: 25.0,
            signature_override_ocr_floor: 30.0,
            readability_floor: 50.0,
            trust_ocr_floor: 80.0,
            ambiguity_low: 50.0,
            ambiguity_high: 80.0,
            ocr_high_floor: 80.0,
            lenient_high_score: 55.0,
            ocr_mid_floor: 60.0,
            lenient_mid_score: 60.0,
            ambiguity_handwriting_floor: 25.0,
            ambiguity_ocr_floor: 75.0,
            accept_score: 70.0,
            review_score: Some(50.0),
        }
    }

    pub fn content_profile_b() -> Self {
        Self {
            profile: Profile::ContentProfileB,
            trust_ocr_floor: 70.0,
            ambiguity_high: 70.0,
            ocr_high_floor: 70.0,
            lenient_high_score: 55.0,
            ocr_mid_floor: 30.0,
            lenient_mid_score: 50.0,
            accept_score: 50.0,
            review_score: None,
            ..Self::general()
        }
    }

    pub fn weight(&self, id: StageId) -> f64 {
        self.weights.get(id)
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        let profile = self.profile;
        for id in StageId::ALL {
            let value = self.weights.get(id);
            if value < 0.0 || !value.is_finite() {
                return Err(RuleSetError::NegativeWeight {
                    profile,
                    stage: id,
                    value,
                });
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RuleSetError::WeightSum { profile, sum });
        }

        let percentages = [
            ("ocr_floor", self.ocr_floor),
            ("blur_override_ocr_floor", self.blur_override_ocr_floor),
            ("signature_override_ocr_floor", self.signature_override_ocr_floor),
            ("readability_floor", self.readability_floor),
            ("trust_ocr_floor", self.trust_ocr_floor),
            ("ambiguity_low", self.ambiguity_low),
            ("ambiguity_high", self.ambiguity_high),
            ("ocr_high_floor", self.ocr_high_floor),
            ("ocr_mid_floor", self.ocr_mid_floor),
            ("accept_score", self.accept_score),
            ("lenient_high_score", self.lenient_high_score),
            ("lenient_mid_score", self.lenient_mid_score),
            ("handwriting_floor", self.handwriting_floor),
            ("signature_low", self.signature_low),
            ("signature_high", self.signature_high),
        ];
        for (field, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(RuleSetError::OutOfRange {
                    profile,
                    field,
                    value,
                });
            }
        }

        let ordered = [
            ("signature_low", self.signature_low, "signature_high", self.signature_high),
            ("ambiguity_low", self.ambiguity_low, "ambiguity_high", self.ambiguity_high),
            ("brightness_min", self.brightness_min, "brightness_max", self.brightness_max),
            ("blur_extreme_floor", self.blur_extreme_floor, "blur_floor", self.blur_floor),
        ];
        for (low_field, low, high_field, high) in ordered {
            if low > high {
                return Err(RuleSetError::Inverted {
                    profile,
                    low_field,
                    low,
                    high_field,
                    high,
                });
            }
        }
        if let Some(review) = self.review_score {
            if review > self.accept_score {
                return Err(RuleSetError::Inverted {
                    profile,
                    low_field: "review_score",
                    low: review,
                    high_field: "accept_score",
                    high: self.accept_score,
                });
            }
        }
        Ok(())
    }
}

/// Both named rule sets, looked up by profile. Each configured table is laid
/// over the built-in values for its own slot, so a table may name only the
/// keys it changes and a missing table keeps every default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleBook {
    pub general: RuleSet,
    pub content_profile_b: RuleSet,
}

impl RuleBook {
    pub fn get(&self, profile: Profile) -> &RuleSet {
        match profile {
            Profile::General => &self.general,
            Profile::ContentProfileB => &self.content_profile_b,
        }
    }

    pub fn validate(&self) -> Result<(), RuleSetError> {
        for slot in [Profile::General, Profile::ContentProfileB] {
            let rules = self.get(slot);
            if rules.profile != slot {
                return Err(RuleSetError::ProfileMismatch {
                    slot,
                    declared: rules.profile,
                });
            }
            rules.validate()?;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for RuleBook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Slots {
            #[serde(default)]
            general: Option<serde_json::Value>,
            #[serde(default)]
            content_profile_b: Option<serde_json::Value>,
        }

        let slots = Slots::deserialize(deserializer)?;
        let general = overlay(RuleSet::general(), slots.general)
            .map_err(|e| D::Error::custom(format!("rules.general: {e}")))?;
        let content_profile_b = overlay(RuleSet::content_profile_b(), slots.content_profile_b)
            .map_err(|e| D::Error::custom(format!("rules.content_profile_b: {e}")))?;
        Ok(Self {
            general,
            content_profile_b,
        })
    }
}

fn overlay(base: RuleSet, patch: Option<serde_json::Value>) -> serde_json::Result<RuleSet> {
    let Some(patch) = patch else {
        return Ok(base);
    };
    let mut merged = serde_json::to_value(&base)?;
    merge(&mut merged, patch);
    serde_json::from_value(merged)
}

fn merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self {
            general: RuleSet::general(),
            content_profile_b: RuleSet::content_profile_b(),
        }
    }
}
