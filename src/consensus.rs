//! Per-page decision: combines the four stage results under a [`RuleSet`]
//! into one verdict.
//!
//! 1. Raw critical failures from each stage's metrics, plus what the
//!    evaluators flagged themselves.
//! 2. Cross-stage overrides ([`crate::overrides`]).
//! 3. Weighted score over the stage scores.
//! 4. Verdict rules, first match wins.

use crate::{
    evaluator::{
        ClassifierOutcome, FailureKind, PageImage, PrintClassifier, StageId, StageResult,
        StageSet, WarningKind, classify_with_deadline, metric,
    },
    overrides::{self, OverrideTag, Signals},
    rules::RuleSet,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    Rejected,
    FlagForReview,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Accepted => "ACCEPTED",
            Verdict::Rejected => "REJECTED",
            Verdict::FlagForReview => "FLAG_FOR_REVIEW",
        })
    }
}

/// Which verdict rule produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// (a) a critical failure survived the overrides.
    SurvivingFailure,
    /// (b) high OCR confidence with a lenient score.
    HighOcr,
    /// (c) moderate OCR confidence with a moderate score.
    ModerateOcr,
    /// (d) handwriting and OCR disagree.
    ConflictingSignals,
    /// (e) score at or above the accept threshold.
    AcceptScore,
    /// (f) score within the review band.
    ReviewBand,
    /// (g) everything else.
    BelowThreshold,
}

impl DecisionRule {
    pub fn letter(self) -> char {
        match self {
            DecisionRule::SurvivingFailure => 'a',
            DecisionRule::HighOcr => 'b',
            DecisionRule::ModerateOcr => 'c',
            DecisionRule::ConflictingSignals => 'd',
            DecisionRule::AcceptScore => 'e',
            DecisionRule::ReviewBand => 'f',
            DecisionRule::BelowThreshold => 'g',
        }
    }
}

/// Scores at or above this get `High` when rule (b) accepted the page.
const HIGH_OCR_PRIORITY_SCORE: f64 = 75.0;
/// Scores at or above this get `High` under rules (c) and (e).
const HIGH_PRIORITY_SCORE: f64 = 85.0;

/// Work-queue tier attached to a verdict. Rejected pages carry `N/A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    Normal,
    Medium,
    Low,
    #[default]
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Priority {
    pub fn derive(decided_by: DecisionRule, weighted_score: f64) -> Self {
        let tiered = |cut: f64| {
            if weighted_score >= cut {
                Priority::High
            } else {
                Priority::Normal
            }
        };
        match decided_by {
            DecisionRule::HighOcr => tiered(HIGH_OCR_PRIORITY_SCORE),
            DecisionRule::ModerateOcr | DecisionRule::AcceptScore => tiered(HIGH_PRIORITY_SCORE),
            DecisionRule::ConflictingSignals => Priority::Medium,
            DecisionRule::ReviewBand => Priority::Low,
            DecisionRule::SurvivingFailure | DecisionRule::BelowThreshold => {
                Priority::NotApplicable
            }
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "High",
            Priority::Normal => "Normal",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
            Priority::NotApplicable => "N/A",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageVerdict {
    pub page_index: usize,
    pub weighted_score: f64,
    pub verdict: Verdict,
    pub decided_by: DecisionRule,
    #[serde(default)]
    pub priority: Priority,
    pub resolved_critical_failures: BTreeSet<FailureKind>,
    pub resolved_warnings: BTreeSet<WarningKind>,
    pub overrides_applied: Vec<OverrideTag>,
    pub ocr_confidence: Option<f64>,
    pub handwriting_percentage: Option<f64>,
    /// Stages whose evaluator reported an error.
    #[serde(default)]
    pub failed_stages: Vec<StageId>,
}

/// Step 1: raw critical failures, before any override.
pub fn raw_failures(stages: &StageSet<StageResult>, rules: &RuleSet) -> BTreeSet<FailureKind> {
    let mut out = BTreeSet::new();
    for (_, res) in stages.iter() {
        out.extend(res.critical_failures.iter().copied());
        if res.is_failed() {
            out.insert(FailureKind::EvaluatorFailure);
        }
    }

    let image = &stages.image_quality;
    let too_small = image.metric(metric::WIDTH).is_some_and(|w| w < rules.min_width)
        || image.metric(metric::HEIGHT).is_some_and(|h| h < rules.min_height);
    if too_small {
        out.insert(FailureKind::LowResolution);
    }
    if image.metric(metric::BLUR_SCORE).is_some_and(|b| b < rules.blur_floor) {
        out.insert(FailureKind::Blur);
    }
    if image
        .metric(metric::BRIGHTNESS)
        .is_some_and(|b| b < rules.brightness_min || b > rules.brightness_max)
    {
        out.insert(FailureKind::Brightness);
    }
    if image.metric(metric::CONTRAST).is_some_and(|c| c < rules.contrast_floor) {
        out.insert(FailureKind::LowContrast);
    }

    if stages
        .text_extraction
        .metric(metric::OCR_CONFIDENCE)
        .is_some_and(|c| c < rules.ocr_floor)
    {
        out.insert(FailureKind::OcrUnreadable);
    }

    let hw = &stages.handwriting;
    if let Some(pct) = hw.metric(metric::HANDWRITING_PERCENTAGE) {
        let spread_out = hw
            .metric(metric::REGION_SPREAD)
            .is_some_and(|s| s > rules.handwriting_spread_regions);
        if pct >= rules.handwriting_floor || (spread_out && pct >= rules.handwriting_spread_floor)
        {
            out.insert(FailureKind::Handwriting);
        }
    }
    out
}

pub fn signals(stages: &StageSet<StageResult>) -> Signals {
    Signals {
        ocr_confidence: stages.text_extraction.metric(metric::OCR_CONFIDENCE),
        handwriting_pct: stages.handwriting.metric(metric::HANDWRITING_PERCENTAGE),
        region_spread: stages.handwriting.metric(metric::REGION_SPREAD),
        blur_score: stages.image_quality.metric(metric::BLUR_SCORE),
    }
}

/// Step 3: sum of stage score times stage weight. A failed stage counts as 0.
pub fn weighted_score(stages: &StageSet<StageResult>, rules: &RuleSet) -> f64 {
    stages
        .iter()
        .map(|(id, res)| res.effective_score() * rules.weight(id))
        .sum()
}

/// Step 4, first match wins.
pub fn verdict_rule(
    critical: &BTreeSet<FailureKind>,
    signals: &Signals,
    score: f64,
    rules: &RuleSet,
) -> (Verdict, DecisionRule) {
    if !critical.is_empty() {
        return (Verdict::Rejected, DecisionRule::SurvivingFailure);
    }
    let ocr_at_least = |floor: f64| signals.ocr_confidence.is_some_and(|c| c >= floor);

    if ocr_at_least(rules.ocr_high_floor) && score >= rules.lenient_high_score {
        return (Verdict::Accepted, DecisionRule::HighOcr);
    }
    if ocr_at_least(rules.ocr_mid_floor) && score >= rules.lenient_mid_score {
        return (Verdict::Accepted, DecisionRule::ModerateOcr);
    }
    let handwriting_heavy = signals
        .handwriting_pct
        .is_some_and(|p| p > rules.ambiguity_handwriting_floor);
    let ocr_strong = signals
        .ocr_confidence
        .is_some_and(|c| c > rules.ambiguity_ocr_floor);
    if handwriting_heavy && ocr_strong {
        return (Verdict::FlagForReview, DecisionRule::ConflictingSignals);
    }
    if score >= rules.accept_score {
        return (Verdict::Accepted, DecisionRule::AcceptScore);
    }
    match rules.review_score {
        Some(review) if score >= review => (Verdict::FlagForReview, DecisionRule::ReviewBand),
        _ => (Verdict::Rejected, DecisionRule::BelowThreshold),
    }
}

/// Full decision for one page. `tie_break` is consulted only when the
/// classifier override's condition holds.
pub fn decide_with(
    page_index: usize,
    stages: &StageSet<StageResult>,
    rules: &RuleSet,
    tie_break: &mut dyn FnMut() -> ClassifierOutcome,
) -> PageVerdict {
    let raw = raw_failures(stages, rules);
    let signals = signals(stages);
    let resolution = overrides::resolve(&raw, &signals, rules, tie_break);
    let weighted_score = weighted_score(stages, rules);
    let (verdict, decided_by) =
        verdict_rule(&resolution.critical, &signals, weighted_score, rules);
    let priority = Priority::derive(decided_by, weighted_score);

    let mut resolved_warnings: BTreeSet<WarningKind> = stages
        .iter()
        .flat_map(|(_, res)| res.warnings.iter().copied())
        .collect();
    resolved_warnings.extend(resolution.downgraded.iter().copied());

    let failed_stages: Vec<StageId> = stages
        .iter()
        .filter(|(_, res)| res.is_failed())
        .map(|(id, _)| id)
        .collect();

    debug!(
        "page {} raw={:?} resolved={:?} overrides={:?}",
        page_index, raw, resolution.critical, resolution.applied
    );
    info!(
        "page {} verdict={} rule={} priority={} score={:.2} profile={}",
        page_index,
        verdict,
        decided_by.letter(),
        priority,
        weighted_score,
        rules.profile
    );

    PageVerdict {
        page_index,
        weighted_score,
        verdict,
        decided_by,
        priority,
        resolved_critical_failures: resolution.critical,
        resolved_warnings,
        overrides_applied: resolution.applied,
        ocr_confidence: signals.ocr_confidence,
        handwriting_percentage: signals.handwriting_pct,
        failed_stages,
    }
}

/// Decision engine with an optional printed-vs-handwritten classifier.
#[derive(Clone)]
pub struct ConsensusEngine {
    classifier: Option<Arc<dyn PrintClassifier>>,
    timeout: Duration,
}

impl ConsensusEngine {
    pub fn new(classifier: Option<Arc<dyn PrintClassifier>>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
        }
    }

    pub fn without_classifier() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn decide(
        &self,
        page: &PageImage,
        stages: &StageSet<StageResult>,
        rules: &RuleSet,
    ) -> PageVerdict {
        let mut tie_break = || match &self.classifier {
            Some(classifier) => classify_with_deadline(classifier, page, self.timeout),
            None => ClassifierOutcome::Unavailable,
        };
        decide_with(page.index, stages, rules, &mut tie_break)
    }
}
