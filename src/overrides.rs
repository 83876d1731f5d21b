//! Cross-stage overrides: an ordered table of predicates, each able to
//! downgrade one raw critical failure to a warning.
//!
//! The table is walked in priority order. When an entry downgrades something
//! the walk restarts so earlier entries see the smaller failure set; every
//! entry fires at most once, so the walk always terminates.

use crate::{
    evaluator::{ClassifierOutcome, FailureKind, WarningKind},
    rules::RuleSet,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideTag {
    BlurSuppressed,
    SignatureSuppressed,
    BlurryButReadable,
    TrustedOcr,
    ClassifierPrinted,
    ClassifierHandwritten,
    ClassifierTimeout,
    ClassifierUnavailable,
}

impl OverrideTag {
    pub fn describe(self) -> &'static str {
        match self {
            OverrideTag::BlurSuppressed => "blur downgraded: text is still readable",
            OverrideTag::SignatureSuppressed => {
                "handwriting downgraded: small compact area (signature or stamp)"
            }
            OverrideTag::BlurryButReadable => {
                "handwriting downgraded: blur artifacts on a readable page"
            }
            OverrideTag::TrustedOcr => "handwriting downgraded: high OCR confidence",
            OverrideTag::ClassifierPrinted => "classifier confirmed printed text",
            OverrideTag::ClassifierHandwritten => "classifier confirmed handwritten text",
            OverrideTag::ClassifierTimeout => "classifier timed out; handwriting kept",
            OverrideTag::ClassifierUnavailable => "classifier unavailable; handwriting kept",
        }
    }
}

/// Measurements the overrides and verdict rules read across stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub ocr_confidence: Option<f64>,
    pub handwriting_pct: Option<f64>,
    pub region_spread: Option<f64>,
    pub blur_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub critical: BTreeSet<FailureKind>,
    pub downgraded: BTreeSet<WarningKind>,
    pub applied: Vec<OverrideTag>,
}

struct Ctx<'a> {
    raw: &'a BTreeSet<FailureKind>,
    current: &'a BTreeSet<FailureKind>,
    signals: &'a Signals,
    rules: &'a RuleSet,
}

enum Effect {
    Downgrade(OverrideTag),
    TieBreak,
}

struct Override {
    name: &'static str,
    target: FailureKind,
    applies: fn(&Ctx<'_>) -> bool,
    effect: Effect,
}

const CHAIN: [Override; 5] = [
    Override {
        name: "blur_suppression",
        target: FailureKind::Blur,
        applies: blur_suppression,
        effect: Effect::Downgrade(OverrideTag::BlurSuppressed),
    },
    Override {
        name: "signature_suppression",
        target: FailureKind::Handwriting,
        applies: signature_suppression,
        effect: Effect::Downgrade(OverrideTag::SignatureSuppressed),
    },
    Override {
        name: "blurry_but_readable",
        target: FailureKind::Handwriting,
        applies: blurry_but_readable,
        effect: Effect::Downgrade(OverrideTag::BlurryButReadable),
    },
    Override {
        name: "trusted_ocr",
        target: FailureKind::Handwriting,
        applies: trusted_ocr,
        effect: Effect::Downgrade(OverrideTag::TrustedOcr),
    },
    Override {
        name: "classifier_tie_break",
        target: FailureKind::Handwriting,
        applies: in_ambiguity_band,
        effect: Effect::TieBreak,
    },
];

fn at_least(value: Option<f64>, floor: f64) -> bool {
    value.is_some_and(|v| v >= floor)
}

fn below(value: Option<f64>, cap: f64) -> bool {
    value.is_some_and(|v| v < cap)
}

fn blur_suppression(ctx: &Ctx<'_>) -> bool {
    ctx.current.len() == 1
        && at_least(ctx.signals.ocr_confidence, ctx.rules.blur_override_ocr_floor)
        && !below(ctx.signals.blur_score, ctx.rules.blur_extreme_floor)
}

fn signature_suppression(ctx: &Ctx<'_>) -> bool {
    let r = ctx.rules;
    at_least(ctx.signals.handwriting_pct, r.signature_low)
        && below(ctx.signals.handwriting_pct, r.signature_high)
        && below(ctx.signals.region_spread, r.signature_spread_cap)
        && at_least(ctx.signals.ocr_confidence, r.signature_override_ocr_floor)
}

fn blurry_but_readable(ctx: &Ctx<'_>) -> bool {
    ctx.raw.contains(&FailureKind::Blur)
        && at_least(ctx.signals.ocr_confidence, ctx.rules.readability_floor)
}

fn trusted_ocr(ctx: &Ctx<'_>) -> bool {
    at_least(ctx.signals.ocr_confidence, ctx.rules.trust_ocr_floor)
}

fn in_ambiguity_band(ctx: &Ctx<'_>) -> bool {
    at_least(ctx.signals.ocr_confidence, ctx.rules.ambiguity_low)
        && below(ctx.signals.ocr_confidence, ctx.rules.ambiguity_high)
}

fn warning_for(kind: FailureKind) -> WarningKind {
    match kind {
        FailureKind::Blur => WarningKind::Blur,
        _ => WarningKind::Handwriting,
    }
}

/// Resolves `raw` against the override table. `tie_break` is called at most
/// once, and only when the classifier entry's condition holds.
pub fn resolve(
    raw: &BTreeSet<FailureKind>,
    signals: &Signals,
    rules: &RuleSet,
    tie_break: &mut dyn FnMut() -> ClassifierOutcome,
) -> Resolution {
    let mut current = raw.clone();
    let mut downgraded = BTreeSet::new();
    let mut applied = Vec::new();
    let mut fired = [false; CHAIN.len()];

    'walk: loop {
        for (i, entry) in CHAIN.iter().enumerate() {
            if fired[i] || !current.contains(&entry.target) {
                continue;
            }
            let ctx = Ctx {
                raw,
                current: &current,
                signals,
                rules,
            };
            if !(entry.applies)(&ctx) {
                continue;
            }
            fired[i] = true;

            let downgrade = match entry.effect {
                Effect::Downgrade(tag) => {
                    applied.push(tag);
                    true
                }
                Effect::TieBreak => {
                    let outcome = tie_break();
                    applied.push(match outcome {
                        ClassifierOutcome::Printed => OverrideTag::ClassifierPrinted,
                        ClassifierOutcome::Handwritten => OverrideTag::ClassifierHandwritten,
                        ClassifierOutcome::Timeout => OverrideTag::ClassifierTimeout,
                        ClassifierOutcome::Unavailable => OverrideTag::ClassifierUnavailable,
                    });
                    outcome == ClassifierOutcome::Printed
                }
            };
            debug!("override {} fired downgrade={}", entry.name, downgrade);

            if downgrade {
                current.remove(&entry.target);
                downgraded.insert(warning_for(entry.target));
                continue 'walk;
            }
        }
        break;
    }

    Resolution {
        critical: current,
        downgraded,
        applied,
    }
}
