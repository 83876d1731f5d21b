mod common;

use common::{flagged, stages, with_handwriting, with_ocr};
use proptest::prelude::*;
use scan_triage::consensus::{Verdict, decide_with, weighted_score};
use scan_triage::evaluator::{ClassifierOutcome, FailureKind, StageId};
use scan_triage::rules::{Profile, RuleBook};

fn profile() -> impl Strategy<Value = Profile> {
    prop_oneof![Just(Profile::General), Just(Profile::ContentProfileB)]
}

fn classifier_outcome() -> impl Strategy<Value = ClassifierOutcome> {
    prop_oneof![
        Just(ClassifierOutcome::Printed),
        Just(ClassifierOutcome::Handwritten),
        Just(ClassifierOutcome::Timeout),
        Just(ClassifierOutcome::Unavailable),
    ]
}

fn hard_failure() -> impl Strategy<Value = (StageId, FailureKind)> {
    prop_oneof![
        Just((StageId::ImageQuality, FailureKind::LowResolution)),
        Just((StageId::ImageQuality, FailureKind::Brightness)),
        Just((StageId::ImageQuality, FailureKind::LowContrast)),
        Just((StageId::Perceptual, FailureKind::Corruption)),
        Just((StageId::TextExtraction, FailureKind::OcrUnreadable)),
    ]
}

proptest! {
    #[test]
    fn weighted_score_is_the_weighted_sum(
        iq in 0.0f64..=100.0,
        text in 0.0f64..=100.0,
        hw in 0.0f64..=100.0,
        perceptual in 0.0f64..=100.0,
        p in profile(),
    ) {
        let book = RuleBook::default();
        let rules = book.get(p);
        let w = rules.weights;
        let expected = iq * w.image_quality
            + text * w.text_extraction
            + hw * w.handwriting
            + perceptual * w.perceptual;
        let got = weighted_score(&stages(iq, text, hw, perceptual), rules);
        prop_assert!((got - expected).abs() < 1e-6);
    }

    #[test]
    fn hard_failures_always_reject(
        score in 0.0f64..=100.0,
        ocr in 0.0f64..=100.0,
        handwriting in 0.0f64..=100.0,
        (stage, kind) in hard_failure(),
        p in profile(),
        outcome in classifier_outcome(),
    ) {
        let book = RuleBook::default();
        let s = flagged(
            with_handwriting(with_ocr(stages(score, score, score, score), ocr), handwriting, 10.0),
            stage,
            kind,
        );
        let v = decide_with(0, &s, book.get(p), &mut || outcome);
        prop_assert_eq!(v.verdict, Verdict::Rejected);
        prop_assert!(v.resolved_critical_failures.contains(&kind));
    }

    #[test]
    fn any_surviving_failure_means_rejected(
        score in 0.0f64..=100.0,
        ocr in 0.0f64..=100.0,
        handwriting in 0.0f64..=100.0,
        spread in 0.0f64..=100.0,
        p in profile(),
        outcome in classifier_outcome(),
    ) {
        let book = RuleBook::default();
        let s = with_handwriting(with_ocr(stages(score, score, score, score), ocr), handwriting, spread);
        let v = decide_with(0, &s, book.get(p), &mut || outcome);
        if !v.resolved_critical_failures.is_empty() {
            prop_assert_eq!(v.verdict, Verdict::Rejected);
        }
    }

    #[test]
    fn decisions_are_reproducible(
        scores in proptest::array::uniform4(0.0f64..=100.0),
        ocr in 0.0f64..=100.0,
        handwriting in 0.0f64..=100.0,
        spread in 0.0f64..=100.0,
        p in profile(),
        outcome in classifier_outcome(),
    ) {
        let book = RuleBook::default();
        let [iq, text, hw, perceptual] = scores;
        let s = with_handwriting(with_ocr(stages(iq, text, hw, perceptual), ocr), handwriting, spread);
        let first = decide_with(3, &s, book.get(p), &mut || outcome);
        let second = decide_with(3, &s, book.get(p), &mut || outcome);
        let a = serde_json::to_string(&first).unwrap();
        let b = serde_json::to_string(&second).unwrap();
        prop_assert_eq!(a, b);
    }
}
