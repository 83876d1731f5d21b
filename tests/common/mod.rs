#![allow(dead_code)]

use scan_triage::evaluator::{FailureKind, StageId, StageResult, StageSet, metric};

/// A clean page: good geometry and exposure, no handwriting, no OCR reading.
pub fn stages(iq: f64, text: f64, hw: f64, perceptual: f64) -> StageSet<StageResult> {
    StageSet {
        image_quality: StageResult::new(StageId::ImageQuality, iq)
            .with_metric(metric::WIDTH, 2480.0)
            .with_metric(metric::HEIGHT, 3508.0)
            .with_metric(metric::BLUR_SCORE, 120.0)
            .with_metric(metric::BRIGHTNESS, 180.0)
            .with_metric(metric::CONTRAST, 60.0),
        text_extraction: StageResult::new(StageId::TextExtraction, text),
        handwriting: StageResult::new(StageId::Handwriting, hw)
            .with_metric(metric::HANDWRITING_PERCENTAGE, 0.0)
            .with_metric(metric::REGION_SPREAD, 0.0),
        perceptual: StageResult::new(StageId::Perceptual, perceptual),
    }
}

pub fn with_ocr(mut s: StageSet<StageResult>, confidence: f64) -> StageSet<StageResult> {
    s.text_extraction
        .metrics
        .insert(metric::OCR_CONFIDENCE.to_string(), confidence.into());
    s
}

pub fn with_blur(mut s: StageSet<StageResult>, blur_score: f64) -> StageSet<StageResult> {
    s.image_quality
        .metrics
        .insert(metric::BLUR_SCORE.to_string(), blur_score.into());
    s
}

pub fn with_handwriting(
    mut s: StageSet<StageResult>,
    pct: f64,
    spread: f64,
) -> StageSet<StageResult> {
    s.handwriting
        .metrics
        .insert(metric::HANDWRITING_PERCENTAGE.to_string(), pct.into());
    s.handwriting
        .metrics
        .insert(metric::REGION_SPREAD.to_string(), spread.into());
    s
}

pub fn flagged(mut s: StageSet<StageResult>, stage: StageId, kind: FailureKind) -> StageSet<StageResult> {
    let target = match stage {
        StageId::ImageQuality => &mut s.image_quality,
        StageId::TextExtraction => &mut s.text_extraction,
        StageId::Handwriting => &mut s.handwriting,
        StageId::Perceptual => &mut s.perceptual,
    };
    target.critical_failures.insert(kind);
    s
}
