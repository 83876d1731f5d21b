use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// The four quality axes a page is evaluated along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    ImageQuality,
    TextExtraction,
    Handwriting,
    Perceptual,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::ImageQuality,
        StageId::TextExtraction,
        StageId::Handwriting,
        StageId::Perceptual,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StageId::ImageQuality => "image quality",
            StageId::TextExtraction => "text extraction",
            StageId::Handwriting => "handwriting",
            StageId::Perceptual => "perceptual quality",
        }
    }
}

/// One value per stage, addressed by [`StageId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSet<T> {
    pub image_quality: T,
    pub text_extraction: T,
    pub handwriting: T,
    pub perceptual: T,
}

impl<T> StageSet<T> {
    pub fn get(&self, id: StageId) -> &T {
        match id {
            StageId::ImageQuality => &self.image_quality,
            StageId::TextExtraction => &self.text_extraction,
            StageId::Handwriting => &self.handwriting,
            StageId::Perceptual => &self.perceptual,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageId, &T)> {
        StageId::ALL.into_iter().map(move |id| (id, self.get(id)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(StageId, &T) -> U) -> StageSet<U> {
        StageSet {
            image_quality: f(StageId::ImageQuality, &self.image_quality),
            text_extraction: f(StageId::TextExtraction, &self.text_extraction),
            handwriting: f(StageId::Handwriting, &self.handwriting),
            perceptual: f(StageId::Perceptual, &self.perceptual),
        }
    }
}

/// Metric names the decision engine reads. Evaluators may report others.
pub mod metric {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BLUR_SCORE: &str = "blur_score";
    pub const BRIGHTNESS: &str = "brightness";
    pub const CONTRAST: &str = "contrast";
    pub const OCR_CONFIDENCE: &str = "ocr_confidence";
    pub const WORD_COUNT: &str = "word_count";
    pub const CHARACTER_COUNT: &str = "character_count";
    pub const HANDWRITING_PERCENTAGE: &str = "handwriting_percentage";
    /// Share of page grid regions (0-100) showing handwriting strokes.
    pub const REGION_SPREAD: &str = "region_spread";
    pub const BRISQUE: &str = "brisque";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Number(f64),
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Flag(v)
    }
}

/// Conditions that force rejection unless an override downgrades them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LowResolution,
    Blur,
    Brightness,
    LowContrast,
    Corruption,
    OcrUnreadable,
    Handwriting,
    EvaluatorFailure,
}

impl FailureKind {
    /// Only blur and handwriting can be downgraded by cross-stage evidence.
    pub fn is_overridable(self) -> bool {
        matches!(self, FailureKind::Blur | FailureKind::Handwriting)
    }

    pub fn describe(self) -> &'static str {
        match self {
            FailureKind::LowResolution => "image resolution too low",
            FailureKind::Blur => "document too blurry",
            FailureKind::Brightness => "brightness outside the usable range",
            FailureKind::LowContrast => "contrast too low",
            FailureKind::Corruption => "page appears corrupted or distorted",
            FailureKind::OcrUnreadable => "text unreadable (OCR confidence below floor)",
            FailureKind::Handwriting => "document is handwritten; only printed documents are accepted",
            FailureKind::EvaluatorFailure => "a quality evaluator could not produce a result",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Resolution,
    Blur,
    Brightness,
    Contrast,
    Skew,
    WhiteSpace,
    LowOcrConfidence,
    SparseText,
    Handwriting,
    PerceptualQuality,
}

impl WarningKind {
    pub fn describe(self) -> &'static str {
        match self {
            WarningKind::Resolution => "resolution below recommended",
            WarningKind::Blur => "slightly blurry but readable",
            WarningKind::Brightness => "brightness not optimal",
            WarningKind::Contrast => "contrast not optimal",
            WarningKind::Skew => "page is skewed",
            WarningKind::WhiteSpace => "mostly blank page",
            WarningKind::LowOcrConfidence => "OCR confidence below recommended",
            WarningKind::SparseText => "little text detected",
            WarningKind::Handwriting => "handwriting detected (signatures, stamps or false positive)",
            WarningKind::PerceptualQuality => "overall perceptual quality low",
        }
    }
}

/// Output of one evaluator for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub score: f64,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub critical_failures: BTreeSet<FailureKind>,
    #[serde(default)]
    pub warnings: BTreeSet<WarningKind>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StageResult {
    pub fn new(stage_id: StageId, score: f64) -> Self {
        Self {
            stage_id,
            score,
            metrics: BTreeMap::new(),
            critical_failures: BTreeSet::new(),
            warnings: BTreeSet::new(),
            error: None,
        }
    }

    /// An evaluator that could not produce a score.
    pub fn failed(stage_id: StageId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(stage_id, 0.0)
        }
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    pub fn with_critical(mut self, kind: FailureKind) -> Self {
        self.critical_failures.insert(kind);
        self
    }

    pub fn with_warning(mut self, kind: WarningKind) -> Self {
        self.warnings.insert(kind);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Numeric metric, or `None` when absent, boolean, or the evaluator failed.
    pub fn metric(&self, name: &str) -> Option<f64> {
        if self.is_failed() {
            return None;
        }
        match self.metrics.get(name) {
            Some(MetricValue::Number(v)) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Score that enters the weighted sum: 0 for a failed evaluator.
    pub fn effective_score(&self) -> f64 {
        if self.is_failed() || !self.score.is_finite() {
            0.0
        } else {
            self.score.clamp(0.0, 100.0)
        }
    }
}

/// A rasterized page handed to the evaluators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    pub index: usize,
    pub path: PathBuf,
}

impl PageImage {
    pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }
}

/// Text and layout cues the router looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContent {
    pub text: String,
    pub has_table: bool,
    pub has_seal: bool,
    pub has_barcode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierOutcome {
    Printed,
    Handwritten,
    Timeout,
    Unavailable,
}
