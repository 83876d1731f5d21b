use crate::{
    consensus::{DecisionRule, PageVerdict, Priority, Verdict},
    router::RoutingDecision,
    selector::{Selection, SelectionBasis},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub page_verdicts: Vec<PageVerdict>,
    pub selected_page_index: usize,
    pub selection_basis: SelectionBasis,
    pub document_verdict: Verdict,
    /// Priority of the selected page.
    #[serde(default)]
    pub priority: Priority,
    pub routing: RoutingDecision,
    /// OCR confidence of the selected page.
    pub ocr_confidence: Option<f64>,
    /// Weighted score of the selected page.
    pub weighted_score: f64,
    pub reason: String,
}

impl DocumentResult {
    pub fn assemble(
        page_verdicts: Vec<PageVerdict>,
        selection: Selection,
        routing: RoutingDecision,
    ) -> Self {
        let selected = &page_verdicts[selection.index];
        let reason = document_reason(selected, selection, page_verdicts.len());
        Self {
            selected_page_index: selection.index,
            selection_basis: selection.basis,
            document_verdict: selection.verdict,
            priority: selected.priority,
            ocr_confidence: selected.ocr_confidence,
            weighted_score: selected.weighted_score,
            reason,
            routing,
            page_verdicts,
        }
    }

    pub fn selected(&self) -> &PageVerdict {
        &self.page_verdicts[self.selected_page_index]
    }
}

/// One sentence explaining a page verdict from its decision trail.
pub fn page_reason(page: &PageVerdict) -> String {
    let score = page.weighted_score;
    match page.decided_by {
        DecisionRule::SurvivingFailure => {
            let causes: Vec<&str> = page
                .resolved_critical_failures
                .iter()
                .map(|f| f.describe())
                .collect();
            format!("rejected: {}", causes.join("; "))
        }
        DecisionRule::HighOcr => format!(
            "accepted: high OCR confidence ({}) with score {score:.1}",
            fmt_pct(page.ocr_confidence)
        ),
        DecisionRule::ModerateOcr => format!(
            "accepted: readable text (OCR {}) with score {score:.1}",
            fmt_pct(page.ocr_confidence)
        ),
        DecisionRule::ConflictingSignals => format!(
            "needs review: handwriting {} alongside OCR {}",
            fmt_pct(page.handwriting_percentage),
            fmt_pct(page.ocr_confidence)
        ),
        DecisionRule::AcceptScore => format!("accepted: score {score:.1}"),
        DecisionRule::ReviewBand => format!("needs review: borderline score {score:.1}"),
        DecisionRule::BelowThreshold => format!("rejected: score {score:.1} too low"),
    }
}

/// Page reason plus which page it came from.
pub fn document_reason(selected: &PageVerdict, selection: Selection, page_count: usize) -> String {
    let reason = page_reason(selected);
    let page_no = selection.index + 1;
    match selection.basis {
        SelectionBasis::SinglePage => reason,
        SelectionBasis::ContentPage => format!("{reason} (based on page {page_no} (content page))"),
        SelectionBasis::BestQuality => format!("{reason} (based on page {page_no} (best quality))"),
        SelectionBasis::AllFailed => {
            format!("{reason} (all {page_count} pages failed; showing page {page_no})")
        }
    }
}

fn fmt_pct(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.0}%"),
        None => "n/a".to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub index: usize,
    pub path: String,
    pub sha256: String,
}

/// Report written by `run` for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub tool_version: String,
    pub config_sha256: String,
    pub started: String,
    pub finished: String,
    pub pages: Vec<PageRecord>,
    pub result: DocumentResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub document_ref: String,
    pub result: DocumentResult,
}

/// A document that never reached scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub document_ref: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub flagged_for_review: usize,
}

impl BatchSummary {
    pub fn tally(results: &[BatchItem], errors: &[BatchError]) -> Self {
        let mut summary = Self {
            total: results.len() + errors.len(),
            processed: results.len(),
            failed: errors.len(),
            ..Self::default()
        };
        for item in results {
            match item.result.document_verdict {
                Verdict::Accepted => summary.accepted += 1,
                Verdict::Rejected => summary.rejected += 1,
                Verdict::FlagForReview => summary.flagged_for_review += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub tool_version: String,
    pub config_sha256: String,
    pub started: String,
    pub finished: String,
    pub summary: BatchSummary,
    pub results: Vec<BatchItem>,
    pub errors: Vec<BatchError>,
}
