//! Picks the rule set for a document from one page's text and layout cues.
//!
//! Three additive signals: an exact marker phrase (all or nothing), structural
//! cues (table, seal, barcode; capped), and phrases typical of other document
//! types (subtracted, capped). An exact marker makes the negatives irrelevant.

use crate::{
    config::Routing,
    evaluator::PageContent,
    normalize::{PhraseList, normalize_text},
    rules::Profile,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub profile: Profile,
    pub confidence: f64,
    pub marker_score: f64,
    pub structure_score: f64,
    pub negative_score: f64,
    #[serde(default)]
    pub matched_marker: Option<String>,
    #[serde(default)]
    pub negative_phrases: Vec<String>,
    /// Page the decision was made on.
    #[serde(default)]
    pub page_index: usize,
}

pub struct DocumentTypeRouter {
    cfg: Routing,
    markers: PhraseList,
    negatives: PhraseList,
}

impl DocumentTypeRouter {
    pub fn new(cfg: &Routing) -> Result<Self> {
        let markers = PhraseList::new(&cfg.markers)?;
        if markers.is_empty() {
            anyhow::bail!("routing.markers is empty");
        }
        Ok(Self {
            cfg: cfg.clone(),
            markers,
            negatives: PhraseList::new(&cfg.negative_phrases)?,
        })
    }

    pub fn classify(&self, content: &PageContent) -> RoutingDecision {
        let text = normalize_text(&content.text);

        let matched_marker = self.markers.first_match(&text).map(str::to_string);
        let marker_score = if matched_marker.is_some() { 1.0 } else { 0.0 };

        let structure_score = self.structure_score(content);

        let negative_phrases: Vec<String> = self
            .negatives
            .matches(&text)
            .into_iter()
            .map(str::to_string)
            .collect();
        let negative_score = if matched_marker.is_some() {
            0.0
        } else {
            (negative_phrases.len() as f64 * self.cfg.negative_penalty).min(self.cfg.negative_cap)
        };

        let confidence = (marker_score + structure_score - negative_score).clamp(0.0, 1.0);
        let profile = if confidence >= self.cfg.cut {
            Profile::ContentProfileB
        } else {
            Profile::General
        };

        debug!(
            "routing marker={:?} structure={:.2} negatives={:?} confidence={:.3}",
            matched_marker, structure_score, negative_phrases, confidence
        );
        if (confidence - self.cfg.cut).abs() < self.cfg.near_cut_margin {
            warn!(
                "routing ambiguity: confidence {:.3} within {:.2} of cut {:.2}; resolved to {}",
                confidence, self.cfg.near_cut_margin, self.cfg.cut, profile
            );
        } else {
            info!("routing profile={} confidence={:.3}", profile, confidence);
        }

        RoutingDecision {
            profile,
            confidence,
            marker_score,
            structure_score,
            negative_score,
            matched_marker,
            negative_phrases,
            page_index: 0,
        }
    }

    fn structure_score(&self, content: &PageContent) -> f64 {
        let mut score = 0.0;
        if content.has_table {
            score += self.cfg.table_weight;
        }
        if content.has_seal {
            score += self.cfg.seal_weight;
        }
        if content.has_barcode {
            score += self.cfg.barcode_weight;
        }
        score.min(self.cfg.structure_cap)
    }
}

/// Page most likely to carry body content: the only page, the second of two
/// (the first is usually a cover), otherwise the one with the most text.
pub fn content_page_index(text_lengths: &[usize]) -> Option<usize> {
    match text_lengths.len() {
        0 => None,
        1 => Some(0),
        2 => Some(1),
        _ => text_lengths
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, usize)>, (i, &len)| match best {
                Some((_, best_len)) if best_len >= len => best,
                _ => Some((i, len)),
            })
            .map(|(i, _)| i),
    }
}
