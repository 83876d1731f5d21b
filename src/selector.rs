use crate::consensus::{PageVerdict, Verdict};
use serde::{Deserialize, Serialize};

/// How the representative page was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionBasis {
    SinglePage,
    /// Two pages: the second is the content page, the first a cover.
    ContentPage,
    /// Best-scoring page without a critical failure.
    BestQuality,
    /// Every page had a critical failure; best score overall.
    AllFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub index: usize,
    pub verdict: Verdict,
    pub basis: SelectionBasis,
}

/// Reduces page verdicts to one representative page. `None` for no pages.
pub fn select(pages: &[PageVerdict]) -> Option<Selection> {
    let (index, basis) = match pages.len() {
        0 => return None,
        1 => (0, SelectionBasis::SinglePage),
        2 => (1, SelectionBasis::ContentPage),
        _ => {
            let clean = best_scoring(
                pages
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.resolved_critical_failures.is_empty()),
            );
            match clean {
                Some(i) => (i, SelectionBasis::BestQuality),
                None => (
                    best_scoring(pages.iter().enumerate()).unwrap_or(0),
                    SelectionBasis::AllFailed,
                ),
            }
        }
    };
    Some(Selection {
        index,
        verdict: pages[index].verdict,
        basis,
    })
}

/// Highest weighted score; the earliest page wins a tie.
fn best_scoring<'a>(pages: impl Iterator<Item = (usize, &'a PageVerdict)>) -> Option<usize> {
    pages
        .fold(None, |best: Option<(usize, f64)>, (i, page)| match best {
            Some((_, score)) if score >= page.weighted_score => best,
            _ => Some((i, page.weighted_score)),
        })
        .map(|(i, _)| i)
}
