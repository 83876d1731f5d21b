pub mod script;
pub mod types;

use anyhow::Result;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

pub use types::{
    ClassifierOutcome, FailureKind, MetricValue, PageContent, PageImage, StageId, StageResult,
    StageSet, WarningKind, metric,
};

/// One quality axis. Implementations report their own failures through
/// [`StageResult::error`] instead of returning an error.
pub trait StageEvaluator: Send + Sync {
    fn stage(&self) -> StageId;
    fn evaluate(&self, page: &PageImage) -> StageResult;
}

/// Pulls text and layout cues from a page for routing.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, page: &PageImage) -> Result<PageContent>;
}

/// External printed-vs-handwritten classifier consulted on ambiguous pages.
///
/// Implementations must return within `deadline`, answering
/// [`ClassifierOutcome::Timeout`] if they cannot. [`classify_with_deadline`]
/// stops waiting at the deadline but cannot cancel the call, so a classifier
/// that hangs keeps its thread alive for every page it is asked about.
/// [`script::ScriptClassifier`] kills its child process at the same timeout.
pub trait PrintClassifier: Send + Sync {
    fn classify(&self, page: &PageImage, deadline: Duration) -> ClassifierOutcome;
}

pub type Evaluators = StageSet<Arc<dyn StageEvaluator>>;

/// Runs one evaluator, turning a panic into a failed result.
pub fn evaluate_guarded(evaluator: &dyn StageEvaluator, page: &PageImage) -> StageResult {
    let stage = evaluator.stage();
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(page))) {
        Ok(mut res) => {
            if res.stage_id != stage {
                warn!(
                    "evaluator for {} reported stage_id={:?}; correcting",
                    stage.label(),
                    res.stage_id
                );
                res.stage_id = stage;
            }
            if let Some(err) = res.error.as_deref() {
                warn!("page {} {} evaluator failed: {err}", page.index, stage.label());
            }
            res
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            warn!("page {} {} evaluator panicked: {msg}", page.index, stage.label());
            StageResult::failed(stage, format!("{} evaluator panicked: {msg}", stage.label()))
        }
    }
}

/// Runs all four evaluators of a page concurrently and joins on the results.
pub fn evaluate_page(evaluators: &Evaluators, page: &PageImage) -> StageSet<StageResult> {
    let ((image_quality, text_extraction), (handwriting, perceptual)) = rayon::join(
        || {
            rayon::join(
                || evaluate_guarded(evaluators.image_quality.as_ref(), page),
                || evaluate_guarded(evaluators.text_extraction.as_ref(), page),
            )
        },
        || {
            rayon::join(
                || evaluate_guarded(evaluators.handwriting.as_ref(), page),
                || evaluate_guarded(evaluators.perceptual.as_ref(), page),
            )
        },
    );
    debug!(
        "page {} stage scores iq={} text={} hw={} perceptual={}",
        page.index,
        image_quality.score,
        text_extraction.score,
        handwriting.score,
        perceptual.score
    );
    StageSet {
        image_quality,
        text_extraction,
        handwriting,
        perceptual,
    }
}

/// Asks the classifier on a separate thread and stops waiting at `timeout`.
/// A late answer is dropped; the caller is never held past the deadline.
/// The thread itself runs until `classify` returns, which is why
/// [`PrintClassifier`] implementations must honour the deadline they are given.
pub fn classify_with_deadline(
    classifier: &Arc<dyn PrintClassifier>,
    page: &PageImage,
    timeout: Duration,
) -> ClassifierOutcome {
    let (tx, rx) = mpsc::channel();
    let classifier = Arc::clone(classifier);
    let job_page = page.clone();
    let spawned = std::thread::Builder::new()
        .name("print-classifier".into())
        .spawn(move || {
            let outcome = classifier.classify(&job_page, timeout);
            let _ = tx.send(outcome);
        });
    if let Err(err) = spawned {
        warn!("could not start classifier thread: {err}");
        return ClassifierOutcome::Unavailable;
    }

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            warn!("page {} classifier timed out after {:?}", page.index, timeout);
            ClassifierOutcome::Timeout
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("page {} classifier exited without an answer", page.index);
            ClassifierOutcome::Unavailable
        }
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
