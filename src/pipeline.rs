use crate::{
    config::Security,
    consensus::{ConsensusEngine, PageVerdict},
    evaluator::{
        ContentExtractor, Evaluators, PageContent, PageImage, evaluate_page, panic_message,
    },
    report::{BatchError, BatchItem, BatchSummary, DocumentResult},
    router::{DocumentTypeRouter, RoutingDecision, content_page_index},
    rules::RuleBook,
    selector,
    util::looks_like_url,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Failures that stop a document before it is scored.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document has no pages")]
    NoPages,
    #[error("page {index} not found: {}", .path.display())]
    MissingPage { index: usize, path: PathBuf },
    #[error("URL inputs are disabled: {0}")]
    UrlInput(String),
    #[error("document processing panicked: {0}")]
    Panicked(String),
}

/// One entry of a batch: a caller-chosen reference and its page images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub document_ref: String,
    pub pages: Vec<PathBuf>,
}

impl DocumentInput {
    pub fn page_images(&self) -> Vec<PageImage> {
        self.pages
            .iter()
            .enumerate()
            .map(|(i, p)| PageImage::new(i, p.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub results: Vec<BatchItem>,
    pub errors: Vec<BatchError>,
    pub summary: BatchSummary,
}

pub struct DocumentPipeline {
    evaluators: Evaluators,
    extractor: Arc<dyn ContentExtractor>,
    engine: ConsensusEngine,
    rules: Arc<RuleBook>,
    router: DocumentTypeRouter,
    max_workers: usize,
    reject_url_inputs: bool,
}

impl DocumentPipeline {
    pub fn new(
        evaluators: Evaluators,
        extractor: Arc<dyn ContentExtractor>,
        engine: ConsensusEngine,
        rules: Arc<RuleBook>,
        router: DocumentTypeRouter,
    ) -> Self {
        Self {
            evaluators,
            extractor,
            engine,
            rules,
            router,
            max_workers: 0,
            reject_url_inputs: true,
        }
    }

    /// Documents evaluated at once by [`Self::process_batch`]; 0 uses one
    /// worker per CPU.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_security(mut self, security: &Security) -> Self {
        self.reject_url_inputs = security.reject_url_inputs;
        self
    }

    /// Routes the document, evaluates every page under the chosen rule set
    /// and reduces the page verdicts to one document verdict.
    pub fn process(&self, pages: &[PageImage]) -> Result<DocumentResult, DocumentError> {
        let started = Instant::now();
        self.check_pages(pages)?;

        // Verdicts are indexed by position, whatever indices the caller used.
        let pages: Vec<PageImage> = pages
            .iter()
            .enumerate()
            .map(|(i, p)| PageImage::new(i, p.path.clone()))
            .collect();

        let routing = self.route(&pages);
        let rules = self.rules.get(routing.profile);

        let verdicts: Vec<PageVerdict> = pages
            .par_iter()
            .map(|page| {
                let stages = evaluate_page(&self.evaluators, page);
                self.engine.decide(page, &stages, rules)
            })
            .collect();

        let selection = selector::select(&verdicts).ok_or(DocumentError::NoPages)?;
        let result = DocumentResult::assemble(verdicts, selection, routing);
        info!(
            "document pages={} profile={} selected={} verdict={} elapsed_ms={}",
            pages.len(),
            result.routing.profile,
            result.selected_page_index,
            result.document_verdict,
            started.elapsed().as_millis()
        );
        Ok(result)
    }

    /// Processes every document on a bounded pool. A document that fails
    /// validation or panics becomes an error entry; the others are unaffected.
    pub fn process_batch(&self, documents: &[DocumentInput]) -> BatchOutput {
        let run = || {
            documents
                .par_iter()
                .map(|doc| (doc, self.process_guarded(&doc.page_images())))
                .collect::<Vec<_>>()
        };
        let outcomes = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(|i| format!("scan-triage-{i}"))
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(err) => {
                warn!("could not build worker pool ({err}); using the global pool");
                run()
            }
        };

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (doc, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(BatchItem {
                    document_ref: doc.document_ref.clone(),
                    result,
                }),
                Err(err) => {
                    warn!("document {} failed: {err}", doc.document_ref);
                    errors.push(BatchError {
                        document_ref: doc.document_ref.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        let summary = BatchSummary::tally(&results, &errors);
        info!(
            "batch total={} processed={} failed={} accepted={} rejected={} flagged={}",
            summary.total,
            summary.processed,
            summary.failed,
            summary.accepted,
            summary.rejected,
            summary.flagged_for_review
        );
        BatchOutput {
            results,
            errors,
            summary,
        }
    }

    fn process_guarded(&self, pages: &[PageImage]) -> Result<DocumentResult, DocumentError> {
        catch_unwind(AssertUnwindSafe(|| self.process(pages)))
            .unwrap_or_else(|payload| Err(DocumentError::Panicked(panic_message(payload.as_ref()))))
    }

    fn check_pages(&self, pages: &[PageImage]) -> Result<(), DocumentError> {
        if pages.is_empty() {
            return Err(DocumentError::NoPages);
        }
        for (i, page) in pages.iter().enumerate() {
            let shown = page.path.display().to_string();
            if self.reject_url_inputs && looks_like_url(&shown) {
                return Err(DocumentError::UrlInput(shown));
            }
            if !page.path.is_file() {
                return Err(DocumentError::MissingPage {
                    index: i,
                    path: page.path.clone(),
                });
            }
        }
        Ok(())
    }

    fn route(&self, pages: &[PageImage]) -> RoutingDecision {
        let (index, content) = if pages.len() <= 2 {
            let index = pages.len() - 1;
            (index, self.extract(&pages[index]))
        } else {
            let mut contents: Vec<PageContent> =
                pages.par_iter().map(|page| self.extract(page)).collect();
            let lengths: Vec<usize> = contents.iter().map(|c| c.text.chars().count()).collect();
            let index = content_page_index(&lengths).unwrap_or(0);
            (index, contents.swap_remove(index))
        };
        let mut decision = self.router.classify(&content);
        decision.page_index = index;
        decision
    }

    fn extract(&self, page: &PageImage) -> PageContent {
        self.extractor.extract(page).unwrap_or_else(|err| {
            warn!(
                "page {} content extraction failed; routing on empty content: {err:#}",
                page.index
            );
            PageContent::default()
        })
    }
}
