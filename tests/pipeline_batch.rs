mod common;

use anyhow::{Result, anyhow};
use common::{stages, with_blur, with_ocr};
use scan_triage::config::{Routing, Security};
use scan_triage::consensus::{ConsensusEngine, Priority, Verdict};
use scan_triage::evaluator::{
    ContentExtractor, Evaluators, PageContent, PageImage, StageEvaluator, StageId, StageResult,
    StageSet,
};
use scan_triage::pipeline::{DocumentError, DocumentInput, DocumentPipeline};
use scan_triage::router::DocumentTypeRouter;
use scan_triage::rules::{Profile, RuleBook};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Canned stage results and page text, keyed by page file name.
#[derive(Default)]
struct Fixture {
    stages: HashMap<String, StageSet<StageResult>>,
    text: HashMap<String, String>,
}

fn key(page: &PageImage) -> String {
    page.path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct CannedEvaluator {
    stage: StageId,
    fixture: Arc<Fixture>,
}

impl StageEvaluator for CannedEvaluator {
    fn stage(&self) -> StageId {
        self.stage
    }

    fn evaluate(&self, page: &PageImage) -> StageResult {
        match self.fixture.stages.get(&key(page)) {
            Some(set) => set.get(self.stage).clone(),
            None => StageResult::failed(self.stage, "no canned result"),
        }
    }
}

struct CannedExtractor {
    fixture: Arc<Fixture>,
}

impl ContentExtractor for CannedExtractor {
    fn extract(&self, page: &PageImage) -> Result<PageContent> {
        let name = key(page);
        if name.starts_with("boom") {
            panic!("extractor blew up on {name}");
        }
        match self.fixture.text.get(&name) {
            Some(text) => Ok(PageContent {
                text: text.clone(),
                ..PageContent::default()
            }),
            None => Err(anyhow!("no text layer")),
        }
    }
}

fn pipeline(fixture: Fixture) -> DocumentPipeline {
    let fixture = Arc::new(fixture);
    let eval = |stage| -> Arc<dyn StageEvaluator> {
        Arc::new(CannedEvaluator {
            stage,
            fixture: Arc::clone(&fixture),
        })
    };
    let evaluators: Evaluators = StageSet {
        image_quality: eval(StageId::ImageQuality),
        text_extraction: eval(StageId::TextExtraction),
        handwriting: eval(StageId::Handwriting),
        perceptual: eval(StageId::Perceptual),
    };
    DocumentPipeline::new(
        evaluators,
        Arc::new(CannedExtractor {
            fixture: Arc::clone(&fixture),
        }),
        ConsensusEngine::without_classifier(),
        Arc::new(RuleBook::default()),
        DocumentTypeRouter::new(&Routing::default()).expect("routing"),
    )
    .with_max_workers(2)
    .with_security(&Security::default())
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, b"not really an image").expect("write page");
    p
}

fn images(paths: &[PathBuf]) -> Vec<PageImage> {
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| PageImage::new(i, p.clone()))
        .collect()
}

#[test]
fn three_page_document_routes_on_longest_text_and_picks_best_page() {
    let dir = TempDir::new().expect("tempdir");
    let paths = [
        touch(dir.path(), "a.png"),
        touch(dir.path(), "b.png"),
        touch(dir.path(), "c.png"),
    ];

    let mut fx = Fixture::default();
    fx.stages.insert("a.png".into(), with_ocr(stages(65.0, 65.0, 65.0, 65.0), 55.0));
    fx.stages.insert("b.png".into(), with_ocr(stages(80.0, 80.0, 80.0, 80.0), 85.0));
    fx.stages.insert("c.png".into(), with_blur(with_ocr(stages(50.0, 50.0, 50.0, 50.0), 30.0), 5.0));
    fx.text.insert("a.png".into(), "cover".into());
    fx.text.insert("b.png".into(), "short".into());
    fx.text.insert(
        "c.png".into(),
        "INDEX II  registered with the sub registrar, regn:63m".into(),
    );

    let result = pipeline(fx).process(&images(&paths)).expect("processed");
    assert_eq!(result.routing.page_index, 2);
    assert_eq!(result.routing.profile, Profile::ContentProfileB);
    assert_eq!(result.page_verdicts.len(), 3);
    assert_eq!(result.selected_page_index, 1);
    assert_eq!(result.document_verdict, Verdict::Accepted);
    assert_eq!(result.priority, Priority::High);
    assert_eq!(result.ocr_confidence, Some(85.0));
    assert!((result.weighted_score - 80.0).abs() < 1e-6);
    assert!(result.reason.contains("page 2"));
}

#[test]
fn failed_content_extraction_routes_to_general() {
    let dir = TempDir::new().expect("tempdir");
    let paths = [touch(dir.path(), "only.png")];
    let mut fx = Fixture::default();
    fx.stages.insert("only.png".into(), with_ocr(stages(55.0, 55.0, 55.0, 55.0), 35.0));

    let result = pipeline(fx).process(&images(&paths)).expect("processed");
    assert_eq!(result.routing.profile, Profile::General);
    assert_eq!(result.document_verdict, Verdict::FlagForReview);
}

#[test]
fn missing_page_and_empty_document_fail_before_scoring() {
    let dir = TempDir::new().expect("tempdir");
    let p = pipeline(Fixture::default());

    assert_eq!(p.process(&[]), Err(DocumentError::NoPages));

    let ghost = dir.path().join("ghost.png");
    assert_eq!(
        p.process(&[PageImage::new(0, ghost.clone())]),
        Err(DocumentError::MissingPage {
            index: 0,
            path: ghost
        })
    );

    let url = PageImage::new(0, "https://example.com/page.png");
    assert!(matches!(p.process(&[url]), Err(DocumentError::UrlInput(_))));
}

#[test]
fn batch_isolates_failing_documents() {
    let dir = TempDir::new().expect("tempdir");
    let good = touch(dir.path(), "good.png");
    let bad = touch(dir.path(), "bad.png");
    let boom = touch(dir.path(), "boom.png");

    let mut fx = Fixture::default();
    fx.stages.insert("good.png".into(), with_ocr(stages(90.0, 90.0, 90.0, 90.0), 92.0));
    fx.stages.insert("bad.png".into(), with_ocr(stages(90.0, 90.0, 90.0, 90.0), 10.0));
    fx.stages.insert("boom.png".into(), with_ocr(stages(90.0, 90.0, 90.0, 90.0), 92.0));

    let docs = vec![
        DocumentInput {
            document_ref: "good".into(),
            pages: vec![good],
        },
        DocumentInput {
            document_ref: "bad".into(),
            pages: vec![bad],
        },
        DocumentInput {
            document_ref: "empty".into(),
            pages: vec![],
        },
        DocumentInput {
            document_ref: "missing".into(),
            pages: vec![dir.path().join("nope.png")],
        },
        DocumentInput {
            document_ref: "boom".into(),
            pages: vec![boom],
        },
    ];

    let out = pipeline(fx).process_batch(&docs);

    assert_eq!(out.summary.total, 5);
    assert_eq!(out.summary.processed, 2);
    assert_eq!(out.summary.failed, 3);
    assert_eq!(out.summary.accepted, 1);
    assert_eq!(out.summary.rejected, 1);
    assert_eq!(out.summary.flagged_for_review, 0);

    let refs: Vec<&str> = out.errors.iter().map(|e| e.document_ref.as_str()).collect();
    assert_eq!(refs, vec!["empty", "missing", "boom"]);
    assert!(out.errors[2].error.contains("panicked"));

    let verdicts: HashMap<&str, Verdict> = out
        .results
        .iter()
        .map(|r| (r.document_ref.as_str(), r.result.document_verdict))
        .collect();
    assert_eq!(verdicts["good"], Verdict::Accepted);
    assert_eq!(verdicts["bad"], Verdict::Rejected);
}

#[test]
fn missing_evaluator_output_rejects_the_page() {
    let dir = TempDir::new().expect("tempdir");
    let paths = [touch(dir.path(), "unknown.png")];
    let result = pipeline(Fixture::default())
        .process(&images(&paths))
        .expect("processed");
    assert_eq!(result.document_verdict, Verdict::Rejected);
    assert_eq!(result.selected().failed_stages.len(), 4);
}
