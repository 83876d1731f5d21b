use crate::{
    config::Config,
    consensus::{self, ConsensusEngine, PageVerdict},
    evaluator::{
        ClassifierOutcome, PageContent, PageImage, StageResult, StageSet,
        script::{ScriptBackend, ScriptRunner},
    },
    pipeline::{DocumentInput, DocumentPipeline},
    report::{BatchReport, DocumentResult, PageRecord, RunReport},
    router::DocumentTypeRouter,
    rules::Profile,
    selector,
    util::{ensure_dir, hash_file, looks_like_url, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scan-triage")]
#[command(about = "Accept, reject or flag scanned document pages for review")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./scan-triage.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the interpreter and evaluator scripts.
    Doctor {},
    /// Print both rule sets as configured.
    Rules {},
    /// Run the document-type router on a text file.
    Route {
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        table: bool,
        #[arg(long)]
        seal: bool,
        #[arg(long)]
        barcode: bool,
    },
    /// Decide pre-computed stage results (a JSON array, one entry per page).
    Decide {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "general")]
        profile: Profile,
    },
    /// Evaluate one document given its page images in order.
    Run {
        #[arg(required = true)]
        pages: Vec<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Evaluate every document listed in a JSON manifest.
    Batch {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            doctor(&cfg)
        }
        Command::Rules {} => {
            println!("{}", serde_json::to_string_pretty(&cfg.rules)?);
            Ok(())
        }
        Command::Route {
            text,
            table,
            seal,
            barcode,
        } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            route(&cfg, text, *table, *seal, *barcode)
        }
        Command::Decide { input, profile } => {
            let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg, None).as_deref())?;
            decide(&cfg, input, *profile)
        }
        Command::Run { pages, out_dir } => run(&args, &cfg, pages, out_dir.as_deref()),
        Command::Batch { manifest, out_dir } => batch(&args, &cfg, manifest, out_dir.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("scan-triage.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("scan-triage.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config, run_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    if let Some(run_dir) = run_dir {
        return Some(run_dir.join("scan-triage.log"));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("scan-triage.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let runner = ScriptRunner::new(cfg)?;
    let report = runner.doctor(cfg);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.ok {
        return Err(anyhow!("doctor found missing pieces"));
    }
    Ok(())
}

fn route(cfg: &Config, text: &Path, table: bool, seal: bool, barcode: bool) -> Result<()> {
    let raw = std::fs::read_to_string(text)
        .with_context(|| format!("reading text: {}", text.display()))?;
    let router = DocumentTypeRouter::new(&cfg.routing)?;
    let decision = router.classify(&PageContent {
        text: raw,
        has_table: table,
        has_seal: seal,
        has_barcode: barcode,
    });
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn decide(cfg: &Config, input: &Path, profile: Profile) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading stage results: {}", input.display()))?;
    let pages: Vec<StageSet<StageResult>> =
        serde_json::from_str(&raw).with_context(|| "parsing stage results JSON")?;
    let rules = cfg.rules.get(profile);

    // Offline: no classifier to consult.
    let verdicts: Vec<PageVerdict> = pages
        .iter()
        .enumerate()
        .map(|(i, stages)| {
            consensus::decide_with(i, stages, rules, &mut || ClassifierOutcome::Unavailable)
        })
        .collect();
    let selection = selector::select(&verdicts).ok_or_else(|| anyhow!("no pages in input"))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "profile": profile,
            "selection": selection,
            "page_verdicts": verdicts,
        }))?
    );
    Ok(())
}

fn build_pipeline(cfg: &Config) -> Result<DocumentPipeline> {
    let backend = ScriptBackend::new(cfg)?;
    let engine = ConsensusEngine::new(
        backend.classifier.clone(),
        Duration::from_millis(cfg.classifier.timeout_ms),
    );
    let router = DocumentTypeRouter::new(&cfg.routing)?;
    Ok(DocumentPipeline::new(
        backend.evaluators,
        backend.extractor,
        engine,
        Arc::new(cfg.rules.clone()),
        router,
    )
    .with_max_workers(cfg.global.max_workers)
    .with_security(&cfg.security))
}

fn run(args: &Args, cfg: &Config, pages: &[PathBuf], out_override: Option<&Path>) -> Result<()> {
    let mut records = Vec::with_capacity(pages.len());
    for (index, path) in pages.iter().enumerate() {
        let shown = path.display().to_string();
        if cfg.security.reject_url_inputs && looks_like_url(&shown) {
            return Err(anyhow!("URL inputs are disabled: {shown}"));
        }
        let sha256 = hash_file(path).with_context(|| format!("hashing page {index}: {shown}"))?;
        records.push(PageRecord {
            index,
            path: shown,
            sha256,
        });
    }

    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let page_hashes: Vec<&str> = records.iter().map(|r| r.sha256.as_str()).collect();
    let run_id = sha256_hex(format!("{}:{}", cfg_hash, page_hashes.join(":")).as_bytes());

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let run_dir = out_root.join(&run_id);
    ensure_dir(&run_dir)?;

    let log_path = resolve_log_path(cfg, Some(&run_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!("run_id={run_id} out={}", run_dir.display());

    let pipeline = build_pipeline(cfg)?;
    let started = now_rfc3339();
    let images: Vec<PageImage> = pages
        .iter()
        .enumerate()
        .map(|(i, p)| PageImage::new(i, p.clone()))
        .collect();
    let result: DocumentResult = pipeline.process(&images)?;

    let report = RunReport {
        run_id: run_id.clone(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        config_sha256: cfg_hash,
        started,
        finished: now_rfc3339(),
        pages: records,
        result,
    };

    if cfg.output.write_report_json {
        std::fs::write(
            run_dir.join(&cfg.output.report_filename),
            serde_json::to_string_pretty(&report)?,
        )?;
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "run_dir": run_dir,
                "verdict": report.result.document_verdict,
                "priority": report.result.priority,
                "selected_page": report.result.selected_page_index,
                "profile": report.result.routing.profile,
                "reason": report.result.reason,
            }))?
        );
    }
    Ok(())
}

fn batch(args: &Args, cfg: &Config, manifest: &Path, out_override: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(manifest)
        .with_context(|| format!("reading manifest: {}", manifest.display()))?;
    let documents: Vec<DocumentInput> =
        serde_json::from_str(&raw).with_context(|| "parsing manifest JSON")?;

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    ensure_dir(&out_root)?;

    let log_path = resolve_log_path(cfg, Some(&out_root));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;
    info!("batch documents={} out={}", documents.len(), out_root.display());

    let pipeline = build_pipeline(cfg)?;
    let started = now_rfc3339();
    let output = pipeline.process_batch(&documents);

    let report = BatchReport {
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        config_sha256: sha256_hex(cfg.normalized_for_hash().as_bytes()),
        started,
        finished: now_rfc3339(),
        summary: output.summary,
        results: output.results,
        errors: output.errors,
    };

    if cfg.output.write_report_json {
        std::fs::write(
            out_root.join(&cfg.output.batch_report_filename),
            serde_json::to_string_pretty(&report)?,
        )?;
    }

    if cfg.global.print_summary {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    }
    Ok(())
}
