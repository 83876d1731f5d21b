use super::{
    ClassifierOutcome, ContentExtractor, Evaluators, PageContent, PageImage, PrintClassifier,
    StageEvaluator, StageId, StageResult, StageSet,
};
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
#[error("script exceeded timeout ({0:?})")]
pub struct ScriptTimeout(pub Duration);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub python_exe: String,
    pub python_version: Option<String>,
    pub scripts: BTreeMap<String, bool>,
    pub ok: bool,
}

/// Runs evaluator scripts as child processes speaking JSON over stdin/stdout.
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    python_exe: PathBuf,
    keep_stderr: bool,
}

impl ScriptRunner {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        Ok(Self {
            scripts_dir,
            python_exe: resolve_python_exe(&cfg.evaluators.python_exe),
            keep_stderr: cfg.evaluators.keep_stderr,
        })
    }

    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(name)
    }

    pub fn doctor(&self, cfg: &Config) -> DoctorReport {
        let scripts: BTreeMap<String, bool> = cfg
            .evaluators
            .script_names()
            .into_iter()
            .chain(cfg.classifier.enabled.then_some(cfg.classifier.script.as_str()))
            .map(|name| (name.to_string(), self.script(name).exists()))
            .collect();

        let python_version = Command::new(&self.python_exe)
            .arg("--version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| {
                let raw = if o.stdout.is_empty() { o.stderr } else { o.stdout };
                String::from_utf8_lossy(&raw).trim().to_string()
            });

        let ok = python_version.is_some() && scripts.values().all(|present| *present);
        DoctorReport {
            python_exe: self.python_exe.display().to_string(),
            python_version,
            scripts,
            ok,
        }
    }

    pub fn run_json<I: Serialize, O: for<'de> Deserialize<'de>>(
        &self,
        script: &Path,
        input: &I,
        timeout: Option<Duration>,
    ) -> Result<O> {
        debug!("python run {} timeout={:?}", script.display(), timeout);
        if !script.exists() {
            return Err(anyhow!("missing script: {}", script.display()));
        }

        let mut child = Command::new(&self.python_exe)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning python: {}", script.display()))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = match timeout {
            Some(limit) => wait_with_timeout(&mut child, limit)?,
            None => child
                .wait_with_output()
                .with_context(|| "waiting for python")?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "python script failed: {}\n{}",
                script.display(),
                stderr.trim()
            ));
        }

        if self.keep_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("python stderr {}: {}", script.display(), stderr.trim());
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing python JSON output: {}", script.display()))
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("SCAN_TRIAGE_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Serialize)]
struct PageRequest<'a> {
    image_path: &'a Path,
    page_index: usize,
}

impl<'a> PageRequest<'a> {
    fn of(page: &'a PageImage) -> Self {
        Self {
            image_path: &page.path,
            page_index: page.index,
        }
    }
}

/// A stage evaluator backed by one script that prints a `StageResult`.
pub struct ScriptEvaluator {
    runner: Arc<ScriptRunner>,
    stage: StageId,
    script: PathBuf,
    timeout: Option<Duration>,
}

impl ScriptEvaluator {
    pub fn new(runner: Arc<ScriptRunner>, stage: StageId, script: &str, timeout: Option<Duration>) -> Self {
        let script = runner.script(script);
        Self {
            runner,
            stage,
            script,
            timeout,
        }
    }
}

impl StageEvaluator for ScriptEvaluator {
    fn stage(&self) -> StageId {
        self.stage
    }

    fn evaluate(&self, page: &PageImage) -> StageResult {
        match self
            .runner
            .run_json::<_, StageResult>(&self.script, &PageRequest::of(page), self.timeout)
        {
            Ok(res) => res,
            Err(err) => StageResult::failed(self.stage, format!("{err:#}")),
        }
    }
}

pub struct ScriptContentExtractor {
    runner: Arc<ScriptRunner>,
    script: PathBuf,
    timeout: Option<Duration>,
}

impl ContentExtractor for ScriptContentExtractor {
    fn extract(&self, page: &PageImage) -> Result<PageContent> {
        self.runner
            .run_json(&self.script, &PageRequest::of(page), self.timeout)
            .with_context(|| format!("content extraction for page {}", page.index))
    }
}

#[derive(Deserialize)]
struct ClassifierReply {
    label: String,
}

pub struct ScriptClassifier {
    runner: Arc<ScriptRunner>,
    script: PathBuf,
}

impl PrintClassifier for ScriptClassifier {
    fn classify(&self, page: &PageImage, deadline: Duration) -> ClassifierOutcome {
        match self
            .runner
            .run_json::<_, ClassifierReply>(&self.script, &PageRequest::of(page), Some(deadline))
        {
            Ok(reply) => match reply.label.trim().to_ascii_lowercase().as_str() {
                "printed" => ClassifierOutcome::Printed,
                "handwritten" => ClassifierOutcome::Handwritten,
                other => {
                    warn!("classifier returned unknown label {other:?}");
                    ClassifierOutcome::Unavailable
                }
            },
            Err(err) if err.chain().any(|e| e.is::<ScriptTimeout>()) => ClassifierOutcome::Timeout,
            Err(err) => {
                warn!("classifier failed: {err:#}");
                ClassifierOutcome::Unavailable
            }
        }
    }
}

/// Collaborators wired from the `[evaluators]` and `[classifier]` tables.
pub struct ScriptBackend {
    pub runner: Arc<ScriptRunner>,
    pub evaluators: Evaluators,
    pub extractor: Arc<dyn ContentExtractor>,
    pub classifier: Option<Arc<dyn PrintClassifier>>,
}

impl ScriptBackend {
    pub fn new(cfg: &Config) -> Result<Self> {
        let runner = Arc::new(ScriptRunner::new(cfg)?);
        let timeout = match cfg.evaluators.stage_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let scripts = &cfg.evaluators;
        let stage = |id: StageId, script: &str| -> Arc<dyn StageEvaluator> {
            Arc::new(ScriptEvaluator::new(Arc::clone(&runner), id, script, timeout))
        };
        let evaluators = StageSet {
            image_quality: stage(StageId::ImageQuality, &scripts.image_quality_script),
            text_extraction: stage(StageId::TextExtraction, &scripts.text_extraction_script),
            handwriting: stage(StageId::Handwriting, &scripts.handwriting_script),
            perceptual: stage(StageId::Perceptual, &scripts.perceptual_script),
        };
        let extractor: Arc<dyn ContentExtractor> = Arc::new(ScriptContentExtractor {
            runner: Arc::clone(&runner),
            script: runner.script(&scripts.content_script),
            timeout,
        });
        let classifier: Option<Arc<dyn PrintClassifier>> = if cfg.classifier.enabled {
            Some(Arc::new(ScriptClassifier {
                runner: Arc::clone(&runner),
                script: runner.script(&cfg.classifier.script),
            }))
        } else {
            None
        };
        Ok(Self {
            runner,
            evaluators,
            extractor,
            classifier,
        })
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty script can't block on a full buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("python process timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();
            return Err(ScriptTimeout(timeout).into());
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
