use crate::rules::{RuleBook, RuleSetError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub evaluators: EvaluatorScripts,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub rules: RuleBook,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub security: Security,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Rules(#[from] RuleSetError),
    #[error("routing.{field} must lie in [0, 1], got {value}")]
    RoutingRange { field: &'static str, value: f64 },
    #[error("routing.markers is empty; the specialized profile could never be selected")]
    NoMarkers,
    #[error("classifier.timeout_ms must be > 0 when the classifier is enabled")]
    ClassifierTimeout,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("validating config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rules.validate()?;
        let r = &self.routing;
        for (field, value) in [
            ("cut", r.cut),
            ("table_weight", r.table_weight),
            ("seal_weight", r.seal_weight),
            ("barcode_weight", r.barcode_weight),
            ("structure_cap", r.structure_cap),
            ("negative_penalty", r.negative_penalty),
            ("negative_cap", r.negative_cap),
            ("near_cut_margin", r.near_cut_margin),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RoutingRange { field, value });
            }
        }
        if r.markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::NoMarkers);
        }
        if self.classifier.enabled && self.classifier.timeout_ms == 0 {
            return Err(ConfigError::ClassifierTimeout);
        }
        Ok(())
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    /// Upper bound on documents evaluated at once; 0 uses one per CPU.
    pub max_workers: usize,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            max_workers: 4,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub out_dir: String,
    pub scripts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            scripts_dir: "scripts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorScripts {
    pub python_exe: String,
    pub image_quality_script: String,
    pub text_extraction_script: String,
    pub handwriting_script: String,
    pub perceptual_script: String,
    pub content_script: String,
    pub stage_timeout_seconds: u64,
    pub keep_stderr: bool,
}
impl EvaluatorScripts {
    pub fn script_names(&self) -> Vec<&str> {
        vec![
            self.image_quality_script.as_str(),
            self.text_extraction_script.as_str(),
            self.handwriting_script.as_str(),
            self.perceptual_script.as_str(),
            self.content_script.as_str(),
        ]
    }
}
impl Default for EvaluatorScripts {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            image_quality_script: "image_quality.py".into(),
            text_extraction_script: "text_extraction.py".into(),
            handwriting_script: "handwriting.py".into(),
            perceptual_script: "perceptual.py".into(),
            content_script: "page_content.py".into(),
            stage_timeout_seconds: 120,
            keep_stderr: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Classifier {
    pub enabled: bool,
    pub script: String,
    pub timeout_ms: u64,
}
impl Default for Classifier {
    fn default() -> Self {
        Self {
            enabled: false,
            script: "print_classifier.py".into(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Routing {
    pub cut: f64,
    pub table_weight: f64,
    pub seal_weight: f64,
    pub barcode_weight: f64,
    pub structure_cap: f64,
    pub negative_penalty: f64,
    pub negative_cap: f64,
    /// Confidence this close to `cut` is logged as routing ambiguity.
    pub near_cut_margin: f64,
    pub markers: Vec<String>,
    pub negative_phrases: Vec<String>,
}
impl Default for Routing {
    fn default() -> Self {
        Self {
            cut: 0.60,
            table_weight: 0.15,
            seal_weight: 0.10,
            barcode_weight: 0.20,
            structure_cap: 0.40,
            negative_penalty: 0.25,
            negative_cap: 0.50,
            near_cut_margin: 0.05,
            markers: vec![
                "सूची क्र.2".into(),
                "सूची क्र.२".into(),
                "index-ii".into(),
                "index ii".into(),
                "regn:63m".into(),
                "regn.63m".into(),
                "दुय्यम निबंधक".into(),
            ],
            negative_phrases: vec![
                "no objection certificate".into(),
                "no objection".into(),
                "noc".into(),
                "no dues certificate".into(),
                "no dues".into(),
                "clearance certificate".into(),
                "bonafide certificate".into(),
                "deed of assignment".into(),
                "agreement to sell".into(),
                "sale agreement".into(),
                "agreement".into(),
                "testament".into(),
                "testator".into(),
                "bequeath".into(),
                "will".into(),
                "power of attorney".into(),
                "assignor".into(),
                "assignee".into(),
                "transferor".into(),
                "transferee".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub write_report_json: bool,
    pub report_filename: String,
    pub batch_report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: true,
            report_filename: "report.json".into(),
            batch_report_filename: "batch-report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            pin_scripts_dir: true,
        }
    }
}
