use scan_triage::config::{Config, ConfigError};
use scan_triage::rules::{Profile, RuleBook, RuleSet, RuleSetError};
use std::io::Write;

#[test]
fn parse_example_config() {
    let raw = include_str!("../scan-triage.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    cfg.validate().expect("example config is valid");
    assert_eq!(cfg.rules, RuleBook::default());
    assert!(!cfg.routing.markers.is_empty());
    assert!(!cfg.paths.out_dir.is_empty());
    assert_eq!(cfg.rules.content_profile_b.review_score, None);
}

#[test]
fn missing_tables_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[global]\nmax_workers = 8\n").expect("parse TOML");
    assert_eq!(cfg.global.max_workers, 8);
    assert_eq!(cfg.rules, RuleBook::default());
    assert!((cfg.routing.cut - 0.60).abs() < 1e-12);
    cfg.validate().expect("defaults are valid");
}

#[test]
fn partial_routing_table_keeps_other_defaults() {
    let cfg: Config = toml::from_str("[routing]\ncut = 0.7\n").expect("parse TOML");
    assert!((cfg.routing.cut - 0.7).abs() < 1e-12);
    assert!((cfg.routing.structure_cap - 0.40).abs() < 1e-12);
    assert!(!cfg.routing.markers.is_empty());
    assert!(cfg.global.print_summary);
    cfg.validate().expect("partial routing is valid");
}

#[test]
fn partial_general_rules_table_overlays_general_defaults() {
    let cfg: Config =
        toml::from_str("[rules.general]\naccept_score = 72.0\n").expect("parse TOML");
    let expected = RuleSet {
        accept_score: 72.0,
        ..RuleSet::general()
    };
    assert_eq!(cfg.rules.general, expected);
    assert_eq!(cfg.rules.content_profile_b, RuleSet::content_profile_b());
    cfg.validate().expect("partial rules are valid");
}

#[test]
fn partial_profile_b_table_keeps_its_own_defaults() {
    let raw = "[rules.content_profile_b]\naccept_score = 55.0\n\n\
               [rules.content_profile_b.weights]\nperceptual = 0.05\n";
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    let b = &cfg.rules.content_profile_b;
    assert_eq!(b.profile, Profile::ContentProfileB);
    assert_eq!(b.accept_score, 55.0);
    assert_eq!(b.review_score, None);
    assert_eq!(b.trust_ocr_floor, 70.0);
    assert_eq!(b.weights, RuleSet::content_profile_b().weights);
    assert_eq!(cfg.rules.general, RuleSet::general());
    cfg.validate().expect("partial rules are valid");
}

#[test]
fn integer_thresholds_are_accepted() {
    let cfg: Config = toml::from_str("[rules.general]\nmin_width = 640\n").expect("parse TOML");
    assert_eq!(cfg.rules.general.min_width, 640.0);
}

#[test]
fn mistyped_rule_value_names_the_table() {
    let err = toml::from_str::<Config>("[rules.general]\naccept_score = \"high\"\n")
        .expect_err("string threshold");
    assert!(err.to_string().contains("rules.general"));
}

#[test]
fn load_reports_bad_weights_with_context() {
    let mut cfg = Config::default();
    cfg.rules.general.weights.perceptual = 0.15;
    let raw = toml::to_string(&cfg).expect("serialize");

    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(raw.as_bytes()).expect("write");

    let err = Config::load(file.path()).expect_err("weights sum to 1.1");
    let msg = format!("{err:#}");
    assert!(msg.contains("validating config"));
    assert!(msg.contains("stage weights sum"));
}

#[test]
fn swapped_rule_sets_are_rejected() {
    let mut cfg = Config::default();
    std::mem::swap(&mut cfg.rules.general, &mut cfg.rules.content_profile_b);
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Rules(RuleSetError::ProfileMismatch {
            slot: Profile::General,
            ..
        }))
    ));
}

#[test]
fn routing_values_must_be_fractions() {
    let mut cfg = Config::default();
    cfg.routing.cut = 1.5;
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::RoutingRange { field: "cut", .. })
    ));
}

#[test]
fn enabled_classifier_needs_a_timeout() {
    let mut cfg = Config::default();
    cfg.classifier.enabled = true;
    cfg.classifier.timeout_ms = 0;
    assert!(matches!(cfg.validate(), Err(ConfigError::ClassifierTimeout)));
}
