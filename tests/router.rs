use proptest::prelude::*;
use scan_triage::config::Routing;
use scan_triage::evaluator::PageContent;
use scan_triage::router::{DocumentTypeRouter, content_page_index};
use scan_triage::rules::Profile;
use std::sync::LazyLock;

static ROUTER: LazyLock<DocumentTypeRouter> =
    LazyLock::new(|| DocumentTypeRouter::new(&Routing::default()).expect("default routing"));

fn router() -> &'static DocumentTypeRouter {
    &ROUTER
}

fn text(t: &str) -> PageContent {
    PageContent {
        text: t.to_string(),
        ..PageContent::default()
    }
}

#[test]
fn marker_wins_over_unrelated_document_phrases() {
    let d = router().classify(&text(
        "सूची क्र.2 दुय्यम निबंधक\nThis Agreement to Sell is executed between the parties",
    ));
    assert_eq!(d.profile, Profile::ContentProfileB);
    assert!(d.confidence >= 0.60);
    assert_eq!(d.negative_score, 0.0);
    assert!(d.matched_marker.is_some());
}

#[test]
fn structure_alone_is_capped_below_the_cut() {
    let d = router().classify(&PageContent {
        text: String::new(),
        has_table: true,
        has_seal: true,
        has_barcode: true,
    });
    assert!((d.structure_score - 0.40).abs() < 1e-9);
    assert_eq!(d.profile, Profile::General);
}

#[test]
fn negatives_subtract_without_a_marker() {
    let d = router().classify(&PageContent {
        text: "NO OBJECTION CERTIFICATE issued to the transferee".into(),
        has_table: true,
        has_seal: false,
        has_barcode: true,
    });
    assert!(d.negative_phrases.iter().any(|p| p == "no objection certificate"));
    assert!((d.negative_score - 0.50).abs() < 1e-9);
    assert_eq!(d.confidence, 0.0);
    assert_eq!(d.profile, Profile::General);
}

#[test]
fn partial_marker_does_not_count() {
    let d = router().classify(&text("see index iii for details"));
    assert_eq!(d.matched_marker, None);
    assert_eq!(d.marker_score, 0.0);
}

#[test]
fn marker_matches_across_case_and_spacing() {
    let d = router().classify(&text("REGN:63M\n\nINDEX   II"));
    assert_eq!(d.marker_score, 1.0);
    assert_eq!(d.profile, Profile::ContentProfileB);
}

#[test]
fn empty_text_routes_to_general() {
    let d = router().classify(&PageContent::default());
    assert_eq!(d.confidence, 0.0);
    assert_eq!(d.profile, Profile::General);
}

#[test]
fn content_page_choice() {
    assert_eq!(content_page_index(&[]), None);
    assert_eq!(content_page_index(&[10]), Some(0));
    assert_eq!(content_page_index(&[500, 20]), Some(1));
    assert_eq!(content_page_index(&[10, 300, 300, 40]), Some(1));
}

#[test]
fn empty_marker_list_is_rejected() {
    let cfg = Routing {
        markers: vec![],
        ..Routing::default()
    };
    assert!(DocumentTypeRouter::new(&cfg).is_err());
}

fn marker() -> impl Strategy<Value = String> {
    prop::sample::select(Routing::default().markers)
}

fn negative() -> impl Strategy<Value = String> {
    prop::sample::select(Routing::default().negative_phrases)
}

proptest! {
    #[test]
    fn exact_marker_always_reaches_the_cut(
        m in marker(),
        negatives in prop::collection::vec(negative(), 0..6),
        filler in prop::collection::vec("[a-z]{1,8}", 0..10),
        table in any::<bool>(),
        seal in any::<bool>(),
        barcode in any::<bool>(),
    ) {
        let mut words = filler;
        words.push(m);
        words.extend(negatives);
        let d = router().classify(&PageContent {
            text: words.join(" "),
            has_table: table,
            has_seal: seal,
            has_barcode: barcode,
        });
        prop_assert!(d.confidence >= 0.60);
        prop_assert_eq!(d.profile, Profile::ContentProfileB);
    }
}
