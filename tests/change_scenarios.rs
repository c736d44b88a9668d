use proptest::prelude::*;

use building_change::{
    match_detections, BBox, ChangeKind, ChangeMatcher, Detection, DetectionSet, ImageSize,
    MatchParams, Point,
};

fn det(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f32) -> Detection {
    Detection::new(BBox::new(x1, y1, x2, y2).unwrap(), confidence)
}

fn set(dets: Vec<Detection>) -> DetectionSet {
    dets.into_iter().collect()
}

#[test]
fn single_recent_building_is_new() {
    let report = match_detections(
        &DetectionSet::default(),
        &set(vec![det(0.0, 0.0, 100.0, 100.0, 0.8)]),
        MatchParams::default(),
        ImageSize::new(1000, 1000),
    )
    .unwrap();

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.kind, ChangeKind::NewBuilding);
    assert_eq!(record.area, 10000.0);
    assert_eq!(record.position, Point::new(50.0, 50.0));
    assert_eq!(record.confidence, 0.8);
    assert_eq!(report.summary.total_change_area, 10000.0);
    assert!((report.summary.change_rate - 1.0).abs() < 1e-12);
}

#[test]
fn single_earlier_building_is_demolished() {
    let report = match_detections(
        &set(vec![det(0.0, 0.0, 100.0, 100.0, 0.6)]),
        &DetectionSet::default(),
        MatchParams::default(),
        ImageSize::new(1000, 1000),
    )
    .unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].kind, ChangeKind::DemolishedBuilding);
    assert_eq!(report.records[0].area, 10000.0);
    assert_eq!(report.records[0].confidence, 0.6);
    assert_eq!(report.summary.demolished_buildings, 1);
}

#[test]
fn identical_building_is_unchanged() {
    let building = det(0.0, 0.0, 100.0, 100.0, 0.9);
    let report = match_detections(
        &set(vec![building.clone()]),
        &set(vec![building]),
        MatchParams::new(0.5, 0.3),
        ImageSize::new(1000, 1000),
    )
    .unwrap();

    assert!(report.records.is_empty());
    assert_eq!(report.summary.matched_pairs, 1);
    assert_eq!(report.summary.unchanged_pairs(), 1);
    assert_eq!(report.pairs[0].iou, 1.0);
    assert_eq!(report.summary.change_rate, 0.0);
}

#[test]
fn enlarged_building_is_extended() {
    let report = match_detections(
        &set(vec![det(0.0, 0.0, 100.0, 100.0, 0.9)]),
        &set(vec![det(0.0, 0.0, 150.0, 150.0, 0.7)]),
        MatchParams::new(0.3, 0.3),
        ImageSize::new(1000, 1000),
    )
    .unwrap();

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.kind, ChangeKind::Extended);
    assert_eq!(record.position, Point::new(75.0, 75.0));
    assert_eq!(record.confidence, 0.7);
    let resize = record.resize.unwrap();
    assert_eq!(resize.delta, 12500.0);
    assert_eq!(resize.ratio, 1.25);
    assert!((report.pairs[0].iou - 10000.0 / 22500.0).abs() < 1e-12);
    assert_eq!(report.summary.total_change_area, 12500.0);
}

#[test]
fn disjoint_buildings_are_demolished_and_new() {
    let report = match_detections(
        &set(vec![det(0.0, 0.0, 100.0, 100.0, 0.9)]),
        &set(vec![det(500.0, 500.0, 600.0, 600.0, 0.9)]),
        MatchParams::default(),
        ImageSize::new(1000, 1000),
    )
    .unwrap();

    let kinds: Vec<ChangeKind> = report.records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::NewBuilding, ChangeKind::DemolishedBuilding]
    );
    assert_eq!(report.records[0].position, Point::new(550.0, 550.0));
    assert_eq!(report.records[1].position, Point::new(50.0, 50.0));
    assert!((report.summary.change_rate - 2.0).abs() < 1e-12);
}

#[test]
fn empty_inputs_yield_empty_report() {
    let report = match_detections(
        &DetectionSet::default(),
        &DetectionSet::default(),
        MatchParams::default(),
        ImageSize::new(1000, 1000),
    )
    .unwrap();
    assert!(report.records.is_empty());
    assert!(report.pairs.is_empty());
    assert_eq!(report.summary.change_rate, 0.0);
}

#[test]
fn negative_thresholds_fail_fast() {
    assert!(match_detections(
        &DetectionSet::default(),
        &DetectionSet::default(),
        MatchParams::new(-0.5, 0.3),
        ImageSize::default(),
    )
    .is_err());
}

#[test]
fn malformed_detections_do_not_abort_comparison() {
    let earlier = DetectionSet::from_json_str(
        r#"[
            {"bbox": [0, 0, 100, 100], "confidence": 0.9},
            {"bbox": [0, 0, "x", 100], "confidence": 0.9},
            {"confidence": 0.9}
        ]"#,
    )
    .unwrap();
    let recent = DetectionSet::from_json_str(
        r#"[
            {"bbox": [null, 0, 10, 10]},
            {"bbox": [0, 0, 100, 100], "confidence": 0.8}
        ]"#,
    )
    .unwrap();
    assert_eq!(earlier.len(), 1);
    assert_eq!(recent.len(), 1);

    let report =
        match_detections(&earlier, &recent, MatchParams::default(), ImageSize::default()).unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.summary.matched_pairs, 1);
}

/// A crowded scene with overlapping and double-fired boxes.
fn crowded_scene() -> (DetectionSet, DetectionSet) {
    let earlier = set(vec![
        det(0.0, 0.0, 100.0, 100.0, 0.9),
        det(10.0, 10.0, 110.0, 110.0, 0.5),
        det(200.0, 0.0, 260.0, 80.0, 0.8),
        det(300.0, 300.0, 420.0, 380.0, 0.7),
        det(305.0, 290.0, 400.0, 400.0, 0.6),
        det(600.0, 600.0, 640.0, 640.0, 0.9),
    ]);
    let recent = set(vec![
        det(5.0, 5.0, 105.0, 95.0, 0.9),
        det(195.0, 0.0, 290.0, 90.0, 0.7),
        det(0.0, 0.0, 120.0, 120.0, 0.8),
        det(310.0, 300.0, 410.0, 390.0, 0.9),
        det(800.0, 800.0, 850.0, 850.0, 0.9),
    ]);
    (earlier, recent)
}

#[test]
fn raising_iou_threshold_never_adds_matches() {
    let (earlier, recent) = crowded_scene();
    let mut previous_pairs = usize::MAX;
    let mut previous_unmatched = 0;
    for step in 0..=20 {
        let threshold = f64::from(step) / 20.0;
        let report = match_detections(
            &earlier,
            &recent,
            MatchParams::new(threshold, 0.3),
            ImageSize::new(1000, 1000),
        )
        .unwrap();
        let unmatched = report.summary.new_buildings + report.summary.demolished_buildings;
        assert!(report.pairs.len() <= previous_pairs, "threshold {}", threshold);
        assert!(unmatched >= previous_unmatched, "threshold {}", threshold);
        previous_pairs = report.pairs.len();
        previous_unmatched = unmatched;
    }
    assert_eq!(previous_pairs, 0);
}

fn arb_detection() -> impl Strategy<Value = Detection> {
    (0.0f64..200.0, 0.0f64..200.0, 1.0f64..80.0, 1.0f64..80.0, 0.0f32..=1.0).prop_map(
        |(x, y, w, h, c)| Detection::new(BBox::new(x, y, x + w, y + h).unwrap(), c),
    )
}

fn arb_set() -> impl Strategy<Value = DetectionSet> {
    prop::collection::vec(arb_detection(), 0..12).prop_map(|v| v.into_iter().collect())
}

proptest! {
    #[test]
    fn every_detection_is_consumed_once(
        earlier in arb_set(),
        recent in arb_set(),
        iou in 0.0f64..=1.0,
        area in 0.0f64..=1.0,
    ) {
        let matcher = ChangeMatcher::new(MatchParams::new(iou, area)).unwrap();
        let report = matcher.compare(&earlier, &recent, ImageSize::new(256, 256));
        let pairs = report.pairs.len();
        prop_assert_eq!(report.summary.new_buildings + pairs, recent.len());
        prop_assert_eq!(report.summary.demolished_buildings + pairs, earlier.len());

        let mut seen_earlier = vec![0usize; earlier.len()];
        let mut seen_recent = vec![0usize; recent.len()];
        for pair in &report.pairs {
            seen_earlier[pair.earlier_index] += 1;
            seen_recent[pair.recent_index] += 1;
        }
        for record in &report.records {
            match record.kind {
                ChangeKind::NewBuilding => seen_recent[record.recent_index.unwrap()] += 1,
                ChangeKind::DemolishedBuilding => seen_earlier[record.earlier_index.unwrap()] += 1,
                ChangeKind::Extended | ChangeKind::Shrunk => {}
            }
        }
        prop_assert!(seen_earlier.iter().all(|n| *n == 1));
        prop_assert!(seen_recent.iter().all(|n| *n == 1));
        prop_assert!((0.0..=100.0).contains(&report.summary.change_rate));
    }

    #[test]
    fn stricter_iou_threshold_never_adds_pairs(
        earlier in arb_set(),
        recent in arb_set(),
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        let (loose, strict) = (a.min(b), a.max(b));
        let pairs = |iou: f64| {
            ChangeMatcher::new(MatchParams::new(iou, 0.3))
                .unwrap()
                .compare(&earlier, &recent, ImageSize::new(256, 256))
                .pairs
                .len()
        };
        prop_assert!(pairs(strict) <= pairs(loose), "loose {} strict {}", loose, strict);
    }

    #[test]
    fn comparison_is_deterministic(earlier in arb_set(), recent in arb_set()) {
        let matcher = ChangeMatcher::new(MatchParams::default()).unwrap();
        let first = matcher.compare(&earlier, &recent, ImageSize::new(256, 256));
        let second = matcher.compare(&earlier, &recent, ImageSize::new(256, 256));
        prop_assert_eq!(first, second);
    }
}
