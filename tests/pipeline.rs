use county2party::features::{Feature, MissingPolicy};
use county2party::forest::SplitRule;
use county2party::pipeline::{self, POSITIVE};
use county2party::record::Geometry;
use county2party::results::ResultRow;
use county2party::split::holdout_stratified_split;
use county2party::{Config, County2party, CountyRecord, Observation, Party};
use linfa::prelude::*;
use std::collections::HashMap;

const FEATURES: [Feature; 3] = [Feature::PctWhite, Feature::PctCollege, Feature::MedianIncome];

/// Ten counties, eight in AL and two in GA. Even counties vote Democrat and
/// have a clearly lower white share.
fn counties() -> Vec<CountyRecord> {
    (0..10)
        .map(|i| {
            let fips = format!("{:05}", if i < 8 { 1001 + 2 * i } else { 13001 + 2 * i });
            let mut record = CountyRecord::new(&fips, &format!("County {i}")).unwrap();
            let democrat = i % 2 == 0;
            record.pct_white = Some(if democrat { 35.0 + i as f64 } else { 82.0 + i as f64 });
            record.pct_college = Some(if democrat { 38.0 } else { 17.0 } + (i % 3) as f64);
            record.median_income = Some(48_000.0 + 1_500.0 * ((i * 7) % 10) as f64);
            record.mean_hours_male = Some(41.0);
            record.mean_hours_female = Some(36.5);
            record
        })
        .collect()
}

fn results(records: &[CountyRecord]) -> Vec<ResultRow> {
    records
        .iter()
        .enumerate()
        .flat_map(|(i, r)| {
            let state = if i < 8 { "AL" } else { "GA" };
            let dem_votes = if i % 2 == 0 { 9_000 } else { 3_000 };
            [
                ("JOSEPH R BIDEN JR", "DEMOCRAT", dem_votes),
                ("DONALD J TRUMP", "REPUBLICAN", 12_000 - dem_votes),
            ]
            .into_iter()
            .map(move |(candidate, party, votes)| ResultRow {
                year: 2020,
                state_po: state.into(),
                county_name: r.name.clone(),
                county_fips: r.fips.trim_start_matches('0').into(),
                candidate: candidate.into(),
                party: party.into(),
                candidatevotes: Some(votes),
            })
        })
        .collect()
}

fn shapes(records: &[CountyRecord]) -> HashMap<String, Geometry> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let x = (i % 5) as f64;
            let y = (i / 5) as f64;
            let ring = vec![(x, y), (x + 1.0, y), (x + 1.0, y + 1.0), (x, y + 1.0), (x, y)];
            (r.fips.clone(), Geometry { rings: vec![ring] })
        })
        .collect()
}

fn fips(observations: &[Observation]) -> Vec<&str> {
    observations.iter().map(Observation::fips).collect()
}

fn config(out_dir: &std::path::Path) -> Config {
    Config {
        features: FEATURES.to_vec(),
        pd_features: vec![Feature::PctWhite, Feature::PctCollege],
        pd_grid_points: 7,
        mtry_range: 1..=2,
        min_leaf_range: 1..=2,
        split_rules: vec![SplitRule::Gini],
        fold_count: 2,
        n_trees: 25,
        missing_policy: MissingPolicy::DropIncomplete,
        out_dir: out_dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn small_grid_beats_majority_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records, &rows, None).unwrap();

    assert_eq!(run.report.modeled_counties, 10);
    assert!(run.report.join.is_empty());
    assert_eq!(run.report.cv.len(), 4);
    assert!(run.split.test.iter().all(|o| o.state == "GA"));
    assert_eq!(run.split.train.len(), 8);

    let train = &run.split.train;
    let majority = Party::ALL
        .iter()
        .map(|&p| train.iter().filter(|o| o.party == p).count())
        .max()
        .unwrap() as f64
        / train.len() as f64;
    assert!(run.classifier.training_accuracy(train) >= majority);

    let evaluation = &run.report.evaluation;
    assert_eq!(evaluation.confusion.total(), run.split.test.len());
    assert!(evaluation.auc.is_some_and(|auc| (0.0..=1.0).contains(&auc)));
}

#[test]
fn partial_dependence_has_requested_points() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records, &rows, None).unwrap();

    assert_eq!(run.report.partial_dependence.len(), 2);
    for curve in &run.report.partial_dependence {
        assert_eq!(curve.points.len(), 7);
        assert!(curve.points.iter().all(|&(_, p)| (0.0..=1.0).contains(&p)));
        assert!(curve.points.windows(2).all(|w| w[0].0 < w[1].0));
    }
}

#[test]
fn split_is_deterministic_and_holds_out_region() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records, &rows, None).unwrap();

    for seed in [1, 117, 4242] {
        let a = holdout_stratified_split(&run.observations, "GA", 0.5, seed).unwrap();
        let b = holdout_stratified_split(&run.observations, "GA", 0.5, seed).unwrap();
        assert_eq!(fips(&a.train), fips(&b.train));
        assert_eq!(fips(&a.test), fips(&b.test));
        assert!(a.train.iter().all(|o| o.state != "GA"));
        let held_out = a.test.iter().filter(|o| o.state == "GA").count();
        assert_eq!(held_out, 2);
    }
}

#[test]
fn saved_model_predicts_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records.clone(), &rows, None).unwrap();

    let path = dir.path().join("model.msgpack");
    run.classifier.save_to_file(&path).unwrap();
    let loaded = County2party::load_from_file(&path).unwrap();

    assert_eq!(loaded.features, run.classifier.features);
    assert_eq!(loaded.best, run.classifier.best);
    let before = run.classifier.predict_records(&records).unwrap();
    let after = loaded.predict_records(&records).unwrap();
    assert_eq!(before, after);

    let (party, p_dem, p_rep) = loaded.predict_with_proba(&records[0]).unwrap();
    assert_eq!(party, before[0].party);
    assert!((p_dem + p_rep - 1.0).abs() < 1e-9);
}

#[test]
fn prediction_rejects_missing_features() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records.clone(), &rows, None).unwrap();

    let mut incomplete = records[3].clone();
    incomplete.median_income = None;
    let err = run.classifier.predict_with_proba(&incomplete).unwrap_err();
    assert!(matches!(err, county2party::Error::MissingFeature { .. }));
}

#[test]
fn confusion_matrix_matches_linfa() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let run = pipeline::run_with(&config, records, &rows, None).unwrap();

    let dataset = county2party::features::to_dataset(&run.split.train, &FEATURES);
    let predicted = run.classifier.model().predict(dataset.records.view());
    let cm = predicted.confusion_matrix(&dataset).unwrap();
    let ours = run.classifier.training_accuracy(&run.split.train);
    assert!((cm.accuracy() as f64 - ours).abs() < 1e-6);
}

#[test]
fn writes_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let records = counties();
    let rows = results(&records);
    let shapes = shapes(&records);
    let run = pipeline::run_with(&config, records, &rows, Some(shapes)).unwrap();
    pipeline::write_outputs(&config, &run).unwrap();

    for file in [
        "correlation.svg",
        "roc.svg",
        "pr.svg",
        "importance.svg",
        "partial_dependence.svg",
        "maps.svg",
        "report.json",
        "model.msgpack",
    ] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }

    let report: serde_json::Value =
        serde_json::from_reader(std::fs::File::open(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["modeled_counties"], 10);
    assert_eq!(report["evaluation"]["positive"], serde_json::json!(POSITIVE));
}
