//! End-to-end run: acquisition, join, filtering, diagnostics, split,
//! tuning, evaluation, interpretation and output files.
//!
//! Each stage takes what the previous one produced and returns its own
//! result; nothing is shared between stages except through those values.

use crate::County2party;
use crate::acquire::{self, CensusClient, Geography};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::evaluate::Evaluation;
use crate::explore::{self, Diagnostics};
use crate::features::{self, Dropped, Observation};
use crate::geometry;
use crate::interpret::{self, Importance, PartialDependence};
use crate::join::{self, JoinReport};
use crate::plot::{self, PanelSpec};
use crate::record::{CountyRecord, Geometry, Party};
use crate::results::{self, ResultRow};
use crate::split::{self, DatasetSplit};
use crate::tune::{GridPoint, GridResult};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The positive class of every binary metric.
pub const POSITIVE: Party = Party::Democrat;

/// Input files of a run.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// Counties CSV cache. Read when it exists, otherwise filled from the API.
    pub counties: Option<PathBuf>,
    pub results: PathBuf,
    pub geometry: Option<PathBuf>,
}

/// Everything a run learned, written as `report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub config: Config,
    pub join: JoinReport,
    /// Counties won by a party outside the model classes.
    pub other_party_winners: usize,
    pub skipped_result_rows: usize,
    pub dropped: Vec<Dropped>,
    pub modeled_counties: usize,
    pub train_counties: usize,
    pub test_counties: usize,
    pub diagnostics: Diagnostics,
    pub cv: Vec<GridResult>,
    pub best: GridPoint,
    pub oob_error: Option<f64>,
    pub evaluation: Evaluation,
    pub importance: Vec<Importance>,
    pub partial_dependence: Vec<PartialDependence>,
}

pub struct Run {
    pub report: Report,
    pub classifier: County2party,
    pub observations: Vec<Observation>,
    pub split: DatasetSplit,
}

/// Reads the counties cache, or fetches from the Census API and writes it.
pub fn load_counties(config: &Config, cache: Option<&Path>) -> Result<Vec<CountyRecord>> {
    if let Some(path) = cache.filter(|p| p.exists()) {
        log::info!(target: crate::LOG_TARGET, "reading counties from {path:?}");
        return acquire::read_counties_csv(path);
    }
    let client = CensusClient::new(config.api_key.clone());
    let records = client.fetch(&acquire::default_variables(), &Geography::County, config.year)?;
    if let Some(path) = cache {
        acquire::write_counties_csv(path, &records)?;
        log::info!(target: crate::LOG_TARGET, "cached {} counties to {path:?}", records.len());
    }
    Ok(records)
}

/// Runs every stage from files on disk.
pub fn run(config: &Config, sources: &Sources) -> Result<Run> {
    config.validate()?;
    let records = load_counties(config, sources.counties.as_deref())?;
    let rows = results::read_results_csv(&sources.results)?;
    let shapes = match &sources.geometry {
        Some(path) => Some(geometry::load_geometry(path, &config.geometry_id_property)?),
        None => None,
    };
    run_with(config, records, &rows, shapes)
}

/// Runs every stage after acquisition on in-memory inputs.
pub fn run_with(
    config: &Config,
    records: Vec<CountyRecord>,
    rows: &[ResultRow],
    shapes: Option<HashMap<String, Geometry>>,
) -> Result<Run> {
    config.validate()?;
    let winners = results::county_winners(rows, config.year);
    let (mut joined, join_report) = join::inner_join(records, &winners);
    if let Some(shapes) = shapes {
        let attached = geometry::attach_geometry(&mut joined, shapes);
        log::info!(target: crate::LOG_TARGET, "attached geometry to {attached} counties");
    }

    let (observations, dropped) =
        features::filter_for_model(joined, &config.features, config.missing_policy);
    if observations.is_empty() {
        return Err(Error::EmptyDataset("no county survived joining and filtering".into()));
    }
    let diagnostics = explore::diagnose(
        &observations,
        &config.features,
        config.correlation_flag,
        config.correlation_redundancy,
    );

    let split = split::holdout_stratified_split(
        &observations,
        &config.holdout_region,
        config.train_fraction,
        config.seed,
    )?;
    let classifier = County2party::train(&split.train, &config.features, config)?;
    let evaluation = classifier.evaluate_on(&split.test)?;

    let importance = interpret::variable_importance(classifier.model(), &config.features);
    let partial_dependence = config
        .pd_features
        .iter()
        .map(|&f| {
            interpret::partial_dependence(
                classifier.model(),
                &split.train,
                &config.features,
                f,
                config.pd_grid_points,
                POSITIVE,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let report = Report {
        config: config.clone(),
        join: join_report,
        other_party_winners: winners.other_party.len(),
        skipped_result_rows: winners.skipped_rows,
        dropped,
        modeled_counties: observations.len(),
        train_counties: split.train.len(),
        test_counties: split.test.len(),
        diagnostics,
        cv: classifier.cv.clone(),
        best: classifier.best,
        oob_error: classifier.model().oob_error(),
        evaluation,
        importance,
        partial_dependence,
    };
    Ok(Run {
        report,
        classifier,
        observations,
        split,
    })
}

/// Writes figures, `report.json` and `model.msgpack` under `config.out_dir`.
pub fn write_outputs(config: &Config, run: &Run) -> Result<()> {
    let out = &config.out_dir;
    std::fs::create_dir_all(out)?;
    let sizes = &config.plot_sizes;
    let report = &run.report;

    plot::correlation_heatmap(
        &out.join("correlation.svg"),
        &report.diagnostics.correlation,
        &report.diagnostics.features,
        sizes.correlation,
    )?;
    match (&report.evaluation.roc, report.evaluation.auc) {
        (Some(roc), Some(auc)) => plot::roc_plot(&out.join("roc.svg"), roc, auc, sizes.curve)?,
        _ => log::warn!(target: crate::LOG_TARGET, "no ROC curve to plot"),
    }
    if let Some(pr) = &report.evaluation.pr {
        plot::pr_plot(&out.join("pr.svg"), pr, sizes.curve)?;
    }
    plot::importance_plot(&out.join("importance.svg"), &report.importance, sizes.importance)?;

    let panels: Vec<PanelSpec> = config.pd_features.iter().map(|&f| PanelSpec::new(f)).collect();
    plot::partial_dependence_plot(
        &out.join("partial_dependence.svg"),
        &panels,
        &report.partial_dependence,
        &run.split.train,
        POSITIVE,
        sizes.partial_dependence,
    )?;

    let records: Vec<CountyRecord> = run.observations.iter().map(|o| o.record.clone()).collect();
    let predicted: HashMap<String, f64> = run
        .classifier
        .predict_records(&records)?
        .into_iter()
        .zip(&records)
        .map(|(p, r)| (r.fips.clone(), p.probability(POSITIVE)))
        .collect();
    plot::choropleth_maps(
        &out.join("maps.svg"),
        &run.observations,
        &predicted,
        POSITIVE,
        sizes.maps,
    )?;

    let file = std::fs::File::create(out.join("report.json"))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    run.classifier.save_to_file(&out.join("model.msgpack"))?;
    log::info!(target: crate::LOG_TARGET, "wrote outputs to {out:?}");
    Ok(())
}
