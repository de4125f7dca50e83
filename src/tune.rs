//! Hyperparameter grid search by stratified k-fold cross-validation.
//!
//! Every grid point is scored on the same fold assignment by mean Cohen's
//! kappa. A fold is degenerate when its training or held-out part lacks a
//! class, or its kappa is undefined; such folds are skipped with a warning,
//! and a grid point left without any usable fold scores negative infinity.

use crate::error::{Error, Result};
use crate::forest::{ForestParams, RandomForest, SplitRule};
use crate::metrics::ConfusionMatrix;
use crate::split::stratified_folds;
use linfa::Dataset;
use ndarray::{Axis, Ix1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub mtry: usize,
    pub split_rule: SplitRule,
    pub min_node_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub points: Vec<GridPoint>,
}

impl Grid {
    /// Cartesian product in `mtry`, split rule, min node size order. `mtry`
    /// values above `n_features` are dropped.
    pub fn from_ranges(
        mtry: RangeInclusive<usize>,
        split_rules: &[SplitRule],
        min_node_size: RangeInclusive<usize>,
        n_features: usize,
    ) -> Self {
        let mut points = Vec::new();
        for m in mtry.filter(|&m| m >= 1 && m <= n_features) {
            for &split_rule in split_rules {
                for min_node_size in min_node_size.clone() {
                    points.push(GridPoint {
                        mtry: m,
                        split_rule,
                        min_node_size,
                    });
                }
            }
        }
        Grid { points }
    }
}

/// Cross-validation summary of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    pub point: GridPoint,
    /// Mean fold kappa, or negative infinity without usable folds.
    pub kappa: f64,
    pub kappa_sd: f64,
    pub accuracy: f64,
    pub folds_used: usize,
}

#[derive(Debug, Clone)]
pub struct TuneResult {
    pub results: Vec<GridResult>,
    pub best: GridPoint,
    /// Forest refit on the full training set with `best`.
    pub model: RandomForest,
}

struct FoldScore {
    kappa: f64,
    accuracy: f64,
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sd = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    (mean, sd)
}

fn score_fold(
    dataset: &Dataset<f64, usize, Ix1>,
    folds: &[usize],
    fold: usize,
    params: &ForestParams,
    names: &[String],
    n_classes: usize,
) -> Result<Option<FoldScore>> {
    let (held_out, train): (Vec<usize>, Vec<usize>) =
        (0..folds.len()).partition(|&i| folds[i] == fold);
    let y = &dataset.targets;
    let has_all_classes = |rows: &[usize]| {
        (0..n_classes).all(|c| rows.iter().any(|&i| y[i] == c))
    };
    if !has_all_classes(&train) || !has_all_classes(&held_out) {
        log::warn!(
            target: crate::LOG_TARGET,
            "fold {fold} lacks a class ({} train / {} held out rows); skipped",
            train.len(),
            held_out.len()
        );
        return Ok(None);
    }

    let x_train = dataset.records.select(Axis(0), &train);
    let y_train: Vec<usize> = train.iter().map(|&i| y[i]).collect();
    let model = params.fit_rows(x_train.view(), &y_train, names)?;

    let x_test = dataset.records.select(Axis(0), &held_out);
    let actual: Vec<usize> = held_out.iter().map(|&i| y[i]).collect();
    let predicted = model.predict(x_test.view()).to_vec();
    let cm = ConfusionMatrix::from_labels(&actual, &predicted, n_classes);
    match cm.kappa() {
        Some(kappa) => Ok(Some(FoldScore {
            kappa,
            accuracy: cm.accuracy(),
        })),
        None => {
            log::warn!(target: crate::LOG_TARGET, "fold {fold} has undefined kappa; skipped");
            Ok(None)
        }
    }
}

/// Scores every grid point with `k`-fold CV, then refits the best one on
/// all of `dataset`. `base` supplies tree count, seed and depth limit.
pub fn tune(
    dataset: &Dataset<f64, usize, Ix1>,
    grid: &Grid,
    k: usize,
    base: &ForestParams,
) -> Result<TuneResult> {
    let n = dataset.targets.len();
    if k < 2 || k > n {
        return Err(Error::InvalidConfig(format!(
            "{k} folds for {n} training rows"
        )));
    }
    if grid.points.is_empty() {
        return Err(Error::InvalidConfig("empty hyperparameter grid".into()));
    }
    let labels = dataset.targets.to_vec();
    let n_classes = base
        .n_classes
        .unwrap_or_else(|| labels.iter().max().map_or(0, |m| m + 1));
    let names = dataset.feature_names();
    let folds = stratified_folds(&labels, k, &mut StdRng::seed_from_u64(base.seed));

    let mut results = Vec::with_capacity(grid.points.len());
    for &point in &grid.points {
        let params = base
            .clone()
            .mtry(point.mtry)
            .min_node_size(point.min_node_size)
            .split_rule(point.split_rule)
            .n_classes(n_classes);
        let scores = (0..k)
            .into_par_iter()
            .map(|fold| score_fold(dataset, &folds, fold, &params, &names, n_classes))
            .collect::<Result<Vec<_>>>()?;
        let scores: Vec<FoldScore> = scores.into_iter().flatten().collect();

        let result = if scores.is_empty() {
            GridResult {
                point,
                kappa: f64::NEG_INFINITY,
                kappa_sd: f64::NAN,
                accuracy: f64::NAN,
                folds_used: 0,
            }
        } else {
            let kappas: Vec<f64> = scores.iter().map(|s| s.kappa).collect();
            let (kappa, kappa_sd) = mean_sd(&kappas);
            let accuracy = scores.iter().map(|s| s.accuracy).sum::<f64>() / scores.len() as f64;
            GridResult {
                point,
                kappa,
                kappa_sd,
                accuracy,
                folds_used: scores.len(),
            }
        };
        log::debug!(
            target: crate::LOG_TARGET,
            "mtry={} {:?} min_node_size={}: kappa {:.4} (sd {:.4}) accuracy {:.4} over {} folds",
            point.mtry,
            point.split_rule,
            point.min_node_size,
            result.kappa,
            result.kappa_sd,
            result.accuracy,
            result.folds_used
        );
        results.push(result);
    }

    // First grid point wins ties.
    let best = results
        .iter()
        .fold(None, |best: Option<&GridResult>, r| match best {
            Some(b) if b.kappa >= r.kappa => Some(b),
            _ => Some(r),
        })
        .filter(|r| r.kappa.is_finite())
        .ok_or_else(|| Error::DegenerateSplit("no grid point had a usable fold".into()))?;
    let best_point = best.point;
    log::info!(
        target: crate::LOG_TARGET,
        "best: mtry={} {:?} min_node_size={} (CV kappa {:.4})",
        best_point.mtry,
        best_point.split_rule,
        best_point.min_node_size,
        best.kappa
    );

    let model = base
        .clone()
        .mtry(best_point.mtry)
        .min_node_size(best_point.min_node_size)
        .split_rule(best_point.split_rule)
        .n_classes(n_classes)
        .fit(dataset)?;
    Ok(TuneResult {
        results,
        best: best_point,
        model,
    })
}
