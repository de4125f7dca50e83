use crate::error::{Error, Result};
use crate::features::{Feature, Observation, design_matrix};
use crate::forest::RandomForest;
use crate::record::Party;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Importance {
    pub feature: Feature,
    /// Mean Gini decrease per tree.
    pub raw: f64,
    /// `raw` min-max scaled to 0..=100.
    pub scaled: f64,
}

/// Impurity importance per feature, most important first.
pub fn variable_importance(model: &RandomForest, features: &[Feature]) -> Vec<Importance> {
    let raw = model.importance();
    let (lo, hi) = raw
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let mut out: Vec<Importance> = features
        .iter()
        .zip(raw)
        .map(|(&feature, &raw)| Importance {
            feature,
            raw,
            scaled: if hi > lo { (raw - lo) / (hi - lo) * 100.0 } else { 100.0 },
        })
        .collect();
    out.sort_by(|a, b| b.raw.total_cmp(&a.raw));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDependence {
    pub feature: Feature,
    /// `(feature value, mean positive-class probability)` per grid point.
    pub points: Vec<(f64, f64)>,
}

/// `n` evenly spaced values from `lo` to `hi`; a single point is `lo`.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// Mean predicted probability of `positive` with `feature` forced to each
/// grid value for every training row, all other features as observed. The
/// grid spans the feature's observed training range.
pub fn partial_dependence(
    model: &RandomForest,
    train: &[Observation],
    features: &[Feature],
    feature: Feature,
    grid_points: usize,
    positive: Party,
) -> Result<PartialDependence> {
    let column = features
        .iter()
        .position(|&f| f == feature)
        .ok_or_else(|| Error::InvalidConfig(format!("{} is not a model feature", feature.name())))?;
    if train.is_empty() {
        return Err(Error::EmptyDataset("no rows for partial dependence".into()));
    }
    let x = design_matrix(train, features);
    let (lo, hi) = x
        .column(column)
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let points = linspace(lo, hi, grid_points)
        .into_par_iter()
        .map(|value| {
            let mut forced: Array2<f64> = x.clone();
            forced.column_mut(column).fill(value);
            let proba = model.predict_proba(forced.view());
            let mean = proba.column(positive.index()).mean().unwrap_or(f64::NAN);
            (value, mean)
        })
        .collect();
    Ok(PartialDependence { feature, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linspace_endpoints() {
        let grid = linspace(0.0, 10.0, 5);
        assert_eq!(grid, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        assert_abs_diff_eq!(linspace(0.0, 1.0, 3)[1], 0.5);
    }
}
