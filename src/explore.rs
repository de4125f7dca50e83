//! Exploratory statistics and predictor redundancy checks.
//!
//! Everything here is diagnostic: results are logged and reported but never
//! change which features the model is trained on.

use crate::features::{Feature, Observation, design_matrix};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Summary statistics of one predictor over non-missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub feature: String,
    pub n: usize,
    pub missing: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub mean: f64,
    pub q3: f64,
    pub max: f64,
    pub sd: f64,
}

/// Linear-interpolated quantile of sorted data (the common "type 7" rule).
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Per-column summary, ignoring missing values.
pub fn summarize(x: &Array2<f64>, names: &[String]) -> Vec<FeatureSummary> {
    x.axis_iter(Axis(1))
        .zip(names)
        .map(|(col, name)| {
            let mut values: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            values.sort_by(f64::total_cmp);
            let n = values.len();
            let mean = values.iter().sum::<f64>() / n as f64;
            let sd = if n > 1 {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
            } else {
                f64::NAN
            };
            FeatureSummary {
                feature: name.clone(),
                n,
                missing: col.len() - n,
                min: values.first().copied().unwrap_or(f64::NAN),
                q1: quantile(&values, 0.25),
                median: quantile(&values, 0.5),
                mean,
                q3: quantile(&values, 0.75),
                max: values.last().copied().unwrap_or(f64::NAN),
                sd,
            }
        })
        .collect()
}

/// Pearson correlation over rows where both values are present.
pub fn pearson_complete(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let (mx, my) = pairs
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x / n, sy + y / n));
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Symmetric predictor-by-predictor correlation matrix.
pub fn correlation_matrix(x: &Array2<f64>) -> Array2<f64> {
    let p = x.ncols();
    let mut corr = Array2::from_elem((p, p), f64::NAN);
    for i in 0..p {
        let ci = x.column(i);
        let self_r = pearson_complete(ci, ci);
        corr[[i, i]] = if self_r.is_nan() { f64::NAN } else { 1.0 };
        for j in (i + 1)..p {
            let r = pearson_complete(ci, x.column(j));
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedPair {
    pub a: String,
    pub b: String,
    pub r: f64,
}

/// Unordered pairs with `|r| > cutoff`, strongest first.
pub fn high_correlations(corr: &Array2<f64>, names: &[String], cutoff: f64) -> Vec<CorrelatedPair> {
    let p = corr.nrows();
    let mut pairs: Vec<CorrelatedPair> = (0..p)
        .flat_map(|i| ((i + 1)..p).map(move |j| (i, j)))
        .filter(|&(i, j)| corr[[i, j]].abs() > cutoff)
        .map(|(i, j)| CorrelatedPair {
            a: names[i].clone(),
            b: names[j].clone(),
            r: corr[[i, j]],
        })
        .collect();
    pairs.sort_by(|x, y| y.r.abs().total_cmp(&x.r.abs()));
    pairs
}

/// Indices whose removal leaves every remaining pair at `|r| <= cutoff`.
///
/// Greedy: while a violating pair exists, drop the predictor from a
/// violating pair with the highest mean absolute correlation to the other
/// remaining predictors. Ties go to the lower index.
pub fn find_redundant(corr: &Array2<f64>, cutoff: f64) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..corr.nrows()).collect();
    let mut removed = Vec::new();

    loop {
        let mut in_violation = vec![false; corr.nrows()];
        for (a, &i) in remaining.iter().enumerate() {
            for &j in &remaining[a + 1..] {
                if corr[[i, j]].abs() > cutoff {
                    in_violation[i] = true;
                    in_violation[j] = true;
                }
            }
        }

        let mean_abs = |i: usize| {
            let rs: Vec<f64> = remaining
                .iter()
                .filter(|&&j| j != i)
                .map(|&j| corr[[i, j]].abs())
                .filter(|r| !r.is_nan())
                .collect();
            rs.iter().sum::<f64>() / rs.len().max(1) as f64
        };
        let worst = remaining
            .iter()
            .copied()
            .filter(|&i| in_violation[i])
            .map(|i| (i, mean_abs(i)))
            .fold(None, |best: Option<(usize, f64)>, (i, m)| match best {
                Some((_, bm)) if bm >= m => best,
                _ => Some((i, m)),
            });

        let Some((drop, _)) = worst else { break };
        remaining.retain(|&i| i != drop);
        removed.push(drop);
    }
    removed
}

/// A column numerically equal to a combination of earlier columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearCombo {
    pub column: usize,
    pub depends_on: Vec<usize>,
}

/// Detects linear dependencies among columns (rows with any missing value
/// are ignored) by modified Gram-Schmidt. A column whose residual after
/// projection onto the earlier independent columns is within `tol` of its
/// own norm is reported with the columns that reconstruct it.
pub fn find_linear_combos(x: &Array2<f64>, tol: f64) -> Vec<LinearCombo> {
    let rows: Vec<usize> = (0..x.nrows())
        .filter(|&r| x.row(r).iter().all(|v| v.is_finite()))
        .collect();
    let col = |j: usize| -> Vec<f64> { rows.iter().map(|&r| x[[r, j]]).collect() };
    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();

    // `basis[k]` is orthonormal; `r[k]` holds the projections of accepted
    // column k onto basis 0..=k.
    let mut accepted: Vec<usize> = Vec::new();
    let mut basis: Vec<Vec<f64>> = Vec::new();
    let mut r: Vec<Vec<f64>> = Vec::new();
    let mut combos = Vec::new();

    for j in 0..x.ncols() {
        let original = col(j);
        let norm0 = dot(&original, &original).sqrt();
        let mut v = original;
        let mut coeffs = Vec::with_capacity(basis.len());
        for q in &basis {
            let c = dot(q, &v);
            v.iter_mut().zip(q).for_each(|(vi, qi)| *vi -= c * qi);
            coeffs.push(c);
        }
        let norm = dot(&v, &v).sqrt();

        if norm <= tol * norm0.max(f64::MIN_POSITIVE) {
            // Back-substitute R b = c for the combination weights.
            let n = accepted.len();
            let mut b = vec![0.0; n];
            for m in (0..n).rev() {
                let tail: f64 = ((m + 1)..n).map(|l| r[l][m] * b[l]).sum();
                b[m] = (coeffs[m] - tail) / r[m][m];
            }
            let scale = norm0.max(1.0);
            combos.push(LinearCombo {
                column: j,
                depends_on: accepted
                    .iter()
                    .zip(&b)
                    .filter(|(_, w)| w.abs() * scale > 1e-8)
                    .map(|(&c, _)| c)
                    .collect(),
            });
        } else {
            coeffs.push(norm);
            v.iter_mut().for_each(|vi| *vi /= norm);
            basis.push(v);
            r.push(coeffs);
            accepted.push(j);
        }
    }
    combos
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearZeroVariance {
    pub feature: String,
    pub freq_ratio: f64,
    pub percent_unique: f64,
    pub zero_var: bool,
}

/// Flags predictors dominated by one value: zero variance, or a most- to
/// second-most-common ratio above `freq_cut` with at most `unique_cut`
/// percent distinct values.
pub fn near_zero_variance(
    x: &Array2<f64>,
    names: &[String],
    freq_cut: f64,
    unique_cut: f64,
) -> Vec<NearZeroVariance> {
    let mut flagged = Vec::new();
    for (col, name) in x.axis_iter(Axis(1)).zip(names) {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        let mut n = 0usize;
        for v in col.iter().filter(|v| !v.is_nan()) {
            // -0.0 and 0.0 count as one value.
            *counts.entry((v + 0.0).to_bits()).or_default() += 1;
            n += 1;
        }
        let mut freqs: Vec<usize> = counts.values().copied().collect();
        freqs.sort_unstable_by(|a, b| b.cmp(a));

        let zero_var = freqs.len() <= 1;
        let freq_ratio = match freqs.as_slice() {
            [first, second, ..] => *first as f64 / *second as f64,
            _ => 0.0,
        };
        let percent_unique = if n == 0 {
            0.0
        } else {
            freqs.len() as f64 / n as f64 * 100.0
        };
        if zero_var || (freq_ratio > freq_cut && percent_unique <= unique_cut) {
            flagged.push(NearZeroVariance {
                feature: name.clone(),
                freq_ratio,
                percent_unique,
                zero_var,
            });
        }
    }
    flagged
}

/// Every exploratory diagnostic for one feature set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub features: Vec<String>,
    pub summaries: Vec<FeatureSummary>,
    /// Row-major correlation matrix.
    pub correlation: Vec<Vec<f64>>,
    pub high_correlations: Vec<CorrelatedPair>,
    pub redundant: Vec<String>,
    pub linear_combos: Vec<(String, Vec<String>)>,
    pub near_zero_variance: Vec<NearZeroVariance>,
}

/// Runs every diagnostic over the predictor matrix and logs the findings.
pub fn diagnose(
    observations: &[Observation],
    features: &[Feature],
    flag_cutoff: f64,
    redundancy_cutoff: f64,
) -> Diagnostics {
    let names: Vec<String> = features.iter().map(|f| f.name()).collect();
    let x = design_matrix(observations, features);
    let corr = correlation_matrix(&x);

    let diagnostics = Diagnostics {
        summaries: summarize(&x, &names),
        correlation: corr.outer_iter().map(|row| row.to_vec()).collect(),
        high_correlations: high_correlations(&corr, &names, flag_cutoff),
        redundant: find_redundant(&corr, redundancy_cutoff)
            .into_iter()
            .map(|i| names[i].clone())
            .collect(),
        linear_combos: find_linear_combos(&x, 1e-7)
            .into_iter()
            .map(|c| {
                (
                    names[c.column].clone(),
                    c.depends_on.iter().map(|&i| names[i].clone()).collect(),
                )
            })
            .collect(),
        near_zero_variance: near_zero_variance(&x, &names, 95.0 / 5.0, 10.0),
        features: names,
    };

    for pair in &diagnostics.high_correlations {
        log::info!(
            target: crate::LOG_TARGET,
            "|r| > {flag_cutoff}: {} ~ {} ({:.3})",
            pair.a,
            pair.b,
            pair.r
        );
    }
    if !diagnostics.redundant.is_empty() {
        log::info!(
            target: crate::LOG_TARGET,
            "removing {:?} would bring all |r| to {redundancy_cutoff} or below",
            diagnostics.redundant
        );
    }
    for (column, deps) in &diagnostics.linear_combos {
        log::warn!(target: crate::LOG_TARGET, "{column} is a linear combination of {deps:?}");
    }
    for nzv in &diagnostics.near_zero_variance {
        log::warn!(target: crate::LOG_TARGET, "near-zero variance predictor: {}", nzv.feature);
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("x{i}")).collect()
    }

    #[test]
    fn pairwise_complete_ignores_missing_rows() {
        let x = array![
            [1.0, 2.0, 5.0],
            [2.0, 4.0, 3.0],
            [3.0, 6.0, f64::NAN],
            [4.0, 8.0, -1.0],
            [f64::NAN, 1.0, 0.0],
        ];
        let corr = correlation_matrix(&x);
        assert_abs_diff_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(corr[[0, 2]], -1.0, epsilon = 1e-12);
        assert_eq!(corr[[2, 0]], corr[[0, 2]]);
        assert_eq!(corr[[1, 1]], 1.0);
    }

    #[test]
    fn flags_pairs_above_cutoff() {
        let corr = array![[1.0, 0.7, 0.1], [0.7, 1.0, -0.65], [0.1, -0.65, 1.0]];
        let pairs = high_correlations(&corr, &names(3), 0.6);
        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].a.as_str(), pairs[0].b.as_str()), ("x0", "x1"));
        assert_eq!(pairs[1].r, -0.65);
    }

    #[test]
    fn greedy_redundancy_drops_the_hub() {
        // x1 is highly correlated with both x0 and x2.
        let corr = array![
            [1.0, 0.95, 0.5, 0.1],
            [0.95, 1.0, 0.92, 0.3],
            [0.5, 0.92, 1.0, 0.2],
            [0.1, 0.3, 0.2, 1.0],
        ];
        assert_eq!(find_redundant(&corr, 0.9), vec![1]);
        assert!(find_redundant(&corr, 0.99).is_empty());
    }

    #[test]
    fn detects_linear_combination() {
        let x = array![
            [1.0, 2.0, 3.0, 4.0],
            [2.0, 1.0, 3.0, 7.0],
            [3.0, 5.0, 8.0, 1.0],
            [4.0, 3.0, 7.0, 2.0],
            [5.0, 9.0, 14.0, 0.5],
        ];
        let combos = find_linear_combos(&x, 1e-7);
        assert_eq!(
            combos,
            vec![LinearCombo {
                column: 2,
                depends_on: vec![0, 1]
            }]
        );
    }

    #[test]
    fn near_zero_variance_heuristic() {
        let mut x = Array2::zeros((100, 3));
        for i in 0..100 {
            x[[i, 0]] = i as f64;
            x[[i, 1]] = if i < 2 { 1.0 } else { 0.0 };
        }
        let flagged = near_zero_variance(&x, &names(3), 19.0, 10.0);
        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].feature, "x1");
        assert_abs_diff_eq!(flagged[0].freq_ratio, 49.0);
        assert!(!flagged[0].zero_var);
        assert_eq!(flagged[1].feature, "x2");
        assert!(flagged[1].zero_var);
    }

    #[test]
    fn near_zero_variance_flags_at_unique_cut() {
        // Two distinct values over twenty rows is exactly 10% unique.
        let x = Array2::from_shape_fn((20, 1), |(i, _)| if i == 0 { 1.0 } else { 0.0 });
        let flagged = near_zero_variance(&x, &names(1), 5.0, 10.0);
        assert_eq!(flagged.len(), 1);
        assert_abs_diff_eq!(flagged[0].percent_unique, 10.0);
        assert!(near_zero_variance(&x, &names(1), 5.0, 9.9).is_empty());
    }

    #[test]
    fn quartiles_match_type_seven() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile(&sorted, 0.25), 1.75);
        assert_abs_diff_eq!(quantile(&sorted, 0.5), 2.5);
    }
}
