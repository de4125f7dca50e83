//! Classification metrics: confusion matrix, accuracy, Cohen's kappa, ROC
//! and precision-recall curves.

use serde::{Deserialize, Serialize};

/// Counts of actual (rows) against predicted (columns) classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_labels(actual: &[usize], predicted: &[usize], n_classes: usize) -> Self {
        let mut counts = vec![vec![0; n_classes]; n_classes];
        for (&a, &p) in actual.iter().zip(predicted) {
            counts[a][p] += 1;
        }
        ConfusionMatrix { counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.counts.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        self.correct() as f64 / self.total() as f64
    }

    /// Cohen's kappa; `None` when there are no observations or chance
    /// agreement is already perfect (a single class on both sides).
    pub fn kappa(&self) -> Option<f64> {
        let n = self.total() as f64;
        if n == 0.0 {
            return None;
        }
        let k = self.counts.len();
        let expected: f64 = (0..k)
            .map(|i| {
                let row: usize = self.counts[i].iter().sum();
                let col: usize = self.counts.iter().map(|r| r[i]).sum();
                (row as f64 / n) * (col as f64 / n)
            })
            .sum();
        if (1.0 - expected).abs() < f64::EPSILON {
            return None;
        }
        Some((self.accuracy() - expected) / (1.0 - expected))
    }
}

/// Fraction of positions where `predicted` equals `actual`.
pub fn accuracy(actual: &[usize], predicted: &[usize]) -> f64 {
    let correct = actual.iter().zip(predicted).filter(|(a, p)| a == p).count();
    correct as f64 / actual.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub threshold: f64,
    pub fpr: f64,
    pub tpr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrPoint {
    pub threshold: f64,
    pub recall: f64,
    pub precision: f64,
}

/// Indices sorted by descending score, grouped by equal score.
fn score_groups(scores: &[f64]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for i in order {
        match groups.last_mut() {
            Some(g) if scores[g[0]] == scores[i] => g.push(i),
            _ => groups.push(vec![i]),
        }
    }
    groups
}

/// ROC curve with one point per distinct score, from (0, 0) to (1, 1).
/// Rows scoring at or above a threshold are called positive. `None` unless
/// both classes are present.
pub fn roc_curve(scores: &[f64], positives: &[bool]) -> Option<Vec<RocPoint>> {
    let p = positives.iter().filter(|&&b| b).count();
    let n = positives.len() - p;
    if p == 0 || n == 0 {
        return None;
    }
    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        fpr: 0.0,
        tpr: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for group in score_groups(scores) {
        for &i in &group {
            if positives[i] {
                tp += 1;
            } else {
                fp += 1;
            }
        }
        points.push(RocPoint {
            threshold: scores[group[0]],
            fpr: fp as f64 / n as f64,
            tpr: tp as f64 / p as f64,
        });
    }
    Some(points)
}

/// Trapezoidal area under a curve given as `(x, y)` pairs in x order.
pub fn trapezoid(points: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let mut iter = points.into_iter();
    let Some(mut prev) = iter.next() else {
        return 0.0;
    };
    let mut area = 0.0;
    for next in iter {
        area += (next.0 - prev.0) * (next.1 + prev.1) / 2.0;
        prev = next;
    }
    area
}

/// Trapezoidal area under a ROC curve.
pub fn auc(curve: &[RocPoint]) -> f64 {
    trapezoid(curve.iter().map(|p| (p.fpr, p.tpr)))
}

/// Precision-recall curve with one point per distinct score, starting at
/// recall 0 and precision 1. `None` without any positive rows.
pub fn pr_curve(scores: &[f64], positives: &[bool]) -> Option<Vec<PrPoint>> {
    let p = positives.iter().filter(|&&b| b).count();
    if p == 0 {
        return None;
    }
    let mut points = vec![PrPoint {
        threshold: f64::INFINITY,
        recall: 0.0,
        precision: 1.0,
    }];
    let (mut tp, mut called) = (0usize, 0usize);
    for group in score_groups(scores) {
        called += group.len();
        tp += group.iter().filter(|&&i| positives[i]).count();
        points.push(PrPoint {
            threshold: scores[group[0]],
            recall: tp as f64 / p as f64,
            precision: tp as f64 / called as f64,
        });
    }
    Some(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn confusion_matrix_agrees_with_direct_accuracy() {
        let actual = [0, 0, 1, 1, 1, 0, 1];
        let predicted = [0, 1, 1, 1, 0, 0, 1];
        let cm = ConfusionMatrix::from_labels(&actual, &predicted, 2);
        assert_eq!(cm.counts, vec![vec![2, 1], vec![1, 3]]);
        assert_eq!(cm.total(), actual.len());
        assert_abs_diff_eq!(cm.accuracy(), accuracy(&actual, &predicted));
    }

    #[test]
    fn kappa_values() {
        let perfect = ConfusionMatrix::from_labels(&[0, 1, 0, 1], &[0, 1, 0, 1], 2);
        assert_abs_diff_eq!(perfect.kappa().unwrap(), 1.0);

        // po = 0.7, pe = 0.5*0.6 + 0.5*0.4 = 0.5
        let cm = ConfusionMatrix {
            counts: vec![vec![4, 1], vec![2, 3]],
        };
        assert_abs_diff_eq!(cm.kappa().unwrap(), 0.4, epsilon = 1e-12);

        let single = ConfusionMatrix::from_labels(&[1, 1, 1], &[1, 1, 1], 2);
        assert_eq!(single.kappa(), None);
    }

    #[test]
    fn roc_of_perfect_and_inverted_scores() {
        let positives = [true, true, false, false];
        let curve = roc_curve(&[0.9, 0.8, 0.3, 0.1], &positives).unwrap();
        assert_eq!(curve.first().map(|p| (p.fpr, p.tpr)), Some((0.0, 0.0)));
        assert_eq!(curve.last().map(|p| (p.fpr, p.tpr)), Some((1.0, 1.0)));
        assert_abs_diff_eq!(auc(&curve), 1.0);

        let inverted = roc_curve(&[0.1, 0.3, 0.8, 0.9], &positives).unwrap();
        assert_abs_diff_eq!(auc(&inverted), 0.0);
    }

    #[test]
    fn tied_scores_move_together() {
        let curve = roc_curve(&[0.5, 0.5, 0.5, 0.5], &[true, false, true, false]).unwrap();
        assert_eq!(curve.len(), 2);
        assert_abs_diff_eq!(auc(&curve), 0.5);
    }

    #[test]
    fn single_class_has_no_roc() {
        assert!(roc_curve(&[0.2, 0.4], &[true, true]).is_none());
    }

    #[test]
    fn precision_recall_points() {
        let curve = pr_curve(&[0.9, 0.8, 0.3, 0.1], &[true, false, true, false]).unwrap();
        let pairs: Vec<(f64, f64)> = curve.iter().map(|p| (p.recall, p.precision)).collect();
        assert_eq!(
            pairs,
            vec![(0.0, 1.0), (0.5, 1.0), (0.5, 0.5), (1.0, 2.0 / 3.0), (1.0, 0.5)]
        );
    }

    proptest! {
        #[test]
        fn auc_is_bounded_and_scale_invariant(
            rows in prop::collection::vec((0u32..1000, any::<bool>()), 2..60),
            factor in 0.05f64..1.0,
        ) {
            let scores: Vec<f64> = rows.iter().map(|(s, _)| *s as f64 / 1000.0).collect();
            let positives: Vec<bool> = rows.iter().map(|(_, p)| *p).collect();
            let scaled: Vec<f64> = scores.iter().map(|s| s * factor).collect();
            if let Some(curve) = roc_curve(&scores, &positives) {
                let a = auc(&curve);
                prop_assert!((0.0..=1.0).contains(&a));
                let b = auc(&roc_curve(&scaled, &positives).unwrap());
                prop_assert!((a - b).abs() < 1e-12);
            }
        }
    }
}
