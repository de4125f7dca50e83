//! Random forest classifier.
//!
//! Each tree is grown on a bootstrap sample of the training rows. At every
//! node a random subset of `mtry` features is searched for the binary split
//! with the largest Gini impurity decrease, and nodes stop splitting once they
//! hold `min_node_size` rows or fewer, or are pure. Leaves keep their class
//! frequencies, so the forest's class probability for a row is the mean leaf
//! distribution across trees.
//!
//! Trees are independent and are grown in parallel; tree `t` draws from
//! `StdRng::seed_from_u64(seed + t)`, so a fitted forest depends only on the
//! parameters and the data, not on thread scheduling.

use crate::error::{Error, Result};
use linfa::Dataset;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Ix1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How candidate thresholds are chosen for a feature at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// Every midpoint between consecutive distinct values.
    Gini,
    /// One threshold drawn uniformly between the node's min and max.
    ExtraTrees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub mtry: usize,
    pub min_node_size: usize,
    pub split_rule: SplitRule,
    pub max_depth: Option<usize>,
    /// Class count; inferred from the labels when `None`.
    pub n_classes: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 500,
            mtry: 1,
            min_node_size: 1,
            split_rule: SplitRule::Gini,
            max_depth: None,
            n_classes: None,
            seed: 0,
        }
    }
}

impl ForestParams {
    pub fn new(n_trees: usize) -> Self {
        ForestParams {
            n_trees,
            ..Default::default()
        }
    }

    pub fn mtry(mut self, mtry: usize) -> Self {
        self.mtry = mtry;
        self
    }

    pub fn min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    pub fn split_rule(mut self, split_rule: SplitRule) -> Self {
        self.split_rule = split_rule;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn n_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = Some(n_classes);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&self, dataset: &Dataset<f64, usize, Ix1>) -> Result<RandomForest> {
        let y = dataset.targets.to_vec();
        self.fit_rows(dataset.records.view(), &y, &dataset.feature_names())
    }

    /// Fits on raw rows. Fails on any non-finite feature value, an empty
    /// training set, or parameters that do not fit the data.
    pub fn fit_rows<'a>(
        &'a self,
        x: ArrayView2<'a, f64>,
        y: &'a [usize],
        feature_names: &[String],
    ) -> Result<RandomForest> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            return Err(Error::EmptyDataset("no training rows".into()));
        }
        if y.len() != n_samples {
            return Err(Error::InvalidConfig(format!(
                "{} labels for {n_samples} rows",
                y.len()
            )));
        }
        if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::MissingFeature {
                feature: feature_names
                    .get(col)
                    .cloned()
                    .unwrap_or_else(|| format!("feature-{col}")),
                row,
            });
        }
        if self.mtry == 0 || self.mtry > n_features {
            return Err(Error::InvalidConfig(format!(
                "mtry {} outside 1..={n_features}",
                self.mtry
            )));
        }
        if self.min_node_size == 0 || self.n_trees == 0 {
            return Err(Error::InvalidConfig(
                "min_node_size and n_trees must be positive".into(),
            ));
        }
        let inferred = y.iter().max().map_or(0, |m| m + 1);
        let n_classes = self.n_classes.unwrap_or(inferred);
        if inferred > n_classes {
            return Err(Error::InvalidConfig(format!(
                "label {} outside 0..{n_classes}",
                inferred - 1
            )));
        }

        let grown: Vec<GrownTree> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| grow_tree(x, y, n_classes, self, self.seed.wrapping_add(t as u64)))
            .collect();

        let mut importance = vec![0.0; n_features];
        let mut oob_proba = vec![vec![0.0; n_classes]; n_samples];
        let mut oob_seen = vec![false; n_samples];
        for tree in &grown {
            for (total, d) in importance.iter_mut().zip(&tree.importance) {
                *total += d;
            }
            for &i in &tree.oob {
                let leaf = tree.tree.leaf(x.row(i));
                oob_proba[i].iter_mut().zip(leaf).for_each(|(a, p)| *a += p);
                oob_seen[i] = true;
            }
        }
        importance.iter_mut().for_each(|v| *v /= self.n_trees as f64);

        let oob_rows: Vec<usize> = (0..n_samples).filter(|&i| oob_seen[i]).collect();
        let oob_error = (!oob_rows.is_empty()).then(|| {
            let wrong = oob_rows
                .iter()
                .filter(|&&i| argmax(&oob_proba[i]) != y[i])
                .count();
            wrong as f64 / oob_rows.len() as f64
        });

        let forest = RandomForest {
            trees: grown.into_iter().map(|g| g.tree).collect(),
            n_features,
            n_classes,
            params: self.clone(),
            importance,
            oob_error,
        };
        log::debug!(
            target: crate::LOG_TARGET,
            "grew {} trees (mtry={}, min_node_size={}, {:?}): {} nodes, OOB error {:?}",
            forest.trees.len(),
            self.mtry,
            self.min_node_size,
            self.split_rule,
            forest.total_nodes(),
            forest.oob_error
        );
        Ok(forest)
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

/// Index of the largest value; ties go to the lower index.
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary classification tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Class distribution of the leaf `row` falls into.
    pub fn leaf(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => at = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match &nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct GrownTree {
    tree: DecisionTree,
    importance: Vec<f64>,
    oob: Vec<usize>,
}

struct Split {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

struct Grower<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    rng: StdRng,
    nodes: Vec<Node>,
    importance: Vec<f64>,
}

fn grow_tree<'a>(
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a ForestParams,
    seed: u64,
) -> GrownTree {
    let (n, n_features) = x.dim();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut in_bag = vec![false; n];
    let mut samples: Vec<usize> = (0..n)
        .map(|_| {
            let i = rng.random_range(0..n);
            in_bag[i] = true;
            i
        })
        .collect();
    let oob = (0..n).filter(|&i| !in_bag[i]).collect();

    let mut grower = Grower {
        x: x.reborrow(),
        y,
        n_classes,
        params,
        rng,
        nodes: Vec::new(),
        importance: vec![0.0; n_features],
    };
    grower.build(&mut samples, 0);
    GrownTree {
        tree: DecisionTree {
            nodes: grower.nodes,
        },
        importance: grower.importance,
        oob,
    }
}

impl Grower<'_> {
    fn build(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let n = samples.len();
        let mut counts = vec![0usize; self.n_classes];
        for &s in samples.iter() {
            counts[self.y[s]] += 1;
        }
        let impurity = gini(&counts, n);
        let at = self.nodes.len();
        let distribution = counts.iter().map(|&c| c as f64 / n as f64).collect();
        self.nodes.push(Node::Leaf { distribution });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if n <= self.params.min_node_size || impurity == 0.0 || depth_reached {
            return at;
        }
        let Some(split) = self.best_split(samples, &counts, impurity) else {
            return at;
        };

        self.importance[split.feature] += split.decrease;
        let (mut left, mut right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| self.x[[s, split.feature]] <= split.threshold);
        let left_at = self.build(&mut left, depth + 1);
        let right_at = self.build(&mut right, depth + 1);
        self.nodes[at] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_at,
            right: right_at,
        };
        at
    }

    /// Best split over `mtry` random features, or `None` when every
    /// candidate feature is constant in the node.
    fn best_split(&mut self, samples: &[usize], counts: &[usize], impurity: f64) -> Option<Split> {
        let n = samples.len();
        let parent = n as f64 * impurity;
        let candidates = rand::seq::index::sample(&mut self.rng, self.x.ncols(), self.params.mtry);
        let mut best: Option<Split> = None;

        for feature in candidates.iter() {
            let mut values: Vec<(f64, usize)> = samples
                .iter()
                .map(|&s| (self.x[[s, feature]], self.y[s]))
                .collect();
            values.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (lo, hi) = (values[0].0, values[n - 1].0);
            if lo == hi {
                continue;
            }

            let found = match self.params.split_rule {
                SplitRule::Gini => best_threshold(&values, counts, self.n_classes),
                SplitRule::ExtraTrees => {
                    let threshold = self.rng.random_range(lo..hi);
                    let split_at = values.partition_point(|v| v.0 <= threshold);
                    Some((threshold, children_impurity(&values, split_at, counts, self.n_classes)))
                }
            };
            if let Some((threshold, child)) = found {
                let decrease = parent - child;
                if best.as_ref().is_none_or(|b| decrease > b.decrease) {
                    best = Some(Split {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

/// `n_l·gini(l) + n_r·gini(r)` when the first `split_at` sorted values go left.
fn children_impurity(
    values: &[(f64, usize)],
    split_at: usize,
    counts: &[usize],
    n_classes: usize,
) -> f64 {
    let mut left = vec![0usize; n_classes];
    for &(_, label) in &values[..split_at] {
        left[label] += 1;
    }
    let right: Vec<usize> = counts.iter().zip(&left).map(|(c, l)| c - l).collect();
    let n_right = values.len() - split_at;
    split_at as f64 * gini(&left, split_at) + n_right as f64 * gini(&right, n_right)
}

/// Sweeps midpoints between distinct sorted values, returning the threshold
/// with the lowest weighted child impurity.
fn best_threshold(
    values: &[(f64, usize)],
    counts: &[usize],
    n_classes: usize,
) -> Option<(f64, f64)> {
    let n = values.len();
    let mut left = vec![0usize; n_classes];
    let mut best: Option<(f64, f64)> = None;
    for i in 0..n - 1 {
        left[values[i].1] += 1;
        if values[i].0 == values[i + 1].0 {
            continue;
        }
        let n_left = i + 1;
        let right: Vec<usize> = counts.iter().zip(&left).map(|(c, l)| c - l).collect();
        let child =
            n_left as f64 * gini(&left, n_left) + (n - n_left) as f64 * gini(&right, n - n_left);
        if best.is_none_or(|(_, b)| child < b) {
            let threshold = values[i].0 + (values[i + 1].0 - values[i].0) / 2.0;
            best = Some((threshold, child));
        }
    }
    best
}

/// A fitted ensemble of [`DecisionTree`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    n_classes: usize,
    params: ForestParams,
    importance: Vec<f64>,
    oob_error: Option<f64>,
}

impl RandomForest {
    /// Mean leaf class distribution across trees.
    pub fn predict_proba_row(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut proba = vec![0.0; self.n_classes];
        for tree in &self.trees {
            proba
                .iter_mut()
                .zip(tree.leaf(row))
                .for_each(|(a, p)| *a += p);
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        proba
    }

    /// Row-by-class probability matrix.
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.outer_iter().enumerate() {
            for (c, p) in self.predict_proba_row(row).into_iter().enumerate() {
                out[[i, c]] = p;
            }
        }
        out
    }

    /// Most probable class per row; ties go to the lower class index.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<usize> {
        x.outer_iter()
            .map(|row| argmax(&self.predict_proba_row(row)))
            .collect()
    }

    /// Gini decrease per feature, summed over each tree's splits and
    /// averaged over trees.
    pub fn importance(&self) -> &[f64] {
        &self.importance
    }

    /// Misclassification rate of out-of-bag votes, when any row was out of bag.
    pub fn oob_error(&self) -> Option<f64> {
        self.oob_error
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    pub const fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn total_nodes(&self) -> usize {
        self.trees.iter().map(DecisionTree::n_nodes).sum()
    }

    pub fn avg_depth(&self) -> f64 {
        let total: usize = self.trees.iter().map(DecisionTree::depth).sum();
        total as f64 / self.trees.len() as f64
    }
}
