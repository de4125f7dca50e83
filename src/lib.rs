//! # county2party
//!
//! **county2party** predicts the winning party of U.S. counties in a
//! presidential election from American Community Survey demographics. It
//! joins Census ACS estimates to county election results, derives percentage
//! features, and trains a random forest tuned by stratified k-fold
//! cross-validation on Cohen's kappa, with one state held out for testing.
//!
//! ## Features
//! - Census ACS API client with a CSV cache
//! - Winner extraction and FIPS join diagnostics
//! - Correlation, linear-combination and near-zero-variance diagnostics
//! - Random forest with Gini and extra-trees split rules, impurity importance
//!   and out-of-bag error
//! - ROC/AUC, precision-recall and partial dependence, rendered to SVG
//! - Model persistence with `rmp-serde` (MessagePack)
//! - Benchmarkable with [Criterion](https://crates.io/crates/criterion)
//!
//! ## Example
//! ```no_run
//! use std::path::Path;
//! use county2party::County2party;
//! use county2party::acquire::read_counties_csv;
//! # fn main() -> county2party::Result<()> {
//! let model = County2party::load_from_file(Path::new("model.msgpack"))?;
//! for county in read_counties_csv(Path::new("counties.csv"))? {
//!     let (party, p_dem, p_rep) = model.predict_with_proba(&county)?;
//!     println!("{}: {party} (P_dem {p_dem:.2}, P_rep {p_rep:.2})", county.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod acquire;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod explore;
pub mod features;
pub mod forest;
pub mod geometry;
pub mod interpret;
pub mod join;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod record;
pub mod results;
pub mod split;
pub mod tune;

pub use config::Config;
pub use error::{Error, Result};
pub use features::{Feature, Observation};
pub use record::{CountyRecord, Party};

use evaluate::Evaluation;
use features::{design_matrix, record_matrix};
use forest::{ForestParams, RandomForest};
use rmp_serde::{decode::from_read, encode::write_named};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tune::{Grid, GridPoint, GridResult};

/// Log target of every message from this crate.
pub const LOG_TARGET: &str = "county2party";

/// Class probabilities of one county.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub party: Party,
    pub proba: Vec<f64>,
}

impl Prediction {
    /// Probability of `party`, zero for a class the model never saw.
    pub fn probability(&self, party: Party) -> f64 {
        self.proba.get(party.index()).copied().unwrap_or(0.0)
    }
}

/// Tuned county classifier with the features it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct County2party {
    model: RandomForest,
    pub features: Vec<Feature>,
    pub best: GridPoint,
    /// Cross-validation score of every grid point tried.
    pub cv: Vec<GridResult>,
}

impl County2party {
    /// Tunes over `config`'s grid on `train` and keeps the refit best model.
    pub fn train(train: &[Observation], features: &[Feature], config: &Config) -> Result<Self> {
        let dataset = features::to_dataset(train, features);
        let grid = Grid::from_ranges(
            config.mtry_range.clone(),
            &config.split_rules,
            config.min_leaf_range.clone(),
            features.len(),
        );
        log::info!(
            target: LOG_TARGET,
            "tuning {} grid points with {}-fold CV on {} counties",
            grid.points.len(),
            config.fold_count,
            train.len()
        );
        let base = ForestParams::new(config.n_trees)
            .seed(config.seed)
            .n_classes(Party::ALL.len());
        let tuned = tune::tune(&dataset, &grid, config.fold_count, &base)?;
        Ok(County2party {
            model: tuned.model,
            features: features.to_vec(),
            best: tuned.best,
            cv: tuned.results,
        })
    }

    /// The refit forest.
    pub fn model(&self) -> &RandomForest {
        &self.model
    }

    /// Predicts a county's party and returns it with `P(Democrat)` and
    /// `P(Republican)`. Fails when a model feature is missing.
    pub fn predict_with_proba(&self, record: &CountyRecord) -> Result<(Party, f64, f64)> {
        let prediction = self
            .predict_records(std::slice::from_ref(record))?
            .pop()
            .ok_or_else(|| Error::EmptyDataset("no prediction".into()))?;
        Ok((
            prediction.party,
            prediction.probability(Party::Democrat),
            prediction.probability(Party::Republican),
        ))
    }

    /// Predictions for unlabeled records, in input order.
    pub fn predict_records(&self, records: &[CountyRecord]) -> Result<Vec<Prediction>> {
        let x = record_matrix(records, &self.features);
        if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::MissingFeature {
                feature: self.features[col].name(),
                row,
            });
        }
        x.outer_iter()
            .map(|row| {
                let proba = self.model.predict_proba_row(row);
                let class = forest::argmax(&proba);
                let party = Party::from_index(class).ok_or_else(|| {
                    Error::InvalidConfig(format!("model predicted unknown class {class}"))
                })?;
                Ok(Prediction { party, proba })
            })
            .collect()
    }

    /// Accuracy, kappa, ROC and PR of the model on labeled counties.
    pub fn evaluate_on(&self, observations: &[Observation]) -> Result<Evaluation> {
        evaluate::evaluate(&self.model, observations, &self.features, pipeline::POSITIVE)
    }

    /// Training-set accuracy, the in-sample counterpart of `evaluate_on`.
    pub fn training_accuracy(&self, train: &[Observation]) -> f64 {
        let x = design_matrix(train, &self.features);
        let predicted = self.model.predict(x.view()).to_vec();
        let actual = features::labels(train).to_vec();
        metrics::accuracy(&actual, &predicted)
    }

    /// Displays the most important features by impurity decrease.
    pub fn show_top_features(&self, n: usize) {
        println!("Most Important Features (mean Gini decrease):");
        for imp in interpret::variable_importance(&self.model, &self.features)
            .iter()
            .take(n)
        {
            println!(
                "{:>28} | raw: {:>8.4}, scaled: {:>6.2}",
                imp.feature.name(),
                imp.raw,
                imp.scaled
            );
        }
    }

    /// Saves the model to a binary `.msgpack` file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_named(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads the model from a binary `.msgpack` file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(from_read(reader)?)
    }
}
