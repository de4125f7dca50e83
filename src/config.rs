use crate::error::{Error, Result};
use crate::features::{Feature, MissingPolicy};
use crate::forest::SplitRule;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Pixel dimensions of each rendered figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSizes {
    pub correlation: (u32, u32),
    pub curve: (u32, u32),
    pub importance: (u32, u32),
    pub partial_dependence: (u32, u32),
    pub maps: (u32, u32),
}

impl Default for PlotSizes {
    fn default() -> Self {
        PlotSizes {
            correlation: (1200, 1000),
            curve: (800, 600),
            importance: (900, 700),
            partial_dependence: (1500, 1000),
            maps: (1600, 600),
        }
    }
}

/// Run configuration. Every literal the pipeline depends on lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub year: u16,
    pub holdout_region: String,
    pub train_fraction: f64,
    pub seed: u64,
    pub mtry_range: RangeInclusive<usize>,
    pub min_leaf_range: RangeInclusive<usize>,
    pub split_rules: Vec<SplitRule>,
    pub fold_count: usize,
    pub n_trees: usize,
    pub correlation_flag: f64,
    pub correlation_redundancy: f64,
    pub missing_policy: MissingPolicy,
    pub features: Vec<Feature>,
    pub pd_features: Vec<Feature>,
    pub pd_grid_points: usize,
    pub geometry_id_property: String,
    pub out_dir: PathBuf,
    pub plot_sizes: PlotSizes,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: None,
            year: 2020,
            holdout_region: "GA".to_string(),
            train_fraction: 0.85,
            seed: 117,
            mtry_range: 1..=10,
            min_leaf_range: 1..=15,
            split_rules: vec![SplitRule::Gini],
            fold_count: 10,
            n_trees: 500,
            correlation_flag: 0.6,
            correlation_redundancy: 0.9,
            missing_policy: MissingPolicy::DropIncomplete,
            features: Feature::all(),
            pd_features: vec![
                Feature::PctWhite,
                Feature::PctCollege,
                Feature::MedianIncome,
                Feature::MedianAge,
                Feature::PovertyRate,
                Feature::PctBlack,
            ],
            pd_grid_points: 25,
            geometry_id_property: "GEOID".to_string(),
            out_dir: PathBuf::from("."),
            plot_sizes: PlotSizes::default(),
        }
    }
}

impl Config {
    /// Reads a JSON config; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    /// Rejects fractions, ranges and counts the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_fraction must be in (0, 1], got {}",
                self.train_fraction
            )));
        }
        if self.mtry_range.is_empty() || *self.mtry_range.start() == 0 {
            return Err(Error::InvalidConfig(format!(
                "mtry_range must be a non-empty range starting at 1 or above, got {:?}",
                self.mtry_range
            )));
        }
        if self.min_leaf_range.is_empty() || *self.min_leaf_range.start() == 0 {
            return Err(Error::InvalidConfig(format!(
                "min_leaf_range must be a non-empty range starting at 1 or above, got {:?}",
                self.min_leaf_range
            )));
        }
        if self.split_rules.is_empty() {
            return Err(Error::InvalidConfig("split_rules is empty".into()));
        }
        if self.fold_count < 2 {
            return Err(Error::InvalidConfig(format!(
                "fold_count must be at least 2, got {}",
                self.fold_count
            )));
        }
        if self.n_trees == 0 {
            return Err(Error::InvalidConfig("n_trees must be positive".into()));
        }
        if self.features.is_empty() {
            return Err(Error::InvalidConfig("no model features selected".into()));
        }
        if let Some(f) = self.pd_features.iter().find(|f| !self.features.contains(f)) {
            return Err(Error::InvalidConfig(format!(
                "partial dependence feature `{}` is not a model feature",
                f.name()
            )));
        }
        if self.pd_grid_points == 0 {
            return Err(Error::InvalidConfig("pd_grid_points must be positive".into()));
        }
        for (name, cutoff) in [
            ("correlation_flag", self.correlation_flag),
            ("correlation_redundancy", self.correlation_redundancy),
        ] {
            if !(0.0..=1.0).contains(&cutoff) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {cutoff}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.year, 2020);
        assert_eq!(config.holdout_region, "GA");
        assert_eq!(config.seed, 117);
        assert_eq!(config.pd_features.len(), 6);
    }

    #[test]
    fn rejects_bad_fraction() {
        let config = Config {
            train_fraction: 1.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"holdout_region": "NC", "fold_count": 5}"#).unwrap();
        assert_eq!(config.holdout_region, "NC");
        assert_eq!(config.fold_count, 5);
        assert_eq!(config.train_fraction, 0.85);
        assert_eq!(config.mtry_range, 1..=10);
    }
}
