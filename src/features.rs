//! Derived percentage features and the model-facing view of a county.

use crate::record::{CountyRecord, Party, Sector, Variable};
use linfa::Dataset;
use ndarray::{Array1, Array2, Ix1};
use serde::{Deserialize, Serialize};

/// `part / whole * 100`, NaN when either side is missing or `whole` is zero.
pub fn share(part: Option<f64>, whole: Option<f64>) -> f64 {
    match (part, whole) {
        (Some(p), Some(w)) if w != 0.0 => p / w * 100.0,
        _ => f64::NAN,
    }
}

/// Percentages computed from a record's raw counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub sector_shares: [f64; 11],
    pub poverty_rate: f64,
}

impl DerivedFeatures {
    pub fn from_record(record: &CountyRecord) -> Self {
        let mut sector_shares = [f64::NAN; 11];
        for sector in Sector::ALL {
            sector_shares[sector.index()] = share(record.employed(sector), record.labor_force);
        }
        DerivedFeatures {
            sector_shares,
            poverty_rate: share(record.poverty_count, record.total_population),
        }
    }

    pub fn sector_share(&self, sector: Sector) -> f64 {
        self.sector_shares[sector.index()]
    }
}

/// A joined county ready for modeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub record: CountyRecord,
    pub derived: DerivedFeatures,
    pub state: String,
    pub party: Party,
}

impl Observation {
    pub fn fips(&self) -> &str {
        &self.record.fips
    }
}

/// Model predictor, resolved against an [`Observation`] without name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    MedianAge,
    MedianIncome,
    PctCollege,
    PctWhite,
    PctBlack,
    PctHispanic,
    PctAsian,
    SectorShare(Sector),
    PovertyRate,
    MeanHoursMale,
    MeanHoursFemale,
}

impl Feature {
    pub fn all() -> Vec<Feature> {
        let mut features = vec![
            Feature::MedianAge,
            Feature::MedianIncome,
            Feature::PctCollege,
            Feature::PctWhite,
            Feature::PctBlack,
            Feature::PctHispanic,
            Feature::PctAsian,
        ];
        features.extend(Sector::ALL.iter().map(|&s| Feature::SectorShare(s)));
        features.extend([
            Feature::PovertyRate,
            Feature::MeanHoursMale,
            Feature::MeanHoursFemale,
        ]);
        features
    }

    pub fn name(self) -> String {
        match self {
            Feature::MedianAge => Variable::MedianAge.name(),
            Feature::MedianIncome => Variable::MedianIncome.name(),
            Feature::PctCollege => Variable::PctCollege.name(),
            Feature::PctWhite => Variable::PctWhite.name(),
            Feature::PctBlack => Variable::PctBlack.name(),
            Feature::PctHispanic => Variable::PctHispanic.name(),
            Feature::PctAsian => Variable::PctAsian.name(),
            Feature::SectorShare(s) => format!("pct_{}", s.name()),
            Feature::PovertyRate => "poverty_rate".into(),
            Feature::MeanHoursMale => Variable::MeanHoursMale.name(),
            Feature::MeanHoursFemale => Variable::MeanHoursFemale.name(),
        }
    }

    /// Value of this feature for `obs`; NaN when missing.
    pub fn value(self, obs: &Observation) -> f64 {
        self.value_for(&obs.record, &obs.derived)
    }

    /// Same as [`Feature::value`] for a record that has no election result.
    pub fn value_for(self, record: &CountyRecord, derived: &DerivedFeatures) -> f64 {
        let raw = |v: Variable| record.get(v).unwrap_or(f64::NAN);
        match self {
            Feature::MedianAge => raw(Variable::MedianAge),
            Feature::MedianIncome => raw(Variable::MedianIncome),
            Feature::PctCollege => raw(Variable::PctCollege),
            Feature::PctWhite => raw(Variable::PctWhite),
            Feature::PctBlack => raw(Variable::PctBlack),
            Feature::PctHispanic => raw(Variable::PctHispanic),
            Feature::PctAsian => raw(Variable::PctAsian),
            Feature::SectorShare(s) => derived.sector_share(s),
            Feature::PovertyRate => derived.poverty_rate,
            Feature::MeanHoursMale => raw(Variable::MeanHoursMale),
            Feature::MeanHoursFemale => raw(Variable::MeanHoursFemale),
        }
    }
}

/// What to do with records that have missing predictors.
///
/// Mean hours worked is always required: the forest cannot split on missing
/// values and the pipeline omits such counties instead of imputing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Drop a record if any selected model feature is missing.
    DropIncomplete,
    /// Drop only on missing mean hours worked. Other gaps reach the trainer,
    /// which rejects them.
    HoursWorkedOnly,
}

/// A record removed before modeling and the features it lacked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropped {
    pub fips: String,
    pub name: String,
    pub missing: Vec<String>,
}

/// Turns joined records into observations, dropping incomplete ones.
///
/// Records without a party or state (unjoined) are dropped as well.
pub fn filter_for_model(
    records: Vec<CountyRecord>,
    features: &[Feature],
    policy: MissingPolicy,
) -> (Vec<Observation>, Vec<Dropped>) {
    let mut kept = Vec::with_capacity(records.len());
    let mut dropped = Vec::new();

    for record in records {
        let (Some(party), Some(state)) = (record.party, record.state.clone()) else {
            dropped.push(Dropped {
                fips: record.fips.clone(),
                name: record.name.clone(),
                missing: vec!["party".into()],
            });
            continue;
        };
        let derived = DerivedFeatures::from_record(&record);
        let obs = Observation {
            record,
            derived,
            state,
            party,
        };

        let mut missing: Vec<String> = [Variable::MeanHoursMale, Variable::MeanHoursFemale]
            .into_iter()
            .filter(|&v| obs.record.get(v).is_none())
            .map(Variable::name)
            .collect();
        if missing.is_empty() && policy == MissingPolicy::DropIncomplete {
            missing = features
                .iter()
                .filter(|f| f.value(&obs).is_nan())
                .map(|f| f.name())
                .collect();
        }

        if missing.is_empty() {
            kept.push(obs);
        } else {
            dropped.push(Dropped {
                fips: obs.record.fips,
                name: obs.record.name,
                missing,
            });
        }
    }

    log::info!(
        target: crate::LOG_TARGET,
        "kept {} counties for modeling, dropped {}",
        kept.len(),
        dropped.len()
    );
    (kept, dropped)
}

/// Row-per-observation, column-per-feature matrix.
pub fn design_matrix(observations: &[Observation], features: &[Feature]) -> Array2<f64> {
    Array2::from_shape_fn((observations.len(), features.len()), |(i, j)| {
        features[j].value(&observations[i])
    })
}

/// Design matrix of unlabeled records, for prediction.
pub fn record_matrix(records: &[CountyRecord], features: &[Feature]) -> Array2<f64> {
    let derived: Vec<DerivedFeatures> = records.iter().map(DerivedFeatures::from_record).collect();
    Array2::from_shape_fn((records.len(), features.len()), |(i, j)| {
        features[j].value_for(&records[i], &derived[i])
    })
}

/// Party class indices of `observations`.
pub fn labels(observations: &[Observation]) -> Array1<usize> {
    observations.iter().map(|o| o.party.index()).collect()
}

/// `linfa` dataset of the design matrix, labels and feature names.
pub fn to_dataset(observations: &[Observation], features: &[Feature]) -> Dataset<f64, usize, Ix1> {
    Dataset::new(design_matrix(observations, features), labels(observations))
        .with_feature_names(features.iter().map(|f| f.name()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record() -> CountyRecord {
        let mut r = CountyRecord::new("01001", "Autauga County, Alabama").unwrap();
        r.total_population = Some(1000.0);
        r.labor_force = Some(550.0);
        for s in Sector::ALL {
            r.set(Variable::Employed(s), Some(50.0));
        }
        r.poverty_count = Some(150.0);
        r.median_age = Some(38.0);
        r.median_income = Some(55000.0);
        r.pct_college = Some(27.0);
        r.pct_white = Some(75.0);
        r.pct_black = Some(19.0);
        r.pct_hispanic = Some(3.0);
        r.pct_asian = Some(1.0);
        r.mean_hours_male = Some(42.0);
        r.mean_hours_female = Some(37.0);
        r.state = Some("AL".into());
        r.party = Some(Party::Republican);
        r
    }

    #[test]
    fn shares_sum_to_hundred_when_labor_force_is_fully_employed() {
        let d = DerivedFeatures::from_record(&record());
        let total: f64 = d.sector_shares.iter().sum();
        assert_abs_diff_eq!(total, 100.0, epsilon = 1e-9);
        assert!(d.sector_shares.iter().all(|&s| s >= 0.0));
        assert_abs_diff_eq!(d.poverty_rate, 15.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_or_missing_denominator_is_nan() {
        let mut r = record();
        r.labor_force = Some(0.0);
        r.total_population = None;
        let before = r.clone();
        let d = DerivedFeatures::from_record(&r);
        assert!(d.sector_shares.iter().all(|s| s.is_nan()));
        assert!(d.poverty_rate.is_nan());
        assert_eq!(r, before);
    }

    #[test]
    fn missing_hours_always_dropped() {
        let mut no_hours = record();
        no_hours.fips = "01003".into();
        no_hours.mean_hours_female = None;
        let (kept, dropped) = filter_for_model(
            vec![record(), no_hours],
            &Feature::all(),
            MissingPolicy::HoursWorkedOnly,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped[0].fips, "01003");
        assert_eq!(dropped[0].missing, vec!["mean_hours_female".to_string()]);
    }

    #[test]
    fn drop_incomplete_removes_other_gaps() {
        let mut no_income = record();
        no_income.median_income = None;
        let features = Feature::all();

        let (kept, _) = filter_for_model(
            vec![no_income.clone()],
            &features,
            MissingPolicy::HoursWorkedOnly,
        );
        assert_eq!(kept.len(), 1);

        let (kept, dropped) =
            filter_for_model(vec![no_income], &features, MissingPolicy::DropIncomplete);
        assert!(kept.is_empty());
        assert_eq!(dropped[0].missing, vec!["median_income".to_string()]);
    }

    #[test]
    fn dataset_matches_feature_order() {
        let (kept, _) =
            filter_for_model(vec![record()], &Feature::all(), MissingPolicy::DropIncomplete);
        let features = [Feature::MedianAge, Feature::PovertyRate];
        let dataset = to_dataset(&kept, &features);
        assert_eq!(dataset.records.dim(), (1, 2));
        assert_eq!(dataset.records[[0, 0]], 38.0);
        assert_abs_diff_eq!(dataset.records[[0, 1]], 15.0, epsilon = 1e-12);
        assert_eq!(dataset.targets[0], Party::Republican.index());
    }
}
