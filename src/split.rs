use crate::error::{Error, Result};
use crate::features::Observation;
use crate::record::Party;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// A helper type for holding train/test splits.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub train: Vec<Observation>,
    pub test: Vec<Observation>,
}

/// Sends every county of `holdout_state` to the test set, then samples
/// `train_fraction` of each party among the rest into the training set.
///
/// The same seed and input always give the same partition; both halves keep
/// the input order.
pub fn holdout_stratified_split(
    observations: &[Observation],
    holdout_state: &str,
    train_fraction: f64,
    seed: u64,
) -> Result<DatasetSplit> {
    if !(train_fraction > 0.0 && train_fraction <= 1.0) {
        return Err(Error::InvalidConfig(format!(
            "train_fraction must be in (0, 1], got {train_fraction}"
        )));
    }

    let mut by_party: BTreeMap<Party, Vec<usize>> = BTreeMap::new();
    for (i, obs) in observations.iter().enumerate() {
        if !obs.state.eq_ignore_ascii_case(holdout_state) {
            by_party.entry(obs.party).or_default().push(i);
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut in_train = vec![false; observations.len()];
    for indices in by_party.values_mut() {
        indices.shuffle(&mut rng);
        let take = ((indices.len() as f64) * train_fraction).ceil() as usize;
        for &i in indices.iter().take(take.min(indices.len())) {
            in_train[i] = true;
        }
    }

    let (train, test): (Vec<_>, Vec<_>) = observations
        .iter()
        .zip(&in_train)
        .partition(|(_, selected)| **selected);
    let split = DatasetSplit {
        train: train.into_iter().map(|(o, _)| o.clone()).collect(),
        test: test.into_iter().map(|(o, _)| o.clone()).collect(),
    };
    if split.train.is_empty() {
        return Err(Error::EmptyDataset(format!(
            "no training counties outside {holdout_state}"
        )));
    }

    log::info!(
        target: crate::LOG_TARGET,
        "split {} train / {} test counties ({holdout_state} held out)",
        split.train.len(),
        split.test.len()
    );
    Ok(split)
}

/// Fold id in `0..k` per sample, balanced within each label.
pub fn stratified_folds<R: Rng + ?Sized>(labels: &[usize], k: usize, rng: &mut R) -> Vec<usize> {
    let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_label.entry(label).or_default().push(i);
    }
    let mut folds = vec![0; labels.len()];
    let mut next = 0;
    for indices in by_label.values_mut() {
        indices.shuffle(rng);
        for &i in indices.iter() {
            folds[i] = next % k;
            next += 1;
        }
    }
    folds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DerivedFeatures;
    use crate::record::CountyRecord;

    fn obs(i: usize, state: &str, party: Party) -> Observation {
        let record = CountyRecord::new(&format!("{i:05}"), "county").unwrap();
        Observation {
            derived: DerivedFeatures::from_record(&record),
            record,
            state: state.into(),
            party,
        }
    }

    fn fips(observations: &[Observation]) -> Vec<&str> {
        observations.iter().map(Observation::fips).collect()
    }

    fn sample() -> Vec<Observation> {
        (0..60)
            .map(|i| {
                let state = if i % 6 == 0 { "GA" } else { "AL" };
                let party = if i % 3 == 0 { Party::Democrat } else { Party::Republican };
                obs(i, state, party)
            })
            .collect()
    }

    #[test]
    fn holdout_region_is_always_test() {
        let data = sample();
        for seed in [1, 117, 9999] {
            let split = holdout_stratified_split(&data, "GA", 0.85, seed).unwrap();
            assert!(split.train.iter().all(|o| o.state != "GA"));
            assert_eq!(split.test.iter().filter(|o| o.state == "GA").count(), 10);
            assert_eq!(split.train.len() + split.test.len(), data.len());
        }
    }

    #[test]
    fn split_is_stratified_and_deterministic() {
        let data = sample();
        let a = holdout_stratified_split(&data, "GA", 0.85, 117).unwrap();
        let b = holdout_stratified_split(&data, "GA", 0.85, 117).unwrap();
        // Derived shares are NaN here, so compare membership by FIPS.
        assert_eq!(fips(&a.train), fips(&b.train));
        assert_eq!(fips(&a.test), fips(&b.test));

        // 50 non-GA counties: 10 democrat, 40 republican.
        let dem = a.train.iter().filter(|o| o.party == Party::Democrat).count();
        let rep = a.train.iter().filter(|o| o.party == Party::Republican).count();
        assert_eq!((dem, rep), (9, 34));
    }

    #[test]
    fn rejects_bad_fraction() {
        assert!(holdout_stratified_split(&sample(), "GA", 0.0, 1).is_err());
    }

    #[test]
    fn folds_are_balanced_per_label() {
        let labels: Vec<usize> = (0..40).map(|i| usize::from(i % 4 == 0)).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let folds = stratified_folds(&labels, 5, &mut rng);
        for fold in 0..5 {
            let members: Vec<_> = (0..40).filter(|&i| folds[i] == fold).collect();
            assert_eq!(members.len(), 8);
            assert_eq!(members.iter().filter(|&&i| labels[i] == 1).count(), 2);
        }
    }
}
