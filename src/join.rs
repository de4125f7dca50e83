use crate::record::CountyRecord;
use crate::results::Winners;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Counties lost to the join, by reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinReport {
    /// `(fips, name)` of demographic records with no election result.
    pub missing_results: Vec<(String, String)>,
    /// `(fips, county name)` of election results with no demographic record.
    pub missing_demographics: Vec<(String, String)>,
    /// `(fips, name)` of demographic records whose county was won by a party
    /// outside the model classes.
    pub other_party: Vec<(String, String)>,
    /// `(fips, name)` of repeated demographic records; only the first is kept.
    pub duplicates: Vec<(String, String)>,
}

impl JoinReport {
    pub fn is_empty(&self) -> bool {
        self.missing_results.is_empty()
            && self.missing_demographics.is_empty()
            && self.other_party.is_empty()
            && self.duplicates.is_empty()
    }
}

/// Inner-joins demographics to winners on FIPS, filling `state` and `party`.
/// Each FIPS appears at most once in the output.
pub fn inner_join(
    records: Vec<CountyRecord>,
    winners: &Winners,
) -> (Vec<CountyRecord>, JoinReport) {
    let mut report = JoinReport::default();
    let mut seen = HashSet::with_capacity(records.len());
    let mut joined = Vec::with_capacity(records.len());
    let other_party: HashSet<&str> = winners.other_party.iter().map(|w| w.fips.as_str()).collect();

    for mut record in records {
        if !seen.insert(record.fips.clone()) {
            report.duplicates.push((record.fips, record.name));
            continue;
        }
        match winners.winners.get(&record.fips) {
            Some(winner) => {
                record.state = Some(winner.state.clone());
                record.party = winner.party();
                joined.push(record);
            }
            None if other_party.contains(record.fips.as_str()) => {
                report.other_party.push((record.fips, record.name))
            }
            None => report.missing_results.push((record.fips, record.name)),
        }
    }

    report.missing_demographics = winners
        .winners
        .values()
        .chain(&winners.other_party)
        .filter(|w| !seen.contains(&w.fips))
        .map(|w| (w.fips.clone(), w.county_name.clone()))
        .collect();
    report.missing_demographics.sort();
    report.missing_results.sort();
    report.other_party.sort();

    for (fips, name) in report.missing_results.iter().chain(&report.missing_demographics) {
        log::debug!(target: crate::LOG_TARGET, "county {fips} ({name}) lost to join");
    }
    for (fips, name) in &report.duplicates {
        log::warn!(target: crate::LOG_TARGET, "duplicate county {fips} ({name}) ignored");
    }
    if !report.is_empty() {
        log::warn!(
            target: crate::LOG_TARGET,
            "join dropped {} demographic and {} result counties, \
             {} third-party and {} duplicate records",
            report.missing_results.len(),
            report.missing_demographics.len(),
            report.other_party.len(),
            report.duplicates.len()
        );
    }
    (joined, report)
}
