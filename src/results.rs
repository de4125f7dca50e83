//! Per-county election winners from a per-candidate vote table.

use crate::error::Result;
use crate::record::{Party, pad_fips};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the vote table. Splits by voting mode appear as separate rows
/// and are summed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResultRow {
    pub year: u16,
    #[serde(alias = "state_code")]
    pub state_po: String,
    #[serde(default)]
    pub county_name: String,
    pub county_fips: String,
    pub candidate: String,
    pub party: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub candidatevotes: Option<u64>,
}

/// Reads county results rows. Blank vote counts deserialize as `None`.
pub fn read_results_csv(path: &Path) -> Result<Vec<ResultRow>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        rows.push(result?);
    }
    log::debug!(target: crate::LOG_TARGET, "read {} result rows from {:?}", rows.len(), path);
    Ok(rows)
}

/// Top vote-getter of a county.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyWinner {
    pub fips: String,
    pub county_name: String,
    pub state: String,
    pub candidate: String,
    pub party_label: String,
    pub votes: u64,
}

impl CountyWinner {
    pub fn party(&self) -> Option<Party> {
        Party::from_label(&self.party_label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Winners {
    /// Winners whose party is a model class, keyed by FIPS.
    pub winners: BTreeMap<String, CountyWinner>,
    /// Winners from any other party; excluded from modeling.
    pub other_party: Vec<CountyWinner>,
    /// Rows of the target year skipped for an unusable FIPS code.
    pub skipped_rows: usize,
}

/// Sums votes per (county, candidate, party) for `year` and keeps each
/// county's top total. Equal totals go to the candidate name that sorts
/// first, then the party label that sorts first.
pub fn county_winners(rows: &[ResultRow], year: u16) -> Winners {
    struct Tally<'a> {
        votes: u64,
        state: &'a str,
        county_name: &'a str,
    }

    let mut tallies: BTreeMap<(String, &str, &str), Tally<'_>> = BTreeMap::new();
    let mut skipped_rows = 0;

    for row in rows.iter().filter(|r| r.year == year) {
        let Ok(fips) = pad_fips(&row.county_fips) else {
            skipped_rows += 1;
            continue;
        };
        let tally = tallies
            .entry((fips, row.candidate.as_str(), row.party.as_str()))
            .or_insert(Tally {
                votes: 0,
                state: &row.state_po,
                county_name: &row.county_name,
            });
        tally.votes += row.candidatevotes.unwrap_or(0);
    }

    let mut best: BTreeMap<String, CountyWinner> = BTreeMap::new();
    for ((fips, candidate, party), tally) in tallies {
        let replace = best.get(&fips).is_none_or(|current| tally.votes > current.votes);
        if replace {
            best.insert(
                fips.clone(),
                CountyWinner {
                    fips,
                    county_name: tally.county_name.to_string(),
                    state: tally.state.to_string(),
                    candidate: candidate.to_string(),
                    party_label: party.to_string(),
                    votes: tally.votes,
                },
            );
        }
    }

    if skipped_rows > 0 {
        log::warn!(
            target: crate::LOG_TARGET,
            "skipped {skipped_rows} result rows without a usable county FIPS"
        );
    }

    let (winners, other_party): (BTreeMap<_, _>, BTreeMap<_, _>) =
        best.into_iter().partition(|(_, w)| w.party().is_some());
    Winners {
        winners,
        other_party: other_party.into_values().collect(),
        skipped_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(year: u16, fips: &str, candidate: &str, party: &str, votes: u64) -> ResultRow {
        ResultRow {
            year,
            state_po: "AL".into(),
            county_name: "AUTAUGA".into(),
            county_fips: fips.into(),
            candidate: candidate.into(),
            party: party.into(),
            candidatevotes: Some(votes),
        }
    }

    #[test]
    fn sums_modes_and_filters_year() {
        let rows = vec![
            row(2020, "1001", "JOSEPH R BIDEN JR", "DEMOCRAT", 6000),
            row(2020, "1001", "JOSEPH R BIDEN JR", "DEMOCRAT", 5000),
            row(2020, "1001", "DONALD J TRUMP", "REPUBLICAN", 10000),
            row(2016, "1001", "HILLARY CLINTON", "DEMOCRAT", 99999),
        ];
        let w = county_winners(&rows, 2020);
        let winner = &w.winners["01001"];
        assert_eq!(winner.party(), Some(Party::Democrat));
        assert_eq!(winner.votes, 11000);
        assert_eq!(winner.state, "AL");
    }

    #[test]
    fn ties_break_by_candidate_name() {
        let rows = vec![
            row(2020, "01003", "ZED", "REPUBLICAN", 100),
            row(2020, "01003", "ADA", "DEMOCRAT", 100),
        ];
        let w = county_winners(&rows, 2020);
        assert_eq!(w.winners["01003"].candidate, "ADA");

        let reversed: Vec<_> = rows.into_iter().rev().collect();
        assert_eq!(county_winners(&reversed, 2020).winners["01003"].candidate, "ADA");
    }

    #[test]
    fn unusable_fips_and_other_parties_are_reported() {
        let rows = vec![
            row(2020, "NA", "JOSEPH R BIDEN JR", "DEMOCRAT", 10),
            row(2020, "2001", "SOMEONE", "LIBERTARIAN", 10),
        ];
        let w = county_winners(&rows, 2020);
        assert_eq!(w.skipped_rows, 1);
        assert!(w.winners.is_empty());
        assert_eq!(w.other_party[0].fips, "02001");
    }

    #[test]
    fn reads_csv_with_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(
            &path,
            "year,state,state_po,county_name,county_fips,office,candidate,party,\
             candidatevotes,totalvotes,version,mode\n\
             2020,ALABAMA,AL,AUTAUGA,1001,US PRESIDENT,DONALD J TRUMP,REPUBLICAN,\
             19838,27770,20220315,TOTAL\n\
             2020,ALASKA,AK,DISTRICT 99,NA,US PRESIDENT,DONALD J TRUMP,REPUBLICAN,\
             NA,0,20220315,TOTAL\n",
        )
        .unwrap();
        let rows = read_results_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].candidatevotes, Some(19838));
        assert_eq!(rows[1].candidatevotes, None);
    }
}
