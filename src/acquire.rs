//! County estimates from the Census Bureau ACS API, plus a CSV cache of them.

use crate::error::{Error, Result};
use crate::record::{CountyRecord, Sector, Variable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.census.gov/data";

/// Census caps a request at 50 variables; `NAME` takes one slot.
const MAX_CODES_PER_REQUEST: usize = 48;

/// Values at or below this are Census annotation sentinels, not estimates.
const SENTINEL_CEILING: f64 = -555_555_555.0;

/// A logical variable and the ACS code it is fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub variable: Variable,
    pub code: String,
}

impl VariableSpec {
    pub fn new(variable: Variable, code: &str) -> Self {
        VariableSpec {
            variable,
            code: code.to_string(),
        }
    }
}

/// ACS 5-year codes for every [`Variable`].
pub fn default_variables() -> Vec<VariableSpec> {
    let sector_code = |s: Sector| match s {
        Sector::Agriculture => "DP03_0033E",
        Sector::Construction => "DP03_0034E",
        Sector::Manufacturing => "DP03_0035E",
        Sector::Wholesale => "DP03_0036E",
        Sector::Retail => "DP03_0037E",
        Sector::Transportation => "DP03_0038E",
        Sector::Information => "DP03_0039E",
        Sector::Finance => "DP03_0040E",
        Sector::Professional => "DP03_0041E",
        Sector::EducationHealth => "DP03_0042E",
        Sector::ArtsFood => "DP03_0043E",
    };
    let mut specs = vec![
        VariableSpec::new(Variable::TotalPopulation, "B01003_001E"),
        VariableSpec::new(Variable::MedianAge, "B01002_001E"),
        VariableSpec::new(Variable::MedianIncome, "B19013_001E"),
        VariableSpec::new(Variable::PctCollege, "DP02_0068PE"),
        VariableSpec::new(Variable::PctWhite, "DP05_0037PE"),
        VariableSpec::new(Variable::PctBlack, "DP05_0038PE"),
        VariableSpec::new(Variable::PctHispanic, "DP05_0071PE"),
        VariableSpec::new(Variable::PctAsian, "DP05_0044PE"),
        VariableSpec::new(Variable::LaborForce, "DP03_0002E"),
    ];
    specs.extend(
        Sector::ALL
            .iter()
            .map(|&s| VariableSpec::new(Variable::Employed(s), sector_code(s))),
    );
    specs.extend([
        VariableSpec::new(Variable::PovertyCount, "B17001_002E"),
        VariableSpec::new(Variable::MeanHoursMale, "B23020_002E"),
        VariableSpec::new(Variable::MeanHoursFemale, "B23020_003E"),
    ]);
    specs
}

/// Geographic level of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Geography {
    /// Every county in the nation.
    County,
    /// Counties of one state, by two-digit state FIPS.
    CountyIn(String),
}

impl Geography {
    fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Geography::County => vec![("for", "county:*".to_string())],
            Geography::CountyIn(state) => vec![
                ("for", "county:*".to_string()),
                ("in", format!("state:{state}")),
            ],
        }
    }
}

/// ACS table family, which decides the endpoint a code is served from.
fn dataset_suffix(code: &str) -> &'static str {
    if code.starts_with("DP") {
        "/profile"
    } else if code.starts_with('S') {
        "/subject"
    } else {
        ""
    }
}

fn parse_estimate(cell: Option<&str>) -> Option<f64> {
    let value: f64 = cell?.trim().parse().ok()?;
    (value.is_finite() && value > SENTINEL_CEILING).then_some(value)
}

/// Rows of a Census JSON table: a header row followed by data rows.
pub type CensusTable = Vec<Vec<Option<String>>>;

/// Merges one API table into `out`, keyed by county FIPS.
pub fn merge_table(
    table: CensusTable,
    specs: &[VariableSpec],
    out: &mut BTreeMap<String, CountyRecord>,
) -> Result<()> {
    let mut rows = table.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| Error::DataFetch("empty response table".into()))?;
    let column = |name: &str| header.iter().position(|h| h.as_deref() == Some(name));

    let (Some(name_col), Some(state_col), Some(county_col)) =
        (column("NAME"), column("state"), column("county"))
    else {
        return Err(Error::DataFetch(
            "response lacks NAME/state/county columns".into(),
        ));
    };
    let columns = specs
        .iter()
        .map(|spec| {
            column(&spec.code)
                .map(|c| (spec.variable, c))
                .ok_or_else(|| Error::MissingVariable {
                    code: spec.code.clone(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    for row in rows {
        let cell = |c: usize| row.get(c).and_then(|v| v.as_deref());
        let fips = format!(
            "{}{}",
            cell(state_col).unwrap_or_default(),
            cell(county_col).unwrap_or_default()
        );
        let record = match out.entry(fips.clone()) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(CountyRecord::new(&fips, cell(name_col).unwrap_or_default())?)
            }
        };
        for &(variable, c) in &columns {
            record.set(variable, parse_estimate(cell(c)));
        }
    }
    Ok(())
}

/// Blocking client for the ACS API.
pub struct CensusClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl CensusClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Self {
        CensusClient {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Fetches every spec for `geography` and `year`, one record per county
    /// sorted by FIPS. Any failed request aborts the fetch.
    pub fn fetch(
        &self,
        specs: &[VariableSpec],
        geography: &Geography,
        year: u16,
    ) -> Result<Vec<CountyRecord>> {
        let mut groups: BTreeMap<&'static str, Vec<VariableSpec>> = BTreeMap::new();
        for spec in specs {
            groups
                .entry(dataset_suffix(&spec.code))
                .or_default()
                .push(spec.clone());
        }

        let mut counties = BTreeMap::new();
        for (suffix, group) in &groups {
            let url = format!("{}/{year}/acs/acs5{suffix}", self.base_url);
            for chunk in group.chunks(MAX_CODES_PER_REQUEST) {
                let table = self.get_table(&url, chunk, geography)?;
                merge_table(table, chunk, &mut counties)?;
            }
        }
        log::info!(
            target: crate::LOG_TARGET,
            "fetched {} variables for {} counties ({year})",
            specs.len(),
            counties.len()
        );
        Ok(counties.into_values().collect())
    }

    fn get_table(
        &self,
        url: &str,
        specs: &[VariableSpec],
        geography: &Geography,
    ) -> Result<CensusTable> {
        let codes: Vec<&str> = specs.iter().map(|s| s.code.as_str()).collect();
        let get = format!("NAME,{}", codes.join(","));
        let mut request = self.agent.get(url).query("get", &get);
        for (key, value) in geography.query() {
            request = request.query(key, &value);
        }
        if let Some(key) = &self.api_key {
            request = request.query("key", key);
        }

        log::debug!(target: crate::LOG_TARGET, "GET {url} ({} codes)", codes.len());
        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(code, resp) => Error::DataFetch(format!(
                "{url} returned HTTP {code}: {}",
                resp.into_string().unwrap_or_default()
            )),
            other => Error::DataFetch(format!("{url}: {other}")),
        })?;
        response
            .into_json::<CensusTable>()
            .map_err(|e| Error::DataFetch(format!("failed to parse response from {url}: {e}")))
    }
}

/// Writes the counties cache, one row per record.
pub fn write_counties_csv(path: &Path, records: &[CountyRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads the counties cache, zero-padding FIPS codes. Two rows with the same
/// padded code are an error.
pub fn read_counties_csv(path: &Path) -> Result<Vec<CountyRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for result in rdr.deserialize() {
        let mut record: CountyRecord = result?;
        record.fips = crate::record::pad_fips(&record.fips)?;
        if !seen.insert(record.fips.clone()) {
            return Err(Error::InvalidFips(format!(
                "{} appears twice in {path:?}",
                record.fips
            )));
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(row: &[&str]) -> Vec<Option<String>> {
        row.iter()
            .map(|c| (*c != "null").then(|| c.to_string()))
            .collect()
    }

    #[test]
    fn groups_codes_by_endpoint() {
        assert_eq!(dataset_suffix("DP03_0033E"), "/profile");
        assert_eq!(dataset_suffix("S1701_C01_001E"), "/subject");
        assert_eq!(dataset_suffix("B01003_001E"), "");
    }

    #[test]
    fn merges_tables_and_masks_sentinels() {
        let specs = vec![
            VariableSpec::new(Variable::TotalPopulation, "B01003_001E"),
            VariableSpec::new(Variable::MedianIncome, "B19013_001E"),
        ];
        let table = vec![
            cells(&["NAME", "B01003_001E", "B19013_001E", "state", "county"]),
            cells(&["Autauga County, Alabama", "55639", "-666666666", "01", "001"]),
            cells(&["Baldwin County, Alabama", "218289", "null", "01", "003"]),
        ];
        let mut out = BTreeMap::new();
        merge_table(table, &specs, &mut out).unwrap();

        let autauga = &out["01001"];
        assert_eq!(autauga.name, "Autauga County, Alabama");
        assert_eq!(autauga.total_population, Some(55639.0));
        assert_eq!(autauga.median_income, None);
        assert_eq!(out["01003"].median_income, None);

        let more = vec![
            cells(&["NAME", "DP03_0002E", "state", "county"]),
            cells(&["Autauga County, Alabama", "26000", "01", "001"]),
        ];
        let labor = [VariableSpec::new(Variable::LaborForce, "DP03_0002E")];
        merge_table(more, &labor, &mut out).unwrap();
        assert_eq!(out["01001"].labor_force, Some(26000.0));
        assert_eq!(out["01001"].total_population, Some(55639.0));
    }

    #[test]
    fn missing_code_is_fatal() {
        let specs = [VariableSpec::new(Variable::MedianAge, "B01002_001E")];
        let table = vec![cells(&["NAME", "state", "county"])];
        let err = merge_table(table, &specs, &mut BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::MissingVariable { code } if code == "B01002_001E"));
    }

    #[test]
    fn default_specs_cover_every_variable() {
        let specs = default_variables();
        let vars: Vec<_> = specs.iter().map(|s| s.variable).collect();
        assert_eq!(vars, Variable::all());
    }

    #[test]
    fn csv_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counties.csv");
        let mut record = CountyRecord::new("13121", "Fulton County, Georgia").unwrap();
        record.median_age = Some(36.1);
        record.state = Some("GA".into());
        write_counties_csv(&path, &[record.clone()]).unwrap();

        let read = read_counties_csv(&path).unwrap();
        record.state = None;
        assert_eq!(read, vec![record]);
    }

    #[test]
    fn duplicate_padded_fips_in_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counties.csv");
        let a = CountyRecord::new("01001", "Autauga County, Alabama").unwrap();
        let mut b = a.clone();
        b.fips = "1001".into();
        write_counties_csv(&path, &[a, b]).unwrap();

        let err = read_counties_csv(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidFips(msg) if msg.contains("01001")));
    }

    /// Serves every request with a one-county table holding the requested
    /// codes, reporting `(path, codes)` of each request.
    fn census_stub() -> (String, std::sync::mpsc::Receiver<(String, Vec<String>)>) {
        use std::io::{BufRead, BufReader, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }

                let target = request_line.split_whitespace().nth(1).unwrap_or_default();
                let (path, query) = target.split_once('?').unwrap_or((target, ""));
                let get = query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("get="))
                    .unwrap_or_default()
                    .replace("%2C", ",");
                let codes: Vec<String> = get
                    .split(',')
                    .filter(|c| *c != "NAME")
                    .map(str::to_string)
                    .collect();

                let mut header = vec!["NAME".to_string()];
                header.extend(codes.iter().cloned());
                header.extend(["state".to_string(), "county".to_string()]);
                let mut row = vec!["Autauga County, Alabama".to_string()];
                row.extend(codes.iter().map(|_| "7".to_string()));
                row.extend(["01".to_string(), "001".to_string()]);
                let body = serde_json::to_string(&vec![header, row]).unwrap();
                tx.send((path.to_string(), codes)).unwrap();
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        (format!("http://{addr}"), rx)
    }

    #[test]
    fn fetch_groups_by_endpoint_and_batches_codes() {
        let (base_url, requests) = census_stub();
        let mut specs: Vec<VariableSpec> = (0..50)
            .map(|i| VariableSpec::new(Variable::TotalPopulation, &format!("B9{i:04}_001E")))
            .collect();
        specs.push(VariableSpec::new(Variable::LaborForce, "DP03_0002E"));
        specs.push(VariableSpec::new(Variable::PctCollege, "DP02_0068PE"));
        specs.push(VariableSpec::new(Variable::PovertyCount, "S1701_C02_001E"));

        let client = CensusClient::with_base_url(&base_url, None);
        let records = client.fetch(&specs, &Geography::County, 2020).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fips, "01001");
        assert_eq!(records[0].labor_force, Some(7.0));
        assert_eq!(records[0].poverty_count, Some(7.0));

        let mut seen: Vec<(String, usize)> = requests
            .try_iter()
            .map(|(path, codes)| (path, codes.len()))
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("/2020/acs/acs5".to_string(), 2),
                ("/2020/acs/acs5".to_string(), 48),
                ("/2020/acs/acs5/profile".to_string(), 2),
                ("/2020/acs/acs5/subject".to_string(), 1),
            ]
        );
    }
}
