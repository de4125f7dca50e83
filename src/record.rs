use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Winning party of a county, the two-level model target.
///
/// Class indices follow alphabetical label order, so `Democrat` is class 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Party {
    Democrat,
    Republican,
}

impl Party {
    pub const ALL: [Party; 2] = [Party::Democrat, Party::Republican];

    /// Class index used by the forest and in probability vectors.
    pub fn index(self) -> usize {
        match self {
            Party::Democrat => 0,
            Party::Republican => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Party> {
        Party::ALL.get(index).copied()
    }

    /// Parses a results-table party label. Labels other than the two model
    /// classes return `None`.
    pub fn from_label(label: &str) -> Option<Party> {
        match label.trim().to_ascii_uppercase().as_str() {
            "DEMOCRAT" => Some(Party::Democrat),
            "REPUBLICAN" => Some(Party::Republican),
            _ => None,
        }
    }

    /// Label as written in the results table.
    pub fn label(self) -> &'static str {
        match self {
            Party::Democrat => "DEMOCRAT",
            Party::Republican => "REPUBLICAN",
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Employment sectors with per-county headcounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Agriculture,
    Construction,
    Manufacturing,
    Wholesale,
    Retail,
    Transportation,
    Information,
    Finance,
    Professional,
    EducationHealth,
    ArtsFood,
}

impl Sector {
    pub const ALL: [Sector; 11] = [
        Sector::Agriculture,
        Sector::Construction,
        Sector::Manufacturing,
        Sector::Wholesale,
        Sector::Retail,
        Sector::Transportation,
        Sector::Information,
        Sector::Finance,
        Sector::Professional,
        Sector::EducationHealth,
        Sector::ArtsFood,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Sector::Agriculture => "agriculture",
            Sector::Construction => "construction",
            Sector::Manufacturing => "manufacturing",
            Sector::Wholesale => "wholesale",
            Sector::Retail => "retail",
            Sector::Transportation => "transportation",
            Sector::Information => "information",
            Sector::Finance => "finance",
            Sector::Professional => "professional",
            Sector::EducationHealth => "education_health",
            Sector::ArtsFood => "arts_food",
        }
    }
}

/// A fetched county variable, named by meaning rather than by source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    TotalPopulation,
    MedianAge,
    MedianIncome,
    PctCollege,
    PctWhite,
    PctBlack,
    PctHispanic,
    PctAsian,
    LaborForce,
    Employed(Sector),
    PovertyCount,
    MeanHoursMale,
    MeanHoursFemale,
}

impl Variable {
    pub fn all() -> Vec<Variable> {
        let mut vars = vec![
            Variable::TotalPopulation,
            Variable::MedianAge,
            Variable::MedianIncome,
            Variable::PctCollege,
            Variable::PctWhite,
            Variable::PctBlack,
            Variable::PctHispanic,
            Variable::PctAsian,
            Variable::LaborForce,
        ];
        vars.extend(Sector::ALL.iter().map(|&s| Variable::Employed(s)));
        vars.extend([
            Variable::PovertyCount,
            Variable::MeanHoursMale,
            Variable::MeanHoursFemale,
        ]);
        vars
    }

    pub fn name(self) -> String {
        match self {
            Variable::TotalPopulation => "total_population".into(),
            Variable::MedianAge => "median_age".into(),
            Variable::MedianIncome => "median_income".into(),
            Variable::PctCollege => "pct_college".into(),
            Variable::PctWhite => "pct_white".into(),
            Variable::PctBlack => "pct_black".into(),
            Variable::PctHispanic => "pct_hispanic".into(),
            Variable::PctAsian => "pct_asian".into(),
            Variable::LaborForce => "labor_force".into(),
            Variable::Employed(s) => format!("emp_{}", s.name()),
            Variable::PovertyCount => "poverty_count".into(),
            Variable::MeanHoursMale => "mean_hours_male".into(),
            Variable::MeanHoursFemale => "mean_hours_female".into(),
        }
    }
}

/// Polygon boundary of a county as outer rings of `(lon, lat)` points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub rings: Vec<Vec<(f64, f64)>>,
}

impl Geometry {
    /// `(min_lon, max_lon, min_lat, max_lat)`, or `None` without points.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.rings.iter().flatten();
        let &(x0, y0) = points.next()?;
        Some(points.fold((x0, x0, y0, y0), |(a, b, c, d), &(x, y)| {
            (a.min(x), b.max(x), c.min(y), d.max(y))
        }))
    }
}

/// One U.S. county. Variables are `None` when the source had no estimate.
///
/// `state`, `party` and `geometry` are only filled once the record has been
/// joined to election results and boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountyRecord {
    pub fips: String,
    pub name: String,
    pub total_population: Option<f64>,
    pub median_age: Option<f64>,
    pub median_income: Option<f64>,
    pub pct_college: Option<f64>,
    pub pct_white: Option<f64>,
    pub pct_black: Option<f64>,
    pub pct_hispanic: Option<f64>,
    pub pct_asian: Option<f64>,
    pub labor_force: Option<f64>,
    pub emp_agriculture: Option<f64>,
    pub emp_construction: Option<f64>,
    pub emp_manufacturing: Option<f64>,
    pub emp_wholesale: Option<f64>,
    pub emp_retail: Option<f64>,
    pub emp_transportation: Option<f64>,
    pub emp_information: Option<f64>,
    pub emp_finance: Option<f64>,
    pub emp_professional: Option<f64>,
    pub emp_education_health: Option<f64>,
    pub emp_arts_food: Option<f64>,
    pub poverty_count: Option<f64>,
    pub mean_hours_male: Option<f64>,
    pub mean_hours_female: Option<f64>,
    #[serde(skip)]
    pub state: Option<String>,
    #[serde(skip)]
    pub party: Option<Party>,
    #[serde(skip)]
    pub geometry: Option<Geometry>,
}

impl CountyRecord {
    pub fn new(fips: &str, name: &str) -> Result<Self> {
        Ok(CountyRecord {
            fips: pad_fips(fips)?,
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn get(&self, variable: Variable) -> Option<f64> {
        *self.slot(variable)
    }

    pub fn set(&mut self, variable: Variable, value: Option<f64>) {
        *self.slot_mut(variable) = value;
    }

    pub fn employed(&self, sector: Sector) -> Option<f64> {
        self.get(Variable::Employed(sector))
    }

    fn slot(&self, variable: Variable) -> &Option<f64> {
        match variable {
            Variable::TotalPopulation => &self.total_population,
            Variable::MedianAge => &self.median_age,
            Variable::MedianIncome => &self.median_income,
            Variable::PctCollege => &self.pct_college,
            Variable::PctWhite => &self.pct_white,
            Variable::PctBlack => &self.pct_black,
            Variable::PctHispanic => &self.pct_hispanic,
            Variable::PctAsian => &self.pct_asian,
            Variable::LaborForce => &self.labor_force,
            Variable::Employed(s) => match s {
                Sector::Agriculture => &self.emp_agriculture,
                Sector::Construction => &self.emp_construction,
                Sector::Manufacturing => &self.emp_manufacturing,
                Sector::Wholesale => &self.emp_wholesale,
                Sector::Retail => &self.emp_retail,
                Sector::Transportation => &self.emp_transportation,
                Sector::Information => &self.emp_information,
                Sector::Finance => &self.emp_finance,
                Sector::Professional => &self.emp_professional,
                Sector::EducationHealth => &self.emp_education_health,
                Sector::ArtsFood => &self.emp_arts_food,
            },
            Variable::PovertyCount => &self.poverty_count,
            Variable::MeanHoursMale => &self.mean_hours_male,
            Variable::MeanHoursFemale => &self.mean_hours_female,
        }
    }

    fn slot_mut(&mut self, variable: Variable) -> &mut Option<f64> {
        match variable {
            Variable::TotalPopulation => &mut self.total_population,
            Variable::MedianAge => &mut self.median_age,
            Variable::MedianIncome => &mut self.median_income,
            Variable::PctCollege => &mut self.pct_college,
            Variable::PctWhite => &mut self.pct_white,
            Variable::PctBlack => &mut self.pct_black,
            Variable::PctHispanic => &mut self.pct_hispanic,
            Variable::PctAsian => &mut self.pct_asian,
            Variable::LaborForce => &mut self.labor_force,
            Variable::Employed(s) => match s {
                Sector::Agriculture => &mut self.emp_agriculture,
                Sector::Construction => &mut self.emp_construction,
                Sector::Manufacturing => &mut self.emp_manufacturing,
                Sector::Wholesale => &mut self.emp_wholesale,
                Sector::Retail => &mut self.emp_retail,
                Sector::Transportation => &mut self.emp_transportation,
                Sector::Information => &mut self.emp_information,
                Sector::Finance => &mut self.emp_finance,
                Sector::Professional => &mut self.emp_professional,
                Sector::EducationHealth => &mut self.emp_education_health,
                Sector::ArtsFood => &mut self.emp_arts_food,
            },
            Variable::PovertyCount => &mut self.poverty_count,
            Variable::MeanHoursMale => &mut self.mean_hours_male,
            Variable::MeanHoursFemale => &mut self.mean_hours_female,
        }
    }
}

/// Normalizes a county FIPS code to exactly five digits.
///
/// Shorter codes are left-padded with zeros and a trailing `.0` from
/// float-formatted exports is stripped.
pub fn pad_fips(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidFips(raw.to_string()));
    }
    Ok(format!("{digits:0>5}"))
}
