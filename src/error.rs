/// Errors produced by the county2party pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to fetch data: {0}")]
    DataFetch(String),
    #[error("Variable `{code}` missing from API response")]
    MissingVariable { code: String },
    #[error("Invalid county identifier: `{0}`")]
    InvalidFips(String),
    #[error("Missing value for feature `{feature}` in row {row}")]
    MissingFeature { feature: String, row: usize },
    #[error("Degenerate split: {0}")]
    DegenerateSplit(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),
    #[error("I/O error: `{0}`")]
    Io(#[from] std::io::Error),
    #[error("CSV error: `{0}`")]
    Csv(#[from] csv::Error),
    #[error("JSON error: `{0}`")]
    Json(#[from] serde_json::Error),
    #[error("Failed to serialize model: `{0}`")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Failed to deserialize model: `{0}`")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Plotting error: {0}")]
    Plot(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
