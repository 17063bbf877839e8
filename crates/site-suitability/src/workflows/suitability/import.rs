//! CSV import of criteria and interval tables.
//!
//! Criteria files carry `data_path, distance, weight, custom_interval`
//! columns; interval tables carry `start, end, score`.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::domain::{IntervalClassRule, PoiCriterion};

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidField {
        line: usize,
        column: &'static str,
        value: String,
    },
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read table: {}", err),
            ImportError::Csv(err) => write!(f, "invalid CSV data: {}", err),
            ImportError::InvalidField {
                line,
                column,
                value,
            } => write!(f, "line {}: '{}' is not a valid {}", line, value, column),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::InvalidField { .. } => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Csv(err)
    }
}

#[derive(Debug, Deserialize)]
struct CriterionRow {
    #[serde(default)]
    data_path: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    distance: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    weight: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    custom_interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntervalRow {
    start: f64,
    end: f64,
    score: i32,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "x" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn invalid(line: usize, column: &'static str, value: &str) -> ImportError {
    ImportError::InvalidField {
        line,
        column,
        value: value.to_string(),
    }
}

/// Reads criteria rows. Blank paths are kept as empty rows; the pipeline
/// ignores them.
pub fn parse_criteria<R: Read>(reader: R) -> Result<Vec<PoiCriterion>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut criteria = Vec::new();
    for (index, record) in csv_reader.deserialize::<CriterionRow>().enumerate() {
        let row = record?;
        // header is line 1
        let line = index + 2;

        let mut criterion = PoiCriterion::new(PathBuf::from(row.data_path));
        if let Some(raw) = row.distance.as_deref() {
            let distance = raw
                .trim()
                .parse::<i32>()
                .map_err(|_| invalid(line, "distance", raw))?;
            criterion.set_distance(Some(distance));
        }
        if let Some(raw) = row.weight.as_deref() {
            let weight = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(line, "weight", raw))?;
            criterion.set_weight(weight);
        }
        if let Some(raw) = row.custom_interval.as_deref() {
            criterion.use_custom_interval =
                parse_flag(raw).ok_or_else(|| invalid(line, "custom_interval", raw))?;
        }
        criteria.push(criterion);
    }

    Ok(criteria)
}

pub fn criteria_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<PoiCriterion>, ImportError> {
    let file = std::fs::File::open(path)?;
    parse_criteria(file)
}

/// Reads a custom interval table. Validation happens when the table is used.
pub fn parse_interval_table<R: Read>(reader: R) -> Result<Vec<IntervalClassRule>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    csv_reader
        .deserialize::<IntervalRow>()
        .map(|record| {
            let row = record?;
            Ok(IntervalClassRule::new(row.start, row.end, row.score))
        })
        .collect()
}

pub fn interval_table_from_path<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<IntervalClassRule>, ImportError> {
    let file = std::fs::File::open(path)?;
    parse_interval_table(file)
}
