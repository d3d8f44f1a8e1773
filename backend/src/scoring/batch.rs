use std::io::Write;

use ndarray::Array2;
use risk_shared::{REQUIRED_FEATURES, RiskLevel};

use super::risk::classify_risk;

pub const PROBABILITY_COLUMN: &str = "default_probability";
pub const RISK_LEVEL_COLUMN: &str = "risk_level";

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Invalid value {value:?} in row {row}, column {column}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("CSV file contains no data rows")]
    Empty,
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Feature table has an inconsistent shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Parse an uploaded CSV into a feature matrix with columns in
/// `REQUIRED_FEATURES` order. Extra columns are dropped, row order is kept.
pub fn parse_feature_table(text: &str) -> Result<Array2<f64>, BatchError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut positions = Vec::with_capacity(REQUIRED_FEATURES.len());
    let mut missing = Vec::new();
    for name in REQUIRED_FEATURES {
        match headers.iter().position(|h| h == name) {
            Some(pos) => positions.push(pos),
            None => missing.push(name.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(BatchError::MissingColumns(missing));
    }

    let mut values = Vec::new();
    let mut n_rows = 0;
    for record in reader.records() {
        let record = record?;
        n_rows += 1;
        for (&pos, name) in positions.iter().zip(REQUIRED_FEATURES) {
            let raw = record.get(pos).unwrap_or_default();
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BatchError::InvalidValue {
                    row: n_rows,
                    column: name.to_string(),
                    value: raw.to_string(),
                })?;
            values.push(value);
        }
    }
    if n_rows == 0 {
        return Err(BatchError::Empty);
    }

    Ok(Array2::from_shape_vec(
        (n_rows, REQUIRED_FEATURES.len()),
        values,
    )?)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RiskCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RiskCounts {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::High => self.high += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// A batch after inference: the projected features and one default
/// probability per row.
#[derive(Debug)]
pub struct ScoredBatch {
    features: Array2<f64>,
    probabilities: Vec<f64>,
    levels: Vec<RiskLevel>,
    counts: RiskCounts,
}

impl ScoredBatch {
    pub fn new(features: Array2<f64>, probabilities: Vec<f64>) -> Self {
        let mut counts = RiskCounts::default();
        let levels = probabilities
            .iter()
            .map(|&p| {
                let (level, _) = classify_risk(p);
                counts.record(level);
                level
            })
            .collect();
        Self {
            features,
            probabilities,
            levels,
            counts,
        }
    }

    pub fn total_records(&self) -> usize {
        self.probabilities.len()
    }

    pub fn counts(&self) -> RiskCounts {
        self.counts
    }

    /// Write the features followed by the probability and tier columns.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = REQUIRED_FEATURES.to_vec();
        header.push(PROBABILITY_COLUMN);
        header.push(RISK_LEVEL_COLUMN);
        out.write_record(&header)?;

        for ((row, probability), level) in self
            .features
            .outer_iter()
            .zip(&self.probabilities)
            .zip(&self.levels)
        {
            let mut record: Vec<String> = row.iter().map(f64::to_string).collect();
            record.push(probability.to_string());
            record.push(level.to_string());
            out.write_record(&record)?;
        }

        out.flush()?;
        Ok(())
    }
}
