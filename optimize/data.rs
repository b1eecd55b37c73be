//! Loading of headered numeric tables (CSV, or TSV by file extension).
//!
//! Every column except the optional target becomes a feature, in file order.
//! Failures are assumed to be user-input errors and are reported with the
//! offending column and row.

use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

/// A parsed table ready to be handed to an estimator.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    /// Present only when a target column was requested.
    pub y: Option<Array1<f64>>,
    pub feature_names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error reading delimited input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The target column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Column '{column}' has a non-numeric value '{value}' on data row {row}.")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Column '{column}' has a missing or non-finite value on data row {row}.")]
    MissingValue { column: String, row: usize },
    #[error("The input file contains no data rows.")]
    Empty,
    #[error("The input file has no feature columns besides the target.")]
    NoFeatures,
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

fn parse_cell(raw: &str, column: &str, row: usize) -> Result<f64, DataError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DataError::MissingValue {
            column: column.to_string(),
            row,
        });
    }
    let value: f64 = trimmed.parse().map_err(|_| DataError::NotNumeric {
        column: column.to_string(),
        row,
        value: trimmed.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DataError::MissingValue {
            column: column.to_string(),
            row,
        });
    }
    Ok(value)
}

/// Reads `path`, splitting off `target` as the response when given.
pub fn load_csv(path: impl AsRef<Path>, target: Option<&str>) -> Result<Dataset, DataError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let target_index = match target {
        Some(name) => Some(
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))?,
        ),
        None => None,
    };
    let feature_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != target_index)
        .map(|(_, h)| h.clone())
        .collect();
    if feature_names.is_empty() {
        return Err(DataError::NoFeatures);
    }

    let mut features = Vec::new();
    let mut response = Vec::new();
    let mut n_rows = 0;
    for record in reader.records() {
        let record = record?;
        n_rows += 1;
        for (i, raw) in record.iter().enumerate() {
            let value = parse_cell(raw, &headers[i], n_rows)?;
            if Some(i) == target_index {
                response.push(value);
            } else {
                features.push(value);
            }
        }
    }
    if n_rows == 0 {
        return Err(DataError::Empty);
    }

    log::info!(
        "Loaded {} rows and {} feature columns from {}.",
        n_rows,
        feature_names.len(),
        path.display()
    );

    let x = Array2::from_shape_vec((n_rows, feature_names.len()), features)
        .map_err(|_| DataError::Empty)?;
    Ok(Dataset {
        x,
        y: target_index.map(|_| Array1::from_vec(response)),
        feature_names,
    })
}
