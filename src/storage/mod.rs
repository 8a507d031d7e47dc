//! Where transactions come from and where predictions go.
//!
//! CSV files and SQLite tables are interchangeable: both can be read as a
//! transaction source and written as a prediction sink. Writes always replace
//! the previous contents of the destination.

mod csv_file;
mod sqlite;

use std::fmt;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::transaction::{
    canonical_column, missing_required_columns, PredictionResult, TransactionSet,
    COL_ACTUAL_LABEL, COL_AMOUNT, COL_DEST_AFTER, COL_DEST_BEFORE, COL_FRAUD_PROBABILITY,
    COL_ORIGIN_AFTER, COL_ORIGIN_BEFORE, COL_PREDICTED_LABEL, COL_TYPE,
};

pub use csv_file::CsvFile;
pub use sqlite::{import_csv, init_transactions_table, SqliteTable};

pub trait TransactionSource {
    fn load(&self) -> Result<TransactionSet>;
}

pub trait PredictionSink {
    fn write(&self, predictions: &[PredictionResult]) -> Result<()>;
}

/// A storage location selected at runtime.
#[derive(Debug, Clone)]
pub enum Location {
    Csv(CsvFile),
    Sqlite(SqliteTable),
}

impl Location {
    pub fn csv(path: impl Into<PathBuf>) -> Self {
        Location::Csv(CsvFile::new(path))
    }

    pub fn sqlite(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Location::Sqlite(SqliteTable::new(db_path, table))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Csv(csv) => write!(f, "csv:{}", csv.path().display()),
            Location::Sqlite(table) => {
                write!(f, "sqlite:{}#{}", table.db_path().display(), table.table())
            }
        }
    }
}

impl TransactionSource for Location {
    fn load(&self) -> Result<TransactionSet> {
        match self {
            Location::Csv(csv) => csv.load(),
            Location::Sqlite(table) => table.load(),
        }
    }
}

impl PredictionSink for Location {
    fn write(&self, predictions: &[PredictionResult]) -> Result<()> {
        match self {
            Location::Csv(csv) => csv.write(predictions),
            Location::Sqlite(table) => table.write(predictions),
        }
    }
}

/// Read transactions from `source`.
pub fn load(source: &Location) -> Result<TransactionSet> {
    source.load()
}

/// Replace the contents of `destination` with `predictions`.
pub fn write(predictions: &[PredictionResult], destination: &Location) -> Result<()> {
    destination.write(predictions)
}

// Normalize header names and check the required ones are present
fn inspect_columns<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>> {
    let columns: Vec<String> = raw
        .iter()
        .map(|c| canonical_column(c.as_ref()).to_string())
        .collect();
    let missing = missing_required_columns(&columns);
    if !missing.is_empty() {
        return Err(PipelineError::InputFormat(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }
    Ok(columns)
}

// Typed output value shared by the CSV and SQLite writers
enum Cell {
    Int(i64),
    Real(f64),
}

fn prediction_columns(predictions: &[PredictionResult]) -> Vec<&'static str> {
    let mut columns = vec![
        COL_TYPE,
        COL_AMOUNT,
        COL_ORIGIN_BEFORE,
        COL_ORIGIN_AFTER,
        COL_DEST_BEFORE,
        COL_DEST_AFTER,
    ];
    if has_actual_labels(predictions) {
        columns.push(COL_ACTUAL_LABEL);
    }
    columns.push(COL_PREDICTED_LABEL);
    columns.push(COL_FRAUD_PROBABILITY);
    columns
}

fn has_actual_labels(predictions: &[PredictionResult]) -> bool {
    predictions.iter().any(|p| p.actual_label.is_some())
}

fn prediction_cells(p: &PredictionResult, with_actual: bool) -> Vec<Option<Cell>> {
    let r = &p.record;
    let mut cells = vec![
        Some(Cell::Int(i64::from(r.tx_type))),
        Some(Cell::Real(r.amount)),
        Some(Cell::Real(r.origin_balance_before)),
        Some(Cell::Real(r.origin_balance_after)),
        Some(Cell::Real(r.dest_balance_before)),
        Some(Cell::Real(r.dest_balance_after)),
    ];
    if with_actual {
        cells.push(p.actual_label.map(|a| Cell::Int(i64::from(a))));
    }
    cells.push(Some(Cell::Int(i64::from(p.predicted_label))));
    cells.push(Some(Cell::Real(p.fraud_probability)));
    cells
}
