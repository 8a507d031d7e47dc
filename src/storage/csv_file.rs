use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{has_actual_labels, inspect_columns, prediction_cells, prediction_columns, Cell};
use super::{PredictionSink, TransactionSource};
use crate::error::Result;
use crate::transaction::{PredictionResult, TransactionRecord, TransactionSet};

#[derive(Debug, Clone)]
pub struct CsvFile {
    path: PathBuf,
}

impl CsvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionSource for CsvFile {
    fn load(&self) -> Result<TransactionSet> {
        let file = File::open(&self.path)?;
        let mut rdr = csv::Reader::from_reader(file);

        let headers: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
        let columns = inspect_columns(&headers)?;

        let records: Vec<TransactionRecord> = rdr
            .deserialize()
            .collect::<std::result::Result<Vec<TransactionRecord>, csv::Error>>()?;

        info!(path = %self.path.display(), rows = records.len(), "Loaded transactions from CSV");
        Ok(TransactionSet { columns, records })
    }
}

impl PredictionSink for CsvFile {
    fn write(&self, predictions: &[PredictionResult]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        // File::create truncates: a write always replaces the previous file
        let mut wtr = csv::Writer::from_writer(File::create(&self.path)?);
        wtr.write_record(prediction_columns(predictions))?;

        let with_actual = has_actual_labels(predictions);
        for prediction in predictions {
            let row: Vec<String> = prediction_cells(prediction, with_actual)
                .into_iter()
                .map(|cell| match cell {
                    Some(Cell::Int(v)) => v.to_string(),
                    Some(Cell::Real(v)) => v.to_string(),
                    None => String::new(),
                })
                .collect();
            wtr.write_record(&row)?;
        }
        wtr.flush()?;

        debug!(path = %self.path.display(), rows = predictions.len(), "Wrote predictions CSV");
        Ok(())
    }
}
