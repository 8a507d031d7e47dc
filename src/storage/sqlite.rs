//! SQLite tables as transaction sources and prediction sinks.

use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tracing::{debug, info};

use super::{has_actual_labels, inspect_columns, prediction_cells, prediction_columns, Cell};
use super::{CsvFile, PredictionSink, TransactionSource};
use crate::error::{PipelineError, Result};
use crate::transaction::{
    parse_flag, PredictionResult, TransactionRecord, TransactionSet, COL_ACTUAL_LABEL, COL_AMOUNT,
    COL_DEST_ACCOUNT, COL_DEST_AFTER, COL_DEST_BEFORE, COL_IS_FLAGGED_FRAUD, COL_IS_FRAUD,
    COL_ORIGIN_ACCOUNT, COL_ORIGIN_AFTER, COL_ORIGIN_BEFORE, COL_PREDICTED_LABEL, COL_TYPE,
};

#[derive(Debug, Clone)]
pub struct SqliteTable {
    db_path: PathBuf,
    table: String,
}

impl SqliteTable {
    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }
}

/// Quote a table name as an SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl TransactionSource for SqliteTable {
    fn load(&self) -> Result<TransactionSet> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(&self.table)))?;

        let columns = inspect_columns(&stmt.column_names())?;
        let index_of = |name: &str| columns.iter().position(|c| c == name);
        let layout = ColumnLayout {
            tx_type: index_of(COL_TYPE),
            amount: index_of(COL_AMOUNT),
            origin_account_id: index_of(COL_ORIGIN_ACCOUNT),
            dest_account_id: index_of(COL_DEST_ACCOUNT),
            origin_balance_before: index_of(COL_ORIGIN_BEFORE),
            origin_balance_after: index_of(COL_ORIGIN_AFTER),
            dest_balance_before: index_of(COL_DEST_BEFORE),
            dest_balance_after: index_of(COL_DEST_AFTER),
            is_fraud: index_of(COL_IS_FRAUD),
            is_flagged_fraud: index_of(COL_IS_FLAGGED_FRAUD),
        };

        let mut records = Vec::new();
        let mut rows = stmt.query([])?;
        let mut line = 0usize;
        while let Some(row) = rows.next()? {
            line += 1;
            records.push(layout.read(row, line)?);
        }

        info!(
            db = %self.db_path.display(),
            table = %self.table,
            rows = records.len(),
            "Loaded transactions from SQLite"
        );
        Ok(TransactionSet { columns, records })
    }
}

impl PredictionSink for SqliteTable {
    fn write(&self, predictions: &[PredictionResult]) -> Result<()> {
        let columns = prediction_columns(predictions);
        let with_actual = has_actual_labels(predictions);
        let table = quote_ident(&self.table);

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;

        let definitions: Vec<String> = columns
            .iter()
            .map(|c| {
                let sql_type = match *c {
                    COL_TYPE | COL_ACTUAL_LABEL | COL_PREDICTED_LABEL => "INTEGER",
                    _ => "REAL",
                };
                format!("{} {sql_type}", quote_ident(c))
            })
            .collect();
        tx.execute(
            &format!("CREATE TABLE {table} ({})", definitions.join(", ")),
            [],
        )?;

        {
            let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                names.join(", ")
            ))?;
            for prediction in predictions {
                let values = prediction_cells(prediction, with_actual)
                    .into_iter()
                    .map(|cell| match cell {
                        Some(Cell::Int(v)) => Value::Integer(v),
                        Some(Cell::Real(v)) => Value::Real(v),
                        None => Value::Null,
                    });
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        debug!(
            db = %self.db_path.display(),
            table = %self.table,
            rows = predictions.len(),
            "Replaced predictions table"
        );
        Ok(())
    }
}

// Positions of the canonical columns in a result set
struct ColumnLayout {
    tx_type: Option<usize>,
    amount: Option<usize>,
    origin_account_id: Option<usize>,
    dest_account_id: Option<usize>,
    origin_balance_before: Option<usize>,
    origin_balance_after: Option<usize>,
    dest_balance_before: Option<usize>,
    dest_balance_after: Option<usize>,
    is_fraud: Option<usize>,
    is_flagged_fraud: Option<usize>,
}

impl ColumnLayout {
    fn read(&self, row: &Row<'_>, line: usize) -> Result<TransactionRecord> {
        let value = |idx: Option<usize>| -> Result<Value> {
            match idx {
                Some(i) => Ok(row.get::<_, Value>(i)?),
                None => Ok(Value::Null),
            }
        };
        let real = |idx: Option<usize>, name: &str| -> Result<f64> {
            match value(idx)? {
                Value::Real(v) => Ok(v),
                Value::Integer(v) => Ok(v as f64),
                Value::Text(s) => s.trim().parse::<f64>().map_err(|_| {
                    PipelineError::InputFormat(format!("row {line}: `{name}` is not a number"))
                }),
                _ => Err(PipelineError::InputFormat(format!(
                    "row {line}: `{name}` is empty"
                ))),
            }
        };
        let flag = |idx: Option<usize>, name: &str| -> Result<Option<bool>> {
            match value(idx)? {
                Value::Null => Ok(None),
                Value::Integer(v) => Ok(Some(v != 0)),
                Value::Real(v) => Ok(Some(v != 0.0)),
                Value::Text(s) => parse_flag(&s)
                    .transpose()
                    .map_err(|e| PipelineError::InputFormat(format!("row {line}: `{name}`: {e}"))),
                Value::Blob(_) => Err(PipelineError::InputFormat(format!(
                    "row {line}: `{name}` is not a flag"
                ))),
            }
        };

        Ok(TransactionRecord {
            tx_type: text(value(self.tx_type)?),
            amount: real(self.amount, COL_AMOUNT)?,
            origin_account_id: text(value(self.origin_account_id)?),
            dest_account_id: text(value(self.dest_account_id)?),
            origin_balance_before: real(self.origin_balance_before, COL_ORIGIN_BEFORE)?,
            origin_balance_after: real(self.origin_balance_after, COL_ORIGIN_AFTER)?,
            dest_balance_before: real(self.dest_balance_before, COL_DEST_BEFORE)?,
            dest_balance_after: real(self.dest_balance_after, COL_DEST_AFTER)?,
            is_fraud: flag(self.is_fraud, COL_IS_FRAUD)?,
            is_flagged_fraud: flag(self.is_flagged_fraud, COL_IS_FLAGGED_FRAUD)?,
        })
    }
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

const TRANSACTION_COLUMNS: [(&str, &str); 10] = [
    (COL_TYPE, "TEXT"),
    (COL_AMOUNT, "REAL"),
    (COL_ORIGIN_ACCOUNT, "TEXT"),
    (COL_DEST_ACCOUNT, "TEXT"),
    (COL_ORIGIN_BEFORE, "REAL"),
    (COL_ORIGIN_AFTER, "REAL"),
    (COL_DEST_BEFORE, "REAL"),
    (COL_DEST_AFTER, "REAL"),
    (COL_IS_FRAUD, "INTEGER"),
    (COL_IS_FLAGGED_FRAUD, "INTEGER"),
];

fn create_transactions_table(
    conn: &Connection,
    table: &str,
    schema: &[(&str, &str)],
) -> Result<()> {
    let columns: Vec<String> = schema
        .iter()
        .map(|(name, sql_type)| format!("{} {sql_type}", quote_ident(name)))
        .collect();
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {}
            )",
            quote_ident(table),
            columns.join(",\n                ")
        ),
        [],
    )?;
    Ok(())
}

// Value stored for a canonical transaction column
fn column_value(r: &TransactionRecord, column: &str) -> Value {
    let flag = |f: Option<bool>| f.map_or(Value::Null, |v| Value::Integer(i64::from(v)));
    let opt_text = |s: &Option<String>| s.clone().map_or(Value::Null, Value::Text);
    match column {
        COL_TYPE => opt_text(&r.tx_type),
        COL_AMOUNT => Value::Real(r.amount),
        COL_ORIGIN_ACCOUNT => opt_text(&r.origin_account_id),
        COL_DEST_ACCOUNT => opt_text(&r.dest_account_id),
        COL_ORIGIN_BEFORE => Value::Real(r.origin_balance_before),
        COL_ORIGIN_AFTER => Value::Real(r.origin_balance_after),
        COL_DEST_BEFORE => Value::Real(r.dest_balance_before),
        COL_DEST_AFTER => Value::Real(r.dest_balance_after),
        COL_IS_FRAUD => flag(r.is_fraud),
        COL_IS_FLAGGED_FRAUD => flag(r.is_flagged_fraud),
        _ => Value::Null,
    }
}

/// Create the transactions table if it does not exist yet.
pub fn init_transactions_table(db_path: &Path, table: &str) -> Result<()> {
    let conn = Connection::open(db_path)?;
    create_transactions_table(&conn, table, &TRANSACTION_COLUMNS)?;
    info!(db = %db_path.display(), table = %table, "Transactions table ready");
    Ok(())
}

/// Replace `table` with the rows of a transactions CSV file.
///
/// The table keeps only the columns the file has, so an unlabeled file
/// imports as an unlabeled table. Returns the number of rows imported.
pub fn import_csv(csv_path: &Path, db_path: &Path, table: &str) -> Result<usize> {
    let set = CsvFile::new(csv_path).load()?;
    let schema: Vec<(&str, &str)> = TRANSACTION_COLUMNS
        .iter()
        .copied()
        .filter(|(name, _)| set.has_column(name))
        .collect();

    let mut conn = Connection::open(db_path)?;
    let tx = conn.transaction()?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
    create_transactions_table(&tx, table, &schema)?;
    {
        let names: Vec<String> = schema.iter().map(|(name, _)| quote_ident(name)).collect();
        let placeholders = vec!["?"; schema.len()].join(", ");
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(table),
            names.join(", ")
        ))?;
        for r in &set.records {
            stmt.execute(params_from_iter(
                schema.iter().map(|(name, _)| column_value(r, name)),
            ))?;
        }
    }
    tx.commit()?;

    info!(
        csv = %csv_path.display(),
        db = %db_path.display(),
        table = %table,
        rows = set.records.len(),
        "Imported CSV into SQLite"
    );
    Ok(set.records.len())
}
