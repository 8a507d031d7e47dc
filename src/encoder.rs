//! Transaction-type encoding and column dropping shared by training and scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::TypeCode;
use crate::transaction::{
    EncodedRecord, TransactionRecord, COL_DEST_ACCOUNT, COL_IS_FLAGGED_FRAUD, COL_ORIGIN_ACCOUNT,
};

/// Code assigned to unrecognized or absent transaction types.
pub const UNKNOWN_TYPE_CODE: u8 = 0;

pub fn default_type_codes() -> Vec<TypeCode> {
    [
        ("CASH_OUT", 1),
        ("PAYMENT", 2),
        ("CASH_IN", 3),
        ("TRANSFER", 4),
        ("DEBIT", 5),
    ]
    .into_iter()
    .map(|(name, code)| TypeCode {
        name: name.to_string(),
        code,
    })
    .collect()
}

/// Identifying columns that never reach the classifier.
///
/// The feature set is fixed by `EncodedRecord`, so this list only names what
/// preprocessing leaves behind; it is not configurable.
pub const DROPPED_COLUMNS: [&str; 3] =
    [COL_ORIGIN_ACCOUNT, COL_DEST_ACCOUNT, COL_IS_FLAGGED_FRAUD];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    type_codes: BTreeMap<String, u8>,
}

impl FeatureEncoder {
    pub fn new(type_codes: &[TypeCode]) -> Self {
        Self {
            type_codes: type_codes
                .iter()
                .map(|tc| (tc.name.clone(), tc.code))
                .collect(),
        }
    }

    pub fn encode_type(&self, tx_type: Option<&str>) -> u8 {
        tx_type
            .and_then(|raw| self.type_codes.get(raw.trim()))
            .copied()
            .unwrap_or(UNKNOWN_TYPE_CODE)
    }

    /// Columns that survive preprocessing, in their original order.
    pub fn retained_columns(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .filter(|c| !DROPPED_COLUMNS.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    pub fn type_codes(&self) -> &BTreeMap<String, u8> {
        &self.type_codes
    }
}

/// Anything the preprocessing stage accepts.
///
/// Encoding an `EncodedRecord` is the identity, so running preprocessing
/// twice yields the same output as running it once.
pub trait Preprocess {
    fn preprocess(&self, encoder: &FeatureEncoder) -> EncodedRecord;
}

impl Preprocess for TransactionRecord {
    fn preprocess(&self, encoder: &FeatureEncoder) -> EncodedRecord {
        EncodedRecord {
            tx_type: encoder.encode_type(self.tx_type.as_deref()),
            amount: self.amount,
            origin_balance_before: self.origin_balance_before,
            origin_balance_after: self.origin_balance_after,
            dest_balance_before: self.dest_balance_before,
            dest_balance_after: self.dest_balance_after,
            is_fraud: self.is_fraud,
        }
    }
}

impl Preprocess for EncodedRecord {
    fn preprocess(&self, _encoder: &FeatureEncoder) -> EncodedRecord {
        self.clone()
    }
}

pub fn preprocess<R: Preprocess>(records: &[R], encoder: &FeatureEncoder) -> Vec<EncodedRecord> {
    records.iter().map(|r| r.preprocess(encoder)).collect()
}
