use serde::{de, Deserialize, Deserializer};

/// Canonical column names, in input order.
pub const COL_TYPE: &str = "type";
pub const COL_AMOUNT: &str = "amount";
pub const COL_ORIGIN_ACCOUNT: &str = "originAccountId";
pub const COL_DEST_ACCOUNT: &str = "destAccountId";
pub const COL_ORIGIN_BEFORE: &str = "originBalanceBefore";
pub const COL_ORIGIN_AFTER: &str = "originBalanceAfter";
pub const COL_DEST_BEFORE: &str = "destBalanceBefore";
pub const COL_DEST_AFTER: &str = "destBalanceAfter";
pub const COL_IS_FRAUD: &str = "isFraud";
pub const COL_IS_FLAGGED_FRAUD: &str = "isFlaggedFraud";

// Output-only columns
pub const COL_ACTUAL_LABEL: &str = "actualLabel";
pub const COL_PREDICTED_LABEL: &str = "predictedLabel";
pub const COL_FRAUD_PROBABILITY: &str = "fraudProbability";

// Column names used by the PaySim-style source data
const COLUMN_ALIASES: [(&str, &str); 6] = [
    ("nameOrig", COL_ORIGIN_ACCOUNT),
    ("nameDest", COL_DEST_ACCOUNT),
    ("oldbalanceOrg", COL_ORIGIN_BEFORE),
    ("newbalanceOrig", COL_ORIGIN_AFTER),
    ("oldbalanceDest", COL_DEST_BEFORE),
    ("newbalanceDest", COL_DEST_AFTER),
];

pub const REQUIRED_COLUMNS: [&str; 5] = [
    COL_AMOUNT,
    COL_ORIGIN_BEFORE,
    COL_ORIGIN_AFTER,
    COL_DEST_BEFORE,
    COL_DEST_AFTER,
];

/// Number of features the classifier is trained on.
pub const FEATURE_COUNT: usize = 6;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    COL_TYPE,
    COL_AMOUNT,
    COL_ORIGIN_BEFORE,
    COL_ORIGIN_AFTER,
    COL_DEST_BEFORE,
    COL_DEST_AFTER,
];

/// Map a source column name onto its canonical spelling.
pub fn canonical_column(name: &str) -> &str {
    let name = name.trim();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name)
}

/// Canonical names of required columns absent from `columns`.
pub fn missing_required_columns(columns: &[String]) -> Vec<&'static str> {
    REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransactionRecord {
    #[serde(rename = "type", default)]
    pub tx_type: Option<String>,
    #[serde(rename = "amount")]
    pub amount: f64,
    #[serde(rename = "originAccountId", alias = "nameOrig", default)]
    pub origin_account_id: Option<String>,
    #[serde(rename = "destAccountId", alias = "nameDest", default)]
    pub dest_account_id: Option<String>,
    #[serde(rename = "originBalanceBefore", alias = "oldbalanceOrg")]
    pub origin_balance_before: f64,
    #[serde(rename = "originBalanceAfter", alias = "newbalanceOrig")]
    pub origin_balance_after: f64,
    #[serde(rename = "destBalanceBefore", alias = "oldbalanceDest")]
    pub dest_balance_before: f64,
    #[serde(rename = "destBalanceAfter", alias = "newbalanceDest")]
    pub dest_balance_after: f64,
    #[serde(rename = "isFraud", default, deserialize_with = "deserialize_flag")]
    pub is_fraud: Option<bool>,
    #[serde(rename = "isFlaggedFraud", default, deserialize_with = "deserialize_flag")]
    pub is_flagged_fraud: Option<bool>,
}

/// A transaction after the type code is applied and identifying columns are gone.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub tx_type: u8,
    pub amount: f64,
    pub origin_balance_before: f64,
    pub origin_balance_after: f64,
    pub dest_balance_before: f64,
    pub dest_balance_after: f64,
    pub is_fraud: Option<bool>,
}

impl EncodedRecord {
    pub fn to_feature_vector(&self) -> [f64; FEATURE_COUNT] {
        // Non-finite values are fed to the tree as 0.0
        let finite = |x: f64| if x.is_finite() { x } else { 0.0 };
        [
            f64::from(self.tx_type),
            finite(self.amount),
            finite(self.origin_balance_before),
            finite(self.origin_balance_after),
            finite(self.dest_balance_before),
            finite(self.dest_balance_after),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub record: EncodedRecord,
    pub predicted_label: bool,
    pub fraud_probability: f64,
    pub actual_label: Option<bool>,
}

/// Records loaded from one source together with the canonical column names
/// the source exposed.
#[derive(Debug, Clone, Default)]
pub struct TransactionSet {
    pub columns: Vec<String>,
    pub records: Vec<TransactionRecord>,
}

impl TransactionSet {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Parse a 0/1 or true/false flag. Empty and absent mean "not provided".
pub fn parse_flag(raw: &str) -> Option<std::result::Result<bool, String>> {
    match raw.trim() {
        "" => None,
        "1" | "1.0" | "true" | "True" | "TRUE" => Some(Ok(true)),
        "0" | "0.0" | "false" | "False" | "FALSE" => Some(Ok(false)),
        other => Some(Err(format!("invalid boolean flag `{other}`"))),
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().and_then(parse_flag) {
        None => Ok(None),
        Some(Ok(flag)) => Ok(Some(flag)),
        Some(Err(msg)) => Err(de::Error::custom(msg)),
    }
}
