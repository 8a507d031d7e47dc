//! One-way pseudonymization of account identifiers.

use sha2::{Digest, Sha256};

use crate::transaction::TransactionRecord;

/// Name recorded in the pipeline artifact for the masking function.
pub const MASKING_FUNCTION: &str = "sha256";

// Lowercase hex SHA-256 of the UTF-8 bytes, always 64 characters
pub fn mask_identifier(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Replace both account identifiers of every record with their digests.
/// Records without an identifier are left alone.
pub fn mask_account_ids(records: &mut [TransactionRecord]) {
    for record in records.iter_mut() {
        for id in [&mut record.origin_account_id, &mut record.dest_account_id] {
            if let Some(raw) = id.as_mut() {
                *raw = mask_identifier(raw);
            }
        }
    }
}
