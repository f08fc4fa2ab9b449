//! Recorded transaction descriptors.
//!
//! Transactions are captured once from the transaction source (one JSON
//! object per hash) and are immutable afterwards; replays consume them
//! in file order.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One recorded on-chain transaction to be replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Transaction hash.
    pub hash: String,
    /// Sender address.
    pub from: String,
    /// Block the transaction was mined in; replays fork at `blockNumber - 1`.
    pub block_number: u64,
    /// Name of the invoked function.
    pub function_name: String,
    /// Raw calldata, 0x-prefixed hex.
    pub input: String,
    /// Decoded arguments (name -> rendered value) from the transaction
    /// scraper; carried verbatim into report rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_input: Option<serde_json::Value>,
    /// Transferred value in wei, decimal or 0x-hex string.
    #[serde(default)]
    pub value: String,
}

impl TransactionRecord {
    /// Load every transaction from a JSON sample file (an array of records),
    /// preserving file order.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<TransactionRecord>> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read transaction sample {}", path.display()))?;
        let transactions: Vec<TransactionRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed transaction sample {}", path.display()))?;
        Ok(transactions)
    }

    /// Load a single transaction by hash from a sample file.
    pub fn load_by_hash(path: impl AsRef<Path>, hash: &str) -> Result<TransactionRecord> {
        let transactions = Self::load_all(path)?;
        transactions
            .into_iter()
            .find(|tx| tx.hash.eq_ignore_ascii_case(hash))
            .with_context(|| format!("transaction {hash} not found in sample"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        write!(
            file,
            r#"[
                {{
                    "hash": "0xaaa1",
                    "from": "0xf00d000000000000000000000000000000000001",
                    "blockNumber": 19000001,
                    "functionName": "transfer",
                    "input": "0xa9059cbb",
                    "value": "0"
                }},
                {{
                    "hash": "0xaaa2",
                    "from": "0xf00d000000000000000000000000000000000002",
                    "blockNumber": 19000002,
                    "functionName": "approve",
                    "input": "0x095ea7b3",
                    "value": "1000"
                }}
            ]"#
        )
        .expect("write sample");
        file
    }

    #[test]
    fn test_load_all_preserves_order() {
        let file = sample_file();
        let txs = TransactionRecord::load_all(file.path()).expect("load");
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash, "0xaaa1");
        assert_eq!(txs[1].hash, "0xaaa2");
        assert_eq!(txs[0].block_number, 19000001);
    }

    #[test]
    fn test_load_by_hash() {
        let file = sample_file();
        let tx = TransactionRecord::load_by_hash(file.path(), "0xAAA2").expect("load");
        assert_eq!(tx.function_name, "approve");
        assert!(TransactionRecord::load_by_hash(file.path(), "0xdead").is_err());
    }
}
