//! Registered Statement Types
//!
//! Records for statements as they move through registration:
//! submitted COSE bytes → appended log entry → issued receipt.

use serde::{Deserialize, Serialize};

/// Metadata row for a registered statement.
///
/// `entry_id` equals the tree size at the moment of append (0-indexed
/// position); both it and `statement_hash` are stable identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRecord {
    /// Position in the log, assigned at append time
    pub entry_id: u64,
    /// SHA-256 of the submitted COSE_Sign1 bytes (hex)
    pub statement_hash: String,
    /// The submitted COSE_Sign1 bytes, stored verbatim
    #[serde(skip_serializing)]
    pub statement: Vec<u8>,
    /// Issuer, from CWT claims (label 15) or legacy label 391
    pub iss: Option<String>,
    /// Subject, from CWT claims or legacy label 392
    pub sub: Option<String>,
    /// Content type of the signed payload (label 3)
    pub cty: Option<String>,
    /// Statement type (label 16)
    pub typ: Option<String>,
    /// Hash-envelope payload hash algorithm (label 258)
    pub payload_hash_alg: Option<i64>,
    /// Hash-envelope payload hash (hex)
    pub payload_hash: Option<String>,
    /// Tree size immediately after this statement was appended
    pub tree_size: u64,
    /// Object-store key of the entry tile holding the leaf
    pub entry_tile_key: String,
    /// Offset of the leaf within its entry tile
    pub entry_tile_offset: u32,
    /// Registration timestamp (unix millis)
    pub registered_at: i64,
}

impl StatementRecord {
    /// Create a record for submitted statement bytes.
    ///
    /// Log-assigned fields (`entry_id`, `tree_size`, tile coordinates) are
    /// zeroed here and filled in by the tile log inside the append lock.
    pub fn new(statement_hash: String, statement: Vec<u8>) -> Self {
        Self {
            entry_id: 0,
            statement_hash,
            statement,
            iss: None,
            sub: None,
            cty: None,
            typ: None,
            payload_hash_alg: None,
            payload_hash: None,
            tree_size: 0,
            entry_tile_key: String::new(),
            entry_tile_offset: 0,
            registered_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Receipt bookkeeping row.
///
/// The served receipt is recomputed at the current tree size on every read;
/// this row records what was handed out at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub entry_id: u64,
    /// Tree size the first receipt was issued at
    pub tree_size: u64,
    /// Issue timestamp (unix millis)
    pub issued_at: i64,
}

/// One row of checkpoint history: the signed tree head for a given size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeStateRow {
    pub tree_size: u64,
    /// Root hash at `tree_size` (hex, 64 lowercase chars)
    pub root_hash: String,
    /// Encoded signed-note checkpoint
    pub checkpoint: String,
    /// Creation timestamp (unix millis)
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = StatementRecord::new("ab".repeat(32), vec![0x84]);
        assert_eq!(record.entry_id, 0);
        assert_eq!(record.statement, vec![0x84]);
        assert!(record.iss.is_none());
        assert!(record.registered_at > 0);
    }

    #[test]
    fn test_record_serialization_hides_statement_bytes() {
        let record = StatementRecord::new("00".repeat(32), vec![1, 2, 3]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("statement_hash"));
        assert!(!json.contains("[1,2,3]"));
    }
}
