//! Append-only audit log, bound polymorphically to any document.
//!
//! One entry per successful `apply`, keyed `txn/{document_id}/{seq}` so a
//! prefix scan yields the causal order. Entries are never mutated; the
//! sha256 digest of the CBOR encoding makes tampering detectable.

use chrono::Utc;
use sled::{Batch, Db};

use crate::document::DocumentKind;
use crate::error::WorkflowError;
use crate::utils::TimeStamp;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AuditEntry {
    #[n(0)]
    pub document_kind: DocumentKind,
    #[n(1)]
    pub document_id: String,
    /// The status the document arrived at, not the one it left.
    #[n(2)]
    pub stage: String,
    #[n(3)]
    pub performed_by: String,
    #[n(4)]
    pub forwarded_by: String,
    #[n(5)]
    pub forwarded_to: Option<String>,
    #[n(6)]
    pub remarks: String,
    #[n(7)]
    pub timestamp: TimeStamp<Utc>,
}

impl AuditEntry {
    /// Serialise and digest, returning `(hash, cbor)`.
    pub fn build(&self) -> Result<(String, Vec<u8>), WorkflowError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

pub(crate) fn entry_key(document_id: &str, seq: u64) -> Vec<u8> {
    format!("txn/{document_id}/{seq:08}").into_bytes()
}

fn scan_prefix(document_id: &str) -> Vec<u8> {
    format!("txn/{document_id}/").into_bytes()
}

/// Full audit trail for a document, in causal order.
pub fn for_document(db: &Db, document_id: &str) -> Result<Vec<AuditEntry>, WorkflowError> {
    let mut entries = Vec::new();
    for item in db.scan_prefix(scan_prefix(document_id)) {
        let (_, value) = item?;
        entries.push(minicbor::decode(&value)?);
    }
    Ok(entries)
}

pub fn count(db: &Db, document_id: &str) -> Result<u64, WorkflowError> {
    let mut n = 0;
    for item in db.scan_prefix(scan_prefix(document_id)) {
        item?;
        n += 1;
    }
    Ok(n)
}

/// Timestamp of the latest entry; the executor bumps past this to keep the
/// per-document clock strictly monotonic.
pub fn last_timestamp(db: &Db, document_id: &str) -> Result<Option<TimeStamp<Utc>>, WorkflowError> {
    let mut last = None;
    for item in db.scan_prefix(scan_prefix(document_id)) {
        let (_, value) = item?;
        let entry: AuditEntry = minicbor::decode(&value)?;
        last = Some(entry.timestamp);
    }
    Ok(last)
}

/// Queue removal of the whole trail, for cascade deletion at initial stage.
pub(crate) fn remove_all(db: &Db, document_id: &str, batch: &mut Batch) -> Result<(), WorkflowError> {
    for item in db.scan_prefix(scan_prefix(document_id)) {
        let (key, _) = item?;
        batch.remove(key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;

    #[test]
    fn entry_digest_is_stable() {
        let actor = User::with_role("level_1");
        let entry = AuditEntry {
            document_kind: DocumentKind::SalesmanBarman,
            document_id: "SBM/117/2025-26/0001".to_string(),
            stage: "level_2".to_string(),
            performed_by: actor.id.clone(),
            forwarded_by: actor.id,
            forwarded_to: Some("level_2".to_string()),
            remarks: "ok".to_string(),
            timestamp: TimeStamp::now(),
        };

        let (hash_a, cbor) = entry.build().unwrap();
        let (hash_b, _) = entry.build().unwrap();

        assert_eq!(hash_a, hash_b);

        let decoded: AuditEntry = minicbor::decode(&cbor).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn entries_scan_in_causal_order() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let actor = User::with_role("level_1");

        for seq in 0..3u64 {
            let entry = AuditEntry {
                document_kind: DocumentKind::SalesmanBarman,
                document_id: "SBM/117/2025-26/0001".to_string(),
                stage: format!("level_{}", seq + 1),
                performed_by: actor.id.clone(),
                forwarded_by: actor.id.clone(),
                forwarded_to: None,
                remarks: String::new(),
                timestamp: TimeStamp::now(),
            };
            let (_, cbor) = entry.build().unwrap();
            db.insert(entry_key("SBM/117/2025-26/0001", seq), cbor).unwrap();
        }

        let trail = for_document(&db, "SBM/117/2025-26/0001").unwrap();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0].stage, "level_1");
        assert_eq!(trail[2].stage, "level_3");
    }
}
