//! Field-level objections raised against a document.
//!
//! Created when the executor handles `RAISE_OBJECTION`, closed when
//! `RESOLVE_OBJECTION` succeeds. Objections hand control back to the
//! applicant; the role that raised the most recent one is where control
//! returns on resolution.

use chrono::Utc;
use sled::{Batch, Db};

use crate::document::DocumentKind;
use crate::error::WorkflowError;
use crate::utils::TimeStamp;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Objection {
    #[n(0)]
    pub document_kind: DocumentKind,
    #[n(1)]
    pub document_id: String,
    /// Opaque field name in the document payload.
    #[n(2)]
    pub field: String,
    #[n(3)]
    pub remarks: String,
    #[n(4)]
    pub raised_by: String,
    #[n(5)]
    pub raised_by_role: String,
    #[n(6)]
    pub raised_on: TimeStamp<Utc>,
    #[n(7)]
    pub resolved_on: Option<TimeStamp<Utc>>,
}

impl Objection {
    pub fn is_open(&self) -> bool {
        self.resolved_on.is_none()
    }
}

pub(crate) fn objection_key(document_id: &str, seq: u64) -> Vec<u8> {
    format!("obj/{document_id}/{seq:04}").into_bytes()
}

fn scan_prefix(document_id: &str) -> Vec<u8> {
    format!("obj/{document_id}/").into_bytes()
}

pub fn for_document(db: &Db, document_id: &str) -> Result<Vec<Objection>, WorkflowError> {
    Ok(raw_for_document(db, document_id)?
        .into_iter()
        .map(|(_, o)| o)
        .collect())
}

pub fn open_for_document(db: &Db, document_id: &str) -> Result<Vec<Objection>, WorkflowError> {
    Ok(for_document(db, document_id)?
        .into_iter()
        .filter(Objection::is_open)
        .collect())
}

pub fn count(db: &Db, document_id: &str) -> Result<u64, WorkflowError> {
    let mut n = 0;
    for item in db.scan_prefix(scan_prefix(document_id)) {
        item?;
        n += 1;
    }
    Ok(n)
}

/// Objections with their storage keys, for in-place resolution writes.
pub(crate) fn raw_for_document(
    db: &Db,
    document_id: &str,
) -> Result<Vec<(Vec<u8>, Objection)>, WorkflowError> {
    let mut found = Vec::new();
    for item in db.scan_prefix(scan_prefix(document_id)) {
        let (key, value) = item?;
        found.push((key.to_vec(), minicbor::decode(&value)?));
    }
    Ok(found)
}

/// Queue removal of all objections, for cascade deletion at initial stage.
pub(crate) fn remove_all(db: &Db, document_id: &str, batch: &mut Batch) -> Result<(), WorkflowError> {
    for item in db.scan_prefix(scan_prefix(document_id)) {
        let (key, _) = item?;
        batch.remove(key);
    }
    Ok(())
}
