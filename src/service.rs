//! Service layer API for workflow operations.
//!
//! [`WorkflowService::apply`] is the single mutation path: it takes a row
//! lock on the document, resolves the transition rule under the actor's
//! role, validates action-specific preconditions, performs the side effects,
//! advances the status and appends one audit entry — all committed in one
//! atomic batch. A failed `apply` leaves the document bit-identical.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sled::{Batch, Db};

use crate::audit::{self, AuditEntry};
use crate::document::{doc_key, Document, DocumentKind, Payload};
use crate::error::WorkflowError;
use crate::objection::{self, Objection};
use crate::rules::{Action, RuleTable};
use crate::status::StatusRegistry;
use crate::user::User;
use crate::utils::TimeStamp;
use crate::ids;

/// One field-level deficiency in a `RAISE_OBJECTION` request.
#[derive(Debug, Clone)]
pub struct ObjectionItem {
    pub field: String,
    pub remarks: String,
}

impl ObjectionItem {
    pub fn new(field: &str, remarks: &str) -> Self {
        Self {
            field: field.to_string(),
            remarks: remarks.to_string(),
        }
    }
}

/// Action-specific input to [`WorkflowService::apply`].
#[derive(Debug, Clone)]
pub enum ActionPayload {
    Approve {
        remarks: Option<String>,
        /// Required at a fee-setting stage until a fee is fixed; refused
        /// elsewhere, and refused again once the fee is immutable.
        fee_amount: Option<u64>,
        /// Permitted iff the current status is category-revisable.
        new_category: Option<String>,
    },
    Reject {
        remarks: String,
    },
    RaiseObjection {
        objections: Vec<ObjectionItem>,
    },
    ResolveObjection {
        /// `(field, value)` pairs merged into the document payload.
        updates: Vec<(String, String)>,
        remarks: Option<String>,
    },
    Pay {
        payment_id: String,
        amount: u64,
        paid_on: TimeStamp<Utc>,
    },
    Forward {
        remarks: Option<String>,
    },
    Expire,
}

impl ActionPayload {
    pub fn approve() -> Self {
        Self::Approve {
            remarks: None,
            fee_amount: None,
            new_category: None,
        }
    }

    pub fn approve_with_fee(fee: u64) -> Self {
        Self::Approve {
            remarks: None,
            fee_amount: Some(fee),
            new_category: None,
        }
    }

    pub fn reject(remarks: &str) -> Self {
        Self::Reject {
            remarks: remarks.to_string(),
        }
    }

    pub fn pay(payment_id: &str, amount: u64) -> Self {
        Self::Pay {
            payment_id: payment_id.to_string(),
            amount,
            paid_on: TimeStamp::now(),
        }
    }
}

/// Dashboard grouping derived from status and the actor's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Applied,
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Applied => "applied",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub applied: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

/// A document with its audit trail and open objections.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document: Document,
    pub audit_log: Vec<AuditEntry>,
    pub open_objections: Vec<Objection>,
}

pub struct WorkflowService {
    db: Arc<Db>,
    statuses: StatusRegistry,
    rules: RuleTable,
    // per-document row locks; the expirer try-locks these and defers
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkflowService {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            statuses: StatusRegistry::new(Arc::clone(&db)),
            rules: RuleTable::new(Arc::clone(&db)),
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn statuses(&self) -> &StatusRegistry {
        &self.statuses
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Create a document of the given kind with a validated payload.
    ///
    /// The id is allocated under the atomic per-(prefix, district, fiscal
    /// year) counter, so parallel creations never collide.
    pub fn create_document(
        &self,
        kind: DocumentKind,
        applicant: User,
        payload: Payload,
    ) -> Result<Document, WorkflowError> {
        if !applicant.is_authenticated() {
            return Err(WorkflowError::NotAuthenticated);
        }
        payload.validate()?;

        let initial = self.statuses.get(kind.initial_status()).map_err(|_| {
            WorkflowError::RuleConfiguration(format!(
                "initial status '{}' is not seeded",
                kind.initial_status()
            ))
        })?;
        if !initial.active {
            return Err(WorkflowError::RuleConfiguration(format!(
                "initial status '{}' is inactive",
                initial.code
            )));
        }

        let fy = ids::fiscal_year(Utc::now());
        let id = ids::allocate(&self.db, kind.prefix(), payload.district_code(), &fy)?;
        if self.db.get(doc_key(&id))?.is_some() {
            return Err(WorkflowError::Conflict(format!("id '{id}' already taken")));
        }

        let document = Document::new(id, kind, applicant, payload);
        document.save(&self.db)?;

        tracing::info!(document = %document.id, status = %document.status_code, "document created");
        Ok(document)
    }

    /// Read a document together with its audit log and open objections.
    pub fn get_document(&self, id: &str) -> Result<DocumentView, WorkflowError> {
        let document = Document::load(&self.db, id)?;
        let audit_log = audit::for_document(&self.db, id)?;
        let open_objections = objection::open_for_document(&self.db, id)?;
        Ok(DocumentView {
            document,
            audit_log,
            open_objections,
        })
    }

    /// Delete a document still at its initial stage. Audit entries and
    /// objections cascade with it.
    pub fn delete_document(&self, id: &str, actor: &User) -> Result<(), WorkflowError> {
        let lock = self.row_lock(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let document = Document::load(&self.db, id)?;
        if !document.at_initial_status() {
            return Err(WorkflowError::PreconditionFailed(
                "only documents at the initial stage may be deleted".to_string(),
            ));
        }
        if document.applicant.id != actor.id && !actor.is_superuser {
            return Err(WorkflowError::NotAuthorized(actor.id.clone()));
        }

        let mut batch = Batch::default();
        batch.remove(doc_key(id));
        audit::remove_all(&self.db, id, &mut batch)?;
        objection::remove_all(&self.db, id, &mut batch)?;
        self.db.apply_batch(batch)?;

        tracing::info!(document = id, "document deleted at initial stage");
        Ok(())
    }

    /// Apply one workflow action to a document. See the module docs for the
    /// transactional contract.
    pub fn apply(
        &self,
        document_id: &str,
        actor: &User,
        action: Action,
        payload: ActionPayload,
    ) -> Result<Document, WorkflowError> {
        if !actor.is_authenticated() {
            return Err(WorkflowError::NotAuthenticated);
        }
        if actor.role.is_empty() {
            return Err(WorkflowError::NotAuthorized(actor.id.clone()));
        }

        let lock = self.row_lock(document_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.apply_locked(document_id, actor, action, payload)
    }

    /// The body of `apply`, run while the caller holds the row lock.
    pub(crate) fn apply_locked(
        &self,
        document_id: &str,
        actor: &User,
        action: Action,
        payload: ActionPayload,
    ) -> Result<Document, WorkflowError> {
        let mut document = Document::load(&self.db, document_id)?;
        let current_code = document.current_status_code().to_string();

        // approved documents only accept post-approval actions
        if document.is_approved && action != Action::Pay {
            return Err(WorkflowError::TransitionNotPermitted {
                status: current_code,
                action: action.code().to_string(),
                role: actor.role.clone(),
            });
        }

        let rule = self.rules.lookup(&current_code, action, actor)?;

        let current = self.statuses.get(&current_code).map_err(|_| {
            tracing::error!(document = document_id, status = %current_code, "document sits at unknown status");
            WorkflowError::RuleConfiguration(format!(
                "document '{document_id}' sits at unknown status '{current_code}'"
            ))
        })?;
        let next = self.statuses.get(&rule.next_status).map_err(|_| {
            tracing::error!(
                status = %current_code,
                action = %action,
                role = %rule.role,
                next = %rule.next_status,
                "rule names unknown next status"
            );
            WorkflowError::RuleConfiguration(format!(
                "rule ({current_code}, {action}, {}) names unknown next status '{}'",
                rule.role, rule.next_status
            ))
        })?;

        let ts = self.next_audit_timestamp(document_id)?;
        let mut batch = Batch::default();
        let mut remarks = String::new();
        let mut forwarded_to = self.rules.roles_at(&next.code)?.into_iter().next();

        match (action, payload) {
            (
                Action::Approve,
                ActionPayload::Approve {
                    remarks: r,
                    fee_amount,
                    new_category,
                },
            ) => {
                remarks = r.unwrap_or_default();
                if current.flags.fee_setting {
                    match (fee_amount, document.is_fee_calculated) {
                        (Some(fee), false) => {
                            document.yearly_fee = Some(fee);
                            document.is_fee_calculated = true;
                        }
                        (Some(_), true) => {
                            return Err(WorkflowError::PreconditionFailed(
                                "fee is already fixed for this document".to_string(),
                            ));
                        }
                        // fee already on file; a revisit of the stage passes through
                        (None, true) => {}
                        (None, false) => {
                            return Err(WorkflowError::PreconditionFailed(
                                "fee amount required at a fee-setting stage".to_string(),
                            ));
                        }
                    }
                } else if fee_amount.is_some() {
                    return Err(WorkflowError::PreconditionFailed(
                        "fee amount only accepted at a fee-setting stage".to_string(),
                    ));
                }
                if let Some(category) = new_category {
                    if !current.flags.category_revisable {
                        return Err(WorkflowError::PreconditionFailed(
                            "category change only permitted at a revisable stage".to_string(),
                        ));
                    }
                    let old = document.payload.license_category().unwrap_or("-").to_string();
                    remarks = if remarks.is_empty() {
                        format!("category revised from '{old}' to '{category}'")
                    } else {
                        format!("category revised from '{old}' to '{category}'; {remarks}")
                    };
                    document.new_category = Some(category);
                }
            }
            (Action::Reject, ActionPayload::Reject { remarks: r }) => {
                if r.trim().is_empty() {
                    return Err(WorkflowError::PreconditionFailed(
                        "rejection requires remarks".to_string(),
                    ));
                }
                remarks = r;
            }
            (Action::RaiseObjection, ActionPayload::RaiseObjection { objections }) => {
                if objections.is_empty() {
                    return Err(WorkflowError::PreconditionFailed(
                        "objection list is empty".to_string(),
                    ));
                }
                let base = objection::count(&self.db, document_id)?;
                for (i, item) in objections.iter().enumerate() {
                    let obj = Objection {
                        document_kind: document.kind,
                        document_id: document_id.to_string(),
                        field: item.field.clone(),
                        remarks: item.remarks.clone(),
                        raised_by: actor.id.clone(),
                        raised_by_role: actor.role.clone(),
                        raised_on: ts.clone(),
                        resolved_on: None,
                    };
                    batch.insert(
                        objection::objection_key(document_id, base + i as u64),
                        minicbor::to_vec(&obj)?,
                    );
                }
                remarks = format!("{} objection(s) raised", objections.len());
                // control passes back to the applicant
                forwarded_to = Some(document.applicant.role.clone());
            }
            (
                Action::ResolveObjection,
                ActionPayload::ResolveObjection {
                    updates,
                    remarks: r,
                },
            ) => {
                let raw = objection::raw_for_document(&self.db, document_id)?;
                if !raw.iter().any(|(_, o)| o.is_open()) {
                    return Err(WorkflowError::PreconditionFailed(
                        "no open objections to resolve".to_string(),
                    ));
                }
                for (field, value) in &updates {
                    document.payload.set_field(field, value)?;
                }
                document.payload.validate()?;

                let mut last_raiser_role = None;
                for (key, mut obj) in raw {
                    if obj.is_open() {
                        last_raiser_role = Some(obj.raised_by_role.clone());
                        obj.resolved_on = Some(ts.clone());
                        batch.insert(key, minicbor::to_vec(&obj)?);
                    }
                }
                // control returns to whoever raised the latest objection
                forwarded_to = last_raiser_role;
                remarks = r.unwrap_or_else(|| "objections resolved".to_string());
            }
            (
                Action::Pay,
                ActionPayload::Pay {
                    payment_id,
                    amount,
                    paid_on,
                },
            ) => {
                if !current.flags.payment_awaiting {
                    return Err(WorkflowError::PreconditionFailed(
                        "document is not awaiting payment".to_string(),
                    ));
                }
                if document.is_license_fee_paid {
                    return Err(WorkflowError::PreconditionFailed(
                        "license fee already paid".to_string(),
                    ));
                }
                if let Some(due) = document.required_payment_for(&current) {
                    if amount != due {
                        return Err(WorkflowError::PreconditionFailed(format!(
                            "expected payment of {due}, got {amount}"
                        )));
                    }
                }
                document.is_license_fee_paid = true;
                document.payment_ref = Some(payment_id.clone());
                remarks = format!(
                    "payment {payment_id} of {amount} received on {}",
                    paid_on.to_datetime_utc().date_naive()
                );
            }
            (Action::Forward, ActionPayload::Forward { remarks: r }) => {
                remarks = r.unwrap_or_default();
            }
            (Action::Expire, ActionPayload::Expire) => {
                remarks = "expired by time rule".to_string();
            }
            _ => {
                return Err(WorkflowError::PreconditionFailed(
                    "payload does not match action".to_string(),
                ));
            }
        }

        document.set_status(&next.code, ts.clone());
        if next.flags.terminal_approved {
            document.is_approved = true;
        }

        let seq = audit::count(&self.db, document_id)?;
        let entry = AuditEntry {
            document_kind: document.kind,
            document_id: document_id.to_string(),
            stage: next.code.clone(),
            performed_by: actor.id.clone(),
            forwarded_by: actor.id.clone(),
            forwarded_to,
            remarks,
            timestamp: ts,
        };
        let (_, entry_cbor) = entry.build()?;
        batch.insert(audit::entry_key(document_id, seq), entry_cbor);
        batch.insert(doc_key(document_id), document.encode()?);
        self.db.apply_batch(batch)?;

        tracing::info!(
            document = document_id,
            from = %current_code,
            to = %next.code,
            action = %action,
            role = %actor.role,
            "transition applied"
        );
        Ok(document)
    }

    /// List documents of a kind falling in the given bucket for this actor.
    pub fn list_documents(
        &self,
        kind: DocumentKind,
        bucket: Bucket,
        actor: &User,
    ) -> Result<Vec<Document>, WorkflowError> {
        let mut found = Vec::new();
        for document in self.scan_kind(kind)? {
            if self.bucket_of(&document, actor)? == bucket {
                found.push(document);
            }
        }
        Ok(found)
    }

    /// Per-bucket cardinality for the actor's dashboard.
    pub fn dashboard_counts(
        &self,
        kind: DocumentKind,
        actor: &User,
    ) -> Result<BucketCounts, WorkflowError> {
        let mut counts = BucketCounts::default();
        for document in self.scan_kind(kind)? {
            match self.bucket_of(&document, actor)? {
                Bucket::Applied => counts.applied += 1,
                Bucket::Pending => counts.pending += 1,
                Bucket::Approved => counts.approved += 1,
                Bucket::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }

    /// Which bucket a document falls in from this actor's point of view:
    /// terminal flags win, then "actionable by my role" means pending.
    pub fn bucket_of(&self, document: &Document, actor: &User) -> Result<Bucket, WorkflowError> {
        let status = self.statuses.get(&document.status_code)?;
        if status.flags.terminal_approved {
            return Ok(Bucket::Approved);
        }
        if status.flags.terminal_rejected {
            return Ok(Bucket::Rejected);
        }
        if !self
            .rules
            .allowed_actions(&document.status_code, actor)?
            .is_empty()
        {
            return Ok(Bucket::Pending);
        }
        Ok(Bucket::Applied)
    }

    /// Record one print of an approved document. On the 6th and every
    /// subsequent 5th print the print fee must have been paid; recording the
    /// gated print consumes the latch.
    pub fn record_print(&self, id: &str, actor: &User) -> Result<Document, WorkflowError> {
        if !actor.is_authenticated() {
            return Err(WorkflowError::NotAuthenticated);
        }
        let lock = self.row_lock(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut document = Document::load(&self.db, id)?;
        if !document.is_approved {
            return Err(WorkflowError::PreconditionFailed(
                "printing requires an approved document".to_string(),
            ));
        }
        if document.print_count > 0 && document.print_count % 5 == 0 {
            if !document.is_print_fee_paid {
                return Err(WorkflowError::PreconditionFailed(
                    "print fee due before further prints".to_string(),
                ));
            }
            document.is_print_fee_paid = false;
        }
        document.print_count += 1;
        document.updated_at = TimeStamp::now();
        document.save(&self.db)?;
        Ok(document)
    }

    pub fn mark_print_fee_paid(&self, id: &str, actor: &User) -> Result<Document, WorkflowError> {
        if !actor.is_authenticated() {
            return Err(WorkflowError::NotAuthenticated);
        }
        let lock = self.row_lock(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut document = Document::load(&self.db, id)?;
        document.is_print_fee_paid = true;
        document.updated_at = TimeStamp::now();
        document.save(&self.db)?;
        Ok(document)
    }

    pub(crate) fn row_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // a strong count of 1 means only the map holds the lock
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id.to_string()).or_default().clone()
    }

    pub(crate) fn scan_kind(&self, kind: DocumentKind) -> Result<Vec<Document>, WorkflowError> {
        let prefix = format!("doc/{}/", kind.prefix()).into_bytes();
        let mut documents = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (_, value) = item?;
            documents.push(minicbor::decode(&value)?);
        }
        Ok(documents)
    }

    /// Per-document monotonic clock: never before the latest audit entry.
    fn next_audit_timestamp(&self, id: &str) -> Result<TimeStamp<Utc>, WorkflowError> {
        let now = Utc::now();
        Ok(match audit::last_timestamp(&self.db, id)? {
            Some(last) if last.to_datetime_utc() >= now => {
                TimeStamp::from(last.to_datetime_utc() + chrono::Duration::microseconds(1))
            }
            _ => TimeStamp::from(now),
        })
    }
}
