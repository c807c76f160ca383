//! Property-based tests for workflow engine invariants.
//!
//! These verify the universally quantified properties of the engine: audit
//! completeness and monotonicity over arbitrary action sequences, the
//! no-rule-no-move guarantee, objection conservation, id allocation and the
//! print-fee gate. Each case runs against its own temporary sled store, so
//! case counts are kept deliberately low.

use std::sync::Arc;

use proptest::prelude::*;

use excise_workflow::document::{Document, DocumentKind, Payload};
use excise_workflow::seed;
use excise_workflow::user::{User, ROLE_LICENSEE};
use excise_workflow::{audit, ids, objection};
use excise_workflow::{Action, ActionPayload, ObjectionItem, WorkflowService};

fn seeded_service() -> Arc<WorkflowService> {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let service = Arc::new(WorkflowService::new(Arc::new(db)));
    seed::install(&service).unwrap();
    service
}

fn license_payload() -> Payload {
    Payload::License {
        applicant_name: "A. Verma".to_string(),
        pan: "ABCDE1234F".to_string(),
        phone: "9876543210".to_string(),
        address: "Cart Road".to_string(),
        pin: "171001".to_string(),
        district_code: "117".to_string(),
        license_category: "Retail".to_string(),
    }
}

/// One attempted action drawn from a small pool of plausible requests. Most
/// are invalid at most stages; that is the point.
fn attempt(service: &WorkflowService, applicant: &User, id: &str, selector: u8) -> bool {
    let result = match selector % 9 {
        0 => service.apply(
            id,
            &User::with_role("level_1"),
            Action::Approve,
            ActionPayload::approve_with_fee(7_500),
        ),
        1 => service.apply(
            id,
            &User::with_role("level_2"),
            Action::Approve,
            ActionPayload::approve(),
        ),
        2 => service.apply(id, applicant, Action::Pay, ActionPayload::pay("T", 7_500)),
        3 => service.apply(
            id,
            &User::with_role("level_3"),
            Action::Approve,
            ActionPayload::approve(),
        ),
        4 => service.apply(
            id,
            &User::with_role("level_4"),
            Action::Approve,
            ActionPayload::approve(),
        ),
        5 => service.apply(
            id,
            &User::with_role("level_5"),
            Action::Approve,
            ActionPayload::approve(),
        ),
        6 => service.apply(
            id,
            &User::with_role("level_1"),
            Action::RaiseObjection,
            ActionPayload::RaiseObjection {
                objections: vec![ObjectionItem::new("pan", "illegible")],
            },
        ),
        7 => service.apply(
            id,
            applicant,
            Action::ResolveObjection,
            ActionPayload::ResolveObjection {
                updates: vec![],
                remarks: None,
            },
        ),
        _ => service.apply(
            id,
            &User::with_role("level_1"),
            Action::Approve,
            ActionPayload::approve(),
        ),
    };
    result.is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: every successful apply appends exactly one audit entry and
    /// the per-document timestamps are strictly increasing.
    #[test]
    fn prop_audit_is_complete_and_monotonic(selectors in prop::collection::vec(any::<u8>(), 0..25)) {
        let service = seeded_service();
        let applicant = User::with_role(ROLE_LICENSEE);
        let doc = service
            .create_document(DocumentKind::NewLicense, applicant.clone(), license_payload())
            .unwrap();

        let mut successes = 0u64;
        for selector in selectors {
            if attempt(&service, &applicant, &doc.id, selector) {
                successes += 1;
            }
        }

        prop_assert_eq!(audit::count(service.db(), &doc.id).unwrap(), successes);

        let trail = audit::for_document(service.db(), &doc.id).unwrap();
        for window in trail.windows(2) {
            prop_assert!(
                window[0].timestamp < window[1].timestamp,
                "audit timestamps must strictly increase"
            );
        }
    }

    /// Property: an actor whose role has no rule at the current status can
    /// never move the document, whatever state it has reached.
    #[test]
    fn prop_no_rule_no_move(selectors in prop::collection::vec(any::<u8>(), 0..15)) {
        let service = seeded_service();
        let applicant = User::with_role(ROLE_LICENSEE);
        let doc = service
            .create_document(DocumentKind::NewLicense, applicant.clone(), license_payload())
            .unwrap();

        for selector in selectors {
            attempt(&service, &applicant, &doc.id, selector);
        }

        let before = Document::load(service.db(), &doc.id).unwrap();
        let audit_before = audit::count(service.db(), &doc.id).unwrap();

        let outsider = User::with_role("auditor");
        let result = service.apply(&doc.id, &outsider, Action::Approve, ActionPayload::approve());
        prop_assert!(result.is_err());

        let after = Document::load(service.db(), &doc.id).unwrap();
        prop_assert_eq!(before, after);
        prop_assert_eq!(audit::count(service.db(), &doc.id).unwrap(), audit_before);
    }

    /// Property: raising `n` objections opens exactly `n`; resolving closes
    /// all of them and returns to the stage the objection status derives from.
    #[test]
    fn prop_objection_conservation(fields in prop::collection::vec("[a-z]{2,8}", 1..5)) {
        let service = seeded_service();
        let applicant = User::with_role(ROLE_LICENSEE);
        let doc = service
            .create_document(DocumentKind::NewLicense, applicant.clone(), license_payload())
            .unwrap();

        // field names are opaque at raise time; only resolution merges values
        let objections: Vec<ObjectionItem> = fields
            .iter()
            .map(|f| ObjectionItem::new(f, "deficient"))
            .collect();
        let n = objections.len();

        let doc2 = service
            .apply(
                &doc.id,
                &User::with_role("level_1"),
                Action::RaiseObjection,
                ActionPayload::RaiseObjection { objections },
            )
            .unwrap();
        prop_assert_eq!(&doc2.status_code, "level_1_objection");
        prop_assert_eq!(objection::open_for_document(service.db(), &doc.id).unwrap().len(), n);

        let doc3 = service
            .apply(
                &doc.id,
                &applicant,
                Action::ResolveObjection,
                ActionPayload::ResolveObjection { updates: vec![], remarks: None },
            )
            .unwrap();
        prop_assert_eq!(&doc3.status_code, "level_1");
        prop_assert!(objection::open_for_document(service.db(), &doc.id).unwrap().is_empty());
    }

    /// Property: sequential allocation yields distinct, contiguous,
    /// zero-padded ids for any district and count.
    #[test]
    fn prop_id_allocation_is_dense(district in 100u32..1000, count in 1usize..30) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let district = district.to_string();

        let mut seen = std::collections::HashSet::new();
        for n in 1..=count {
            let id = ids::allocate(&db, "SBM", Some(&district), "2025-26").unwrap();
            prop_assert_eq!(&id, &format!("SBM/{district}/2025-26/{n:04}"));
            prop_assert!(seen.insert(id));
        }
    }

    /// Property: recording a print fails exactly when the count sits on a
    /// multiple of five and the print fee has not been paid since.
    #[test]
    fn prop_print_fee_gates_every_fifth_print(total in 1u32..40) {
        let service = seeded_service();
        let applicant = User::with_role(ROLE_LICENSEE);
        let doc = service
            .create_document(DocumentKind::NewLicense, applicant.clone(), license_payload())
            .unwrap();

        // force the post-approval state; the chain itself is covered elsewhere
        let mut approved = Document::load(service.db(), &doc.id).unwrap();
        approved.is_approved = true;
        approved.status_code = "approved".to_string();
        approved.save(service.db()).unwrap();

        for _ in 0..total {
            let before = Document::load(service.db(), &doc.id).unwrap();
            let gated = before.print_count > 0
                && before.print_count % 5 == 0
                && !before.is_print_fee_paid;

            match service.record_print(&doc.id, &applicant) {
                Ok(after) => {
                    prop_assert!(!gated);
                    prop_assert_eq!(after.print_count, before.print_count + 1);
                }
                Err(err) => {
                    prop_assert!(gated);
                    prop_assert_eq!(err.code(), "precondition_failed");
                    service.mark_print_fee_paid(&doc.id, &applicant).unwrap();
                }
            }
        }
    }
}
