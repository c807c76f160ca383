//! Walks a fresh license application through the full approval chain and
//! prints the resulting audit trail.
//!
//! Run with: cargo run --example end_to_end

use std::sync::Arc;

use excise_workflow::document::{DocumentKind, Payload};
use excise_workflow::seed;
use excise_workflow::user::{User, ROLE_LICENSEE};
use excise_workflow::{audit, Action, ActionPayload, ObjectionItem, WorkflowService};

fn main() -> anyhow::Result<()> {
    let db = sled::Config::new().temporary(true).open()?;
    let service = Arc::new(WorkflowService::new(Arc::new(db)));
    seed::install(&service)?;

    let applicant = User::with_role(ROLE_LICENSEE);
    let doc = service.create_document(
        DocumentKind::NewLicense,
        applicant.clone(),
        Payload::License {
            applicant_name: "S. Thakur".to_string(),
            pan: "ABCDE1234F".to_string(),
            phone: "9876543210".to_string(),
            address: "Lower Bazar, Shimla".to_string(),
            pin: "171001".to_string(),
            district_code: "117".to_string(),
            license_category: "Bar".to_string(),
        },
    )?;
    println!("created {} at stage {}", doc.id, doc.status_code);

    // first scrutiny raises an objection before settling the fee
    service.apply(
        &doc.id,
        &User::with_role("level_1"),
        Action::RaiseObjection,
        ActionPayload::RaiseObjection {
            objections: vec![ObjectionItem::new("address", "premises plan missing")],
        },
    )?;
    service.apply(
        &doc.id,
        &applicant,
        Action::ResolveObjection,
        ActionPayload::ResolveObjection {
            updates: vec![("address".to_string(), "Lower Bazar, Shimla (plan attached)".to_string())],
            remarks: Some("plan uploaded".to_string()),
        },
    )?;

    service.apply(
        &doc.id,
        &User::with_role("level_1"),
        Action::Approve,
        ActionPayload::approve_with_fee(150_000),
    )?;
    service.apply(
        &doc.id,
        &User::with_role("level_2"),
        Action::Approve,
        ActionPayload::approve(),
    )?;
    service.apply(
        &doc.id,
        &applicant,
        Action::Pay,
        ActionPayload::pay("CHLN-2025-0042", 150_000),
    )?;
    for level in ["level_3", "level_4", "level_5"] {
        service.apply(
            &doc.id,
            &User::with_role(level),
            Action::Approve,
            ActionPayload::approve(),
        )?;
    }

    let view = service.get_document(&doc.id)?;
    println!(
        "final stage {} (approved: {}, fee: {:?})",
        view.document.status_code, view.document.is_approved, view.document.yearly_fee
    );

    println!("\naudit trail:");
    for entry in audit::for_document(service.db(), &doc.id)? {
        println!(
            "  {} -> {} by {} ({})",
            entry.timestamp.to_datetime_utc().format("%Y-%m-%d %H:%M:%S%.6f"),
            entry.stage,
            entry.performed_by,
            entry.remarks,
        );
    }

    let printed = service.record_print(&doc.id, &applicant)?;
    println!("\nlicense printed, copy #{}", printed.print_count);

    Ok(())
}
