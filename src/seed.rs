//! Seeded status catalogs and rule sets for the shipped workflows.
//!
//! Editing these tables changes the workflow without code changes; nothing
//! in the executor knows the shape of any chain. Rejection destinations are
//! enumerated explicitly per level rather than assumed by convention.

use crate::error::WorkflowError;
use crate::rules::{Action, TransitionRule};
use crate::service::WorkflowService;
use crate::status::{Status, StatusFlags};
use crate::user::{ROLE_LICENSEE, ROLE_SYSTEM};

pub const ROLE_DEPOT_MANAGER: &str = "depot_manager";
pub const ROLE_OFFICER_IN_CHARGE: &str = "officer_in_charge";
pub const ROLE_DEPUTY_COMMISSIONER: &str = "deputy_commissioner";
pub const ROLE_COMMISSIONER: &str = "commissioner";
pub const ROLE_DISTILLERY_OFFICER: &str = "distillery_officer";

/// Install every shipped status and rule into a fresh store.
pub fn install(service: &WorkflowService) -> Result<(), WorkflowError> {
    for status in license_statuses()
        .into_iter()
        .chain(requisition_statuses())
        .chain(revalidation_statuses())
        .chain(cancellation_statuses())
    {
        service.statuses().insert(status)?;
    }
    for rule in license_rules()
        .into_iter()
        .chain(requisition_rules())
        .chain(revalidation_rules())
        .chain(cancellation_rules())
    {
        service.rules().insert(rule)?;
    }
    Ok(())
}

fn license_statuses() -> Vec<Status> {
    let mut statuses = Vec::new();
    for n in 1..=5 {
        let mut flags = StatusFlags::default();
        // fees are fixed at the first scrutiny, category may still change at the second
        flags.fee_setting = n == 1;
        flags.category_revisable = n == 2;
        statuses.push(Status::with_flags(
            &format!("level_{n}"),
            &format!("Level {n} Scrutiny"),
            flags,
        ));
        statuses.push(Status::new(
            &format!("level_{n}_objection"),
            &format!("Level {n} Objection Pending"),
        ));
        statuses.push(Status::with_flags(
            &format!("rejected_by_level_{n}"),
            &format!("Rejected at Level {n}"),
            StatusFlags {
                terminal_rejected: true,
                ..StatusFlags::default()
            },
        ));
    }
    statuses.push(Status::with_flags(
        "awaiting_payment",
        "Awaiting Licence Fee Payment",
        StatusFlags {
            payment_awaiting: true,
            ..StatusFlags::default()
        },
    ));
    statuses.push(Status::with_flags(
        "approved",
        "Approved",
        StatusFlags {
            terminal_approved: true,
            ..StatusFlags::default()
        },
    ));
    statuses
}

fn license_rules() -> Vec<TransitionRule> {
    let forward_target = |n: u32| match n {
        1 => "level_2",
        2 => "awaiting_payment",
        3 => "level_4",
        4 => "level_5",
        _ => "approved",
    };

    let mut rules = Vec::new();
    for n in 1..=5u32 {
        let level = format!("level_{n}");
        let clerk = level.clone();
        rules.push(TransitionRule::new(
            &level,
            Action::Approve,
            &clerk,
            forward_target(n),
        ));
        rules.push(TransitionRule::new(
            &level,
            Action::Reject,
            &clerk,
            &format!("rejected_by_level_{n}"),
        ));
        rules.push(TransitionRule::new(
            &level,
            Action::RaiseObjection,
            &clerk,
            &format!("level_{n}_objection"),
        ));
        rules.push(TransitionRule::new(
            &format!("level_{n}_objection"),
            Action::ResolveObjection,
            ROLE_LICENSEE,
            &level,
        ));
    }
    rules.push(TransitionRule::new(
        "awaiting_payment",
        Action::Pay,
        ROLE_LICENSEE,
        "level_3",
    ));
    rules
}

fn requisition_statuses() -> Vec<Status> {
    vec![
        Status::new("RQ_00", "Requisition Submitted"),
        Status::new("RQ_03", "Depot Verified"),
        Status::with_flags(
            "RQ_04",
            "Officer Approved",
            StatusFlags {
                expiry_after_days: Some(30),
                ..StatusFlags::default()
            },
        ),
        Status::new("RQ_05", "Objection Pending Resubmission"),
        Status::new("RQ_07", "Deputy Commissioner Approved"),
        Status::new("RQ_08", "Commissioner Approved"),
        Status::with_flags(
            "RQ_09",
            "Permit Issued",
            StatusFlags {
                terminal_approved: true,
                ..StatusFlags::default()
            },
        ),
        Status::with_flags(
            "RQ_10",
            "Requisition Rejected",
            StatusFlags {
                terminal_rejected: true,
                ..StatusFlags::default()
            },
        ),
        Status::with_flags(
            "RQ_EXPIRED",
            "Requisition Expired",
            StatusFlags {
                terminal_rejected: true,
                ..StatusFlags::default()
            },
        ),
    ]
}

fn requisition_rules() -> Vec<TransitionRule> {
    vec![
        TransitionRule::new("RQ_00", Action::Forward, ROLE_DEPOT_MANAGER, "RQ_03"),
        TransitionRule::new("RQ_03", Action::Approve, ROLE_OFFICER_IN_CHARGE, "RQ_04"),
        TransitionRule::new("RQ_03", Action::Reject, ROLE_OFFICER_IN_CHARGE, "RQ_10"),
        TransitionRule::new(
            "RQ_03",
            Action::RaiseObjection,
            ROLE_OFFICER_IN_CHARGE,
            "RQ_05",
        ),
        TransitionRule::new("RQ_05", Action::ResolveObjection, ROLE_LICENSEE, "RQ_03"),
        TransitionRule::new("RQ_04", Action::Approve, ROLE_DEPUTY_COMMISSIONER, "RQ_07"),
        TransitionRule::new("RQ_04", Action::Reject, ROLE_DEPUTY_COMMISSIONER, "RQ_10"),
        TransitionRule::new("RQ_04", Action::Expire, ROLE_SYSTEM, "RQ_EXPIRED"),
        TransitionRule::new("RQ_07", Action::Approve, ROLE_COMMISSIONER, "RQ_08"),
        TransitionRule::new("RQ_07", Action::Reject, ROLE_COMMISSIONER, "RQ_10"),
        TransitionRule::new("RQ_08", Action::Forward, ROLE_DISTILLERY_OFFICER, "RQ_09"),
    ]
}

fn revalidation_statuses() -> Vec<Status> {
    vec![
        Status::new("RV_00", "Revalidation Requested"),
        Status::new("RV_01", "Officer Verified"),
        Status::with_flags(
            "RV_02",
            "Revalidated",
            StatusFlags {
                terminal_approved: true,
                ..StatusFlags::default()
            },
        ),
        Status::with_flags(
            "RV_03",
            "Revalidation Rejected",
            StatusFlags {
                terminal_rejected: true,
                ..StatusFlags::default()
            },
        ),
    ]
}

fn revalidation_rules() -> Vec<TransitionRule> {
    vec![
        TransitionRule::new("RV_00", Action::Approve, ROLE_OFFICER_IN_CHARGE, "RV_01"),
        TransitionRule::new("RV_00", Action::Reject, ROLE_OFFICER_IN_CHARGE, "RV_03"),
        TransitionRule::new("RV_01", Action::Approve, ROLE_COMMISSIONER, "RV_02"),
    ]
}

fn cancellation_statuses() -> Vec<Status> {
    vec![
        Status::new("CN_00", "Cancellation Requested"),
        Status::with_flags(
            "CN_01",
            "Permit Cancelled",
            StatusFlags {
                terminal_approved: true,
                ..StatusFlags::default()
            },
        ),
        Status::with_flags(
            "CN_02",
            "Cancellation Refused",
            StatusFlags {
                terminal_rejected: true,
                ..StatusFlags::default()
            },
        ),
    ]
}

fn cancellation_rules() -> Vec<TransitionRule> {
    vec![
        TransitionRule::new("CN_00", Action::Approve, ROLE_OFFICER_IN_CHARGE, "CN_01"),
        TransitionRule::new("CN_00", Action::Reject, ROLE_OFFICER_IN_CHARGE, "CN_02"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn every_non_terminal_status_has_an_outgoing_rule() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let service = WorkflowService::new(Arc::new(db));
        install(&service).unwrap();

        for status in license_statuses()
            .into_iter()
            .chain(requisition_statuses())
            .chain(revalidation_statuses())
            .chain(cancellation_statuses())
        {
            if status.is_terminal() {
                continue;
            }
            let outgoing = service.rules().rules_from(&status.code).unwrap();
            assert!(
                !outgoing.is_empty(),
                "status '{}' has no outgoing rule",
                status.code
            );
        }
    }

    #[test]
    fn objection_statuses_resolve_back_to_their_stage() {
        for n in 1..=5 {
            let objection = format!("level_{n}_objection");
            let back = license_rules()
                .into_iter()
                .find(|r| r.current_status == objection && r.action == Action::ResolveObjection)
                .unwrap();
            assert_eq!(back.next_status, format!("level_{n}"));
        }
    }
}
