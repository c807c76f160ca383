//! Workflowed documents: the polymorphic contract plus concrete payloads.
//!
//! Every long-lived record the engine drives is a [`Document`]: a kind tag,
//! a current status code, the applicant, a kind-specific [`Payload`] and the
//! bookkeeping latches (fee calculated, fee paid, print count). The document
//! knows nothing about which transitions are permissible — that is the rule
//! table's sole responsibility.

use chrono::Utc;
use sled::Db;

use crate::error::WorkflowError;
use crate::status::Status;
use crate::user::User;
use crate::utils::TimeStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum DocumentKind {
    #[n(0)]
    NewLicense,
    #[n(1)]
    LicenseRenewal,
    #[n(2)]
    SalesmanBarman,
    #[n(3)]
    CompanyRegistration,
    #[n(4)]
    EnaRequisition,
    #[n(5)]
    EnaRevalidation,
    #[n(6)]
    EnaCancellation,
}

impl DocumentKind {
    /// Per-class id prefix, also the key prefix for kind-scoped listings.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::NewLicense => "NA",
            Self::LicenseRenewal => "LA",
            Self::SalesmanBarman => "SBM",
            Self::CompanyRegistration => "COMP",
            Self::EnaRequisition => "IBPS",
            Self::EnaRevalidation => "RVL",
            Self::EnaCancellation => "CNL",
        }
    }

    /// The one status assigned at creation.
    pub fn initial_status(&self) -> &'static str {
        match self {
            Self::NewLicense
            | Self::LicenseRenewal
            | Self::SalesmanBarman
            | Self::CompanyRegistration => "level_1",
            Self::EnaRequisition => "RQ_00",
            Self::EnaRevalidation => "RV_00",
            Self::EnaCancellation => "CN_00",
        }
    }
}

/// Kind-specific payload. Field names here are the vocabulary objections
/// refer to and `RESOLVE_OBJECTION` merges into.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Payload {
    #[n(0)]
    License {
        #[n(0)]
        applicant_name: String,
        #[n(1)]
        pan: String,
        #[n(2)]
        phone: String,
        #[n(3)]
        address: String,
        #[n(4)]
        pin: String,
        #[n(5)]
        district_code: String,
        #[n(6)]
        license_category: String,
    },
    #[n(1)]
    SalesmanBarman {
        #[n(0)]
        applicant_name: String,
        #[n(1)]
        pan: String,
        #[n(2)]
        phone: String,
        #[n(3)]
        address: String,
        #[n(4)]
        pin: String,
        #[n(5)]
        district_code: String,
        #[n(6)]
        employer_license_no: String,
    },
    #[n(2)]
    Company {
        #[n(0)]
        company_name: String,
        #[n(1)]
        pan: String,
        #[n(2)]
        phone: String,
        #[n(3)]
        address: String,
        #[n(4)]
        pin: String,
        #[n(5)]
        district_code: String,
        #[n(6)]
        cin: String,
    },
    #[n(3)]
    Requisition {
        #[n(0)]
        applicant_name: String,
        #[n(1)]
        license_no: String,
        #[n(2)]
        phone: String,
        #[n(3)]
        quantity_litres: u64,
        #[n(4)]
        strength: String,
    },
    #[n(4)]
    Revalidation {
        #[n(0)]
        permit_no: String,
        #[n(1)]
        quantity_litres: u64,
        #[n(2)]
        reason: String,
    },
    #[n(5)]
    Cancellation {
        #[n(0)]
        permit_no: String,
        #[n(1)]
        reason: String,
    },
}

fn valid_pan(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[..5].iter().all(|c| c.is_ascii_uppercase())
        && b[5..9].iter().all(|c| c.is_ascii_digit())
        && b[9].is_ascii_uppercase()
}

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|c| c.is_ascii_digit())
}

impl Payload {
    /// Boundary validation; fires before the executor ever runs.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let check = |pan: &str, phone: &str, pin: &str| -> Result<(), WorkflowError> {
            if !valid_pan(pan) {
                return Err(WorkflowError::Validation(format!("bad PAN '{pan}'")));
            }
            if !all_digits(phone, 10) {
                return Err(WorkflowError::Validation(format!("bad phone '{phone}'")));
            }
            if !all_digits(pin, 6) {
                return Err(WorkflowError::Validation(format!("bad PIN '{pin}'")));
            }
            Ok(())
        };

        match self {
            Self::License { pan, phone, pin, .. }
            | Self::SalesmanBarman { pan, phone, pin, .. }
            | Self::Company { pan, phone, pin, .. } => check(pan, phone, pin),
            Self::Requisition {
                phone,
                quantity_litres,
                ..
            } => {
                if !all_digits(phone, 10) {
                    return Err(WorkflowError::Validation(format!("bad phone '{phone}'")));
                }
                if *quantity_litres == 0 {
                    return Err(WorkflowError::Validation(
                        "requisition quantity is zero".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Revalidation { quantity_litres, .. } => {
                if *quantity_litres == 0 {
                    return Err(WorkflowError::Validation(
                        "revalidation quantity is zero".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Cancellation { reason, .. } => {
                if reason.is_empty() {
                    return Err(WorkflowError::Validation(
                        "cancellation reason is empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// District segment of the document id, where the class carries one.
    pub fn district_code(&self) -> Option<&str> {
        match self {
            Self::License { district_code, .. }
            | Self::SalesmanBarman { district_code, .. }
            | Self::Company { district_code, .. } => Some(district_code),
            _ => None,
        }
    }

    pub fn license_category(&self) -> Option<&str> {
        match self {
            Self::License {
                license_category, ..
            } => Some(license_category),
            _ => None,
        }
    }

    /// Merge one objected field back into the payload. Unknown field names
    /// are a validation error so objections can only target real fields.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), WorkflowError> {
        let slot: &mut String = match self {
            Self::License {
                applicant_name,
                pan,
                phone,
                address,
                pin,
                district_code,
                license_category,
            } => match field {
                "applicant_name" => applicant_name,
                "pan" => pan,
                "phone" => phone,
                "address" => address,
                "pin" => pin,
                "district_code" => district_code,
                "license_category" => license_category,
                _ => return Err(unknown_field(field)),
            },
            Self::SalesmanBarman {
                applicant_name,
                pan,
                phone,
                address,
                pin,
                district_code,
                employer_license_no,
            } => match field {
                "applicant_name" => applicant_name,
                "pan" => pan,
                "phone" => phone,
                "address" => address,
                "pin" => pin,
                "district_code" => district_code,
                "employer_license_no" => employer_license_no,
                _ => return Err(unknown_field(field)),
            },
            Self::Company {
                company_name,
                pan,
                phone,
                address,
                pin,
                district_code,
                cin,
            } => match field {
                "company_name" => company_name,
                "pan" => pan,
                "phone" => phone,
                "address" => address,
                "pin" => pin,
                "district_code" => district_code,
                "cin" => cin,
                _ => return Err(unknown_field(field)),
            },
            Self::Requisition {
                applicant_name,
                license_no,
                phone,
                quantity_litres,
                strength,
            } => match field {
                "applicant_name" => applicant_name,
                "license_no" => license_no,
                "phone" => phone,
                "strength" => strength,
                "quantity_litres" => {
                    *quantity_litres = value.parse().map_err(|_| {
                        WorkflowError::Validation(format!("bad quantity '{value}'"))
                    })?;
                    return Ok(());
                }
                _ => return Err(unknown_field(field)),
            },
            Self::Revalidation {
                permit_no,
                quantity_litres,
                reason,
            } => match field {
                "permit_no" => permit_no,
                "reason" => reason,
                "quantity_litres" => {
                    *quantity_litres = value.parse().map_err(|_| {
                        WorkflowError::Validation(format!("bad quantity '{value}'"))
                    })?;
                    return Ok(());
                }
                _ => return Err(unknown_field(field)),
            },
            Self::Cancellation { permit_no, reason } => match field {
                "permit_no" => permit_no,
                "reason" => reason,
                _ => return Err(unknown_field(field)),
            },
        };
        *slot = value.to_string();
        Ok(())
    }
}

fn unknown_field(field: &str) -> WorkflowError {
    WorkflowError::Validation(format!("unknown payload field '{field}'"))
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Document {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub kind: DocumentKind,
    #[n(2)]
    pub status_code: String,
    #[n(3)]
    pub applicant: User,
    #[n(4)]
    pub payload: Payload,
    #[n(5)]
    pub is_approved: bool,
    #[n(6)]
    pub is_fee_calculated: bool,
    #[n(7)]
    pub yearly_fee: Option<u64>,
    #[n(8)]
    pub is_license_fee_paid: bool,
    #[n(9)]
    pub is_print_fee_paid: bool,
    #[n(10)]
    pub print_count: u32,
    #[n(11)]
    pub payment_ref: Option<String>,
    #[n(12)]
    pub new_category: Option<String>,
    #[n(13)]
    pub created_at: TimeStamp<Utc>,
    #[n(14)]
    pub updated_at: TimeStamp<Utc>,
}

pub(crate) fn doc_key(id: &str) -> Vec<u8> {
    format!("doc/{id}").into_bytes()
}

impl Document {
    pub fn new(id: String, kind: DocumentKind, applicant: User, payload: Payload) -> Self {
        let now = TimeStamp::now();
        Self {
            id,
            kind,
            status_code: kind.initial_status().to_string(),
            applicant,
            payload,
            is_approved: false,
            is_fee_calculated: false,
            yearly_fee: None,
            is_license_fee_paid: false,
            is_print_fee_paid: false,
            print_count: 0,
            payment_ref: None,
            new_category: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn current_status_code(&self) -> &str {
        &self.status_code
    }

    pub fn set_status(&mut self, code: &str, at: TimeStamp<Utc>) {
        self.status_code = code.to_string();
        self.updated_at = at;
    }

    pub fn applicant_user(&self) -> &User {
        &self.applicant
    }

    /// Amount due at a payment-awaiting stage, if a fee was calculated.
    pub fn required_payment_for(&self, status: &Status) -> Option<u64> {
        if status.flags.payment_awaiting {
            self.yearly_fee
        } else {
            None
        }
    }

    pub fn at_initial_status(&self) -> bool {
        self.status_code == self.kind.initial_status()
    }

    pub fn load(db: &Db, id: &str) -> Result<Self, WorkflowError> {
        let bytes = db
            .get(doc_key(id))?
            .ok_or_else(|| WorkflowError::NotFound(format!("document '{id}'")))?;
        Ok(minicbor::decode(&bytes)?)
    }

    pub fn save(&self, db: &Db) -> Result<(), WorkflowError> {
        db.insert(doc_key(&self.id), self.encode()?)?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, WorkflowError> {
        Ok(minicbor::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salesman_payload() -> Payload {
        Payload::SalesmanBarman {
            applicant_name: "R. Sharma".to_string(),
            pan: "ABCDE1234F".to_string(),
            phone: "9876543210".to_string(),
            address: "12 Mall Road".to_string(),
            pin: "171001".to_string(),
            district_code: "117".to_string(),
            employer_license_no: "L-42".to_string(),
        }
    }

    #[test]
    fn pan_phone_pin_are_validated_at_the_boundary() {
        assert!(salesman_payload().validate().is_ok());

        let mut bad = salesman_payload();
        bad.set_field("pan", "abcde1234f").unwrap();
        assert_eq!(bad.validate().unwrap_err().code(), "validation_error");

        let mut bad = salesman_payload();
        bad.set_field("phone", "12345").unwrap();
        assert_eq!(bad.validate().unwrap_err().code(), "validation_error");
    }

    #[test]
    fn set_field_rejects_unknown_names() {
        let mut payload = salesman_payload();
        let err = payload.set_field("no_such_field", "x").unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn initial_status_follows_the_kind() {
        assert_eq!(DocumentKind::SalesmanBarman.initial_status(), "level_1");
        assert_eq!(DocumentKind::EnaRequisition.initial_status(), "RQ_00");
    }
}
