//! Data-driven approval workflow engine for excise licensing documents.
//!
//! The engine drives every long-lived document (license applications,
//! salesman registrations, ENA requisitions and friends) through multi-stage
//! approval, objection, rejection, payment and expiration transitions. The
//! entire policy lives in the transition rule table; the executor in
//! [`service`] only interprets it.

pub mod audit;
pub mod document;
pub mod error;
pub mod expirer;
pub mod ids;
pub mod objection;
pub mod rules;
pub mod seed;
pub mod service;
pub mod status;
pub mod user;
pub mod utils;

pub use error::WorkflowError;
pub use rules::{Action, TransitionRule};
pub use service::{ActionPayload, Bucket, ObjectionItem, WorkflowService};
