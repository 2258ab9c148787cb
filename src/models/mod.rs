//! Data-transfer types, one narrow type per table or query shape.

pub mod billing;
pub mod gate_pass;
pub mod master;
pub mod patient;
pub mod visit;

pub use billing::{Bill, BillDraft, BillLineItem, BillSection, BillingSelection, LineItemDraft, SectionDraft};
pub use gate_pass::{GatePass, GatePassRequest};
pub use master::MasterKind;
pub use patient::{Gender, NewPatient, Patient};
pub use visit::{
    LinkKind, NewVisit, PatientGraph, SanctionStatus, Visit, VisitGraph, VisitLink, VisitRow, VisitStatus,
    VisitType, VisitUpdate,
};
