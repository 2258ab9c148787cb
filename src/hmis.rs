//! Hospital service layer.
//!
//! `Hospital` is what the HTTP handlers talk to. It validates input, assigns
//! human readable identifiers, shapes store results into view models and
//! owns the debounced billing status writer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::core::billing::{self, BillingStatusSync, StatusOption, SyncOutcome};
use crate::core::data::{filter_rows, group_by_surgery_category, transform_patients_data};
use crate::core::forms::{DischargeSummary, FormKind, GatePassForm, PviForm};
use crate::core::import::{self, ImportOptions, ImportReport};
use crate::db::HospitalStore;
use crate::error::{AppError, AppResult};
use crate::models::master::stamp_new;
use crate::models::{
    Bill, BillDraft, BillingSelection, GatePass, GatePassRequest, LinkKind, MasterKind, NewPatient, NewVisit,
    Patient, SanctionStatus, Visit, VisitGraph, VisitLink, VisitRow, VisitUpdate,
};

/// Patient plus the full visit graph, as returned by `GET /api/visits/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct VisitDetail {
    pub patient: Patient,
    #[serde(flatten)]
    pub graph: VisitGraph,
}

/// Body of `PUT /api/visits/{id}/billing-status`: either dropdown, or both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingStatusRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sub_status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingStatusAccepted {
    pub visit_id: Uuid,
    pub selection: BillingSelection,
    pub outcome: SyncOutcome,
}

fn uhid_prefix(date: NaiveDate) -> String {
    format!("UHID{}", date.format("%y%m%d"))
}

fn visit_prefix(date: NaiveDate) -> String {
    format!("IH{}", date.format("%y%m%d"))
}

fn gate_pass_prefix(date: NaiveDate) -> String {
    format!("GP-{}-", date.format("%Y%m%d"))
}

/// Number after the highest one issued under a prefix. Deleted records leave
/// gaps rather than freeing their number.
fn next_number(last: i64) -> i64 {
    last.max(0) + 1
}

pub struct Hospital {
    store: Arc<dyn HospitalStore>,
    billing: BillingStatusSync,
}

impl Hospital {
    pub fn new(store: Arc<dyn HospitalStore>, billing_debounce: Duration) -> Self {
        let billing = BillingStatusSync::new(store.clone(), billing_debounce);
        Self { store, billing }
    }

    // ===== Patient Management =====

    #[instrument(skip(self, form), fields(name = %form.name))]
    pub async fn register_patient(&self, form: NewPatient) -> AppResult<Patient> {
        let form = form.normalized();
        form.validate()?;

        let prefix = uhid_prefix(Utc::now().date_naive());
        let last = self.store.max_patient_number(&prefix).await?;
        let patient = form.into_patient(format!("{}{:04}", prefix, next_number(last)));
        self.store.insert_patient(&patient).await?;

        info!("Patient registered: {}", patient.patients_id);
        Ok(patient)
    }

    #[instrument(skip(self, form), fields(patient_id = %id))]
    pub async fn update_patient(&self, id: Uuid, form: NewPatient) -> AppResult<Patient> {
        let form = form.normalized();
        form.validate()?;

        let existing = self.patient(id).await?;
        let patient = Patient {
            id: existing.id,
            patients_id: existing.patients_id,
            created_at: existing.created_at,
            ..form.into_patient(String::new())
        };
        if !self.store.update_patient(&patient).await? {
            return Err(AppError::not_found("patient", id));
        }
        Ok(patient)
    }

    pub async fn patient(&self, id: Uuid) -> AppResult<Patient> {
        self.store
            .get_patient(id)
            .await?
            .ok_or_else(|| AppError::not_found("patient", id))
    }

    #[instrument(skip(self))]
    pub async fn search_patients(&self, search: Option<String>) -> AppResult<Vec<Patient>> {
        self.store.search_patients(search).await
    }

    #[instrument(skip(self), fields(patient_id = %id))]
    pub async fn delete_patient(&self, id: Uuid) -> AppResult<()> {
        let visits = self.store.visit_ids_for_patient(id).await?;
        if !self.store.delete_patient(id).await? {
            return Err(AppError::not_found("patient", id));
        }
        // Their visits went with them.
        for visit_id in visits {
            self.billing.forget(visit_id);
        }
        info!("Patient deleted: {}", id);
        Ok(())
    }

    // ===== Visits =====

    #[instrument(skip(self, form), fields(patient_id = %form.patient_id))]
    pub async fn create_visit(&self, form: NewVisit) -> AppResult<Visit> {
        form.validate()?;
        self.patient(form.patient_id).await?;

        let prefix = visit_prefix(form.visit_date);
        let last = self.store.max_visit_number(&prefix).await?;
        let visit = form.into_visit(format!("{}{:02}", prefix, next_number(last)));
        self.store.insert_visit(&visit).await?;

        info!("Visit created: {}", visit.visit_id);
        Ok(visit)
    }

    #[instrument(skip(self, update), fields(visit_id = %id))]
    pub async fn update_visit(&self, id: Uuid, update: VisitUpdate) -> AppResult<Visit> {
        update.validate()?;
        let mut visit = self.visit(id).await?;
        update.apply(&mut visit)?;
        if !self.store.update_visit(&visit).await? {
            return Err(AppError::not_found("visit", id));
        }
        Ok(visit)
    }

    async fn visit(&self, id: Uuid) -> AppResult<Visit> {
        self.store
            .get_visit(id)
            .await?
            .ok_or_else(|| AppError::not_found("visit", id))
    }

    #[instrument(skip(self), fields(visit_id = %id))]
    pub async fn visit_detail(&self, id: Uuid) -> AppResult<VisitDetail> {
        let (patient, graph) = self
            .store
            .visit_graph(id)
            .await?
            .ok_or_else(|| AppError::not_found("visit", id))?;
        Ok(VisitDetail { patient, graph })
    }

    #[instrument(skip(self), fields(visit_id = %id))]
    pub async fn delete_visit(&self, id: Uuid) -> AppResult<()> {
        if !self.store.delete_visit(id).await? {
            return Err(AppError::not_found("visit", id));
        }
        self.billing.forget(id);
        info!("Visit deleted: {}", id);
        Ok(())
    }

    /// Flat per-visit rows, newest first.
    #[instrument(skip(self))]
    pub async fn visit_rows(&self, search: Option<String>) -> AppResult<Vec<VisitRow>> {
        let graphs = self.store.patient_graphs(search.clone()).await?;
        let rows = transform_patients_data(&graphs);
        Ok(match search {
            Some(search) => filter_rows(rows, &search),
            None => rows,
        })
    }

    #[instrument(skip(self))]
    pub async fn grouped_visit_rows(&self, search: Option<String>) -> AppResult<BTreeMap<String, Vec<VisitRow>>> {
        Ok(group_by_surgery_category(self.visit_rows(search).await?))
    }

    // ===== Visit links =====

    #[instrument(skip(self, link), fields(visit_id = %visit_id, kind = ?link.kind()))]
    pub async fn link(&self, visit_id: Uuid, link: VisitLink) -> AppResult<VisitDetail> {
        if let VisitLink::Medication { days: Some(days), .. } = &link {
            if *days <= 0 {
                return Err(AppError::Validation("days must be positive".into()));
            }
        }
        self.store.link_visit(visit_id, &link).await?;
        self.visit_detail(visit_id).await
    }

    #[instrument(skip(self), fields(visit_id = %visit_id))]
    pub async fn unlink(&self, visit_id: Uuid, kind: LinkKind, master_id: Uuid) -> AppResult<()> {
        if !self.store.unlink_visit(visit_id, kind, master_id).await? {
            return Err(AppError::NotFound(format!(
                "{:?} {} is not linked to visit {}",
                kind, master_id, visit_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(visit_id = %visit_id, surgery_id = %surgery_id))]
    pub async fn set_sanction_status(
        &self,
        visit_id: Uuid,
        surgery_id: Uuid,
        status: SanctionStatus,
    ) -> AppResult<()> {
        if !self.store.set_sanction_status(visit_id, surgery_id, status).await? {
            return Err(AppError::NotFound(format!(
                "surgery {} is not linked to visit {}",
                surgery_id, visit_id
            )));
        }
        info!("Sanction status of surgery {} set to {}", surgery_id, status);
        Ok(())
    }

    // ===== Master Data =====

    #[instrument(skip(self))]
    pub async fn list_masters(&self, kind: MasterKind, search: Option<String>) -> AppResult<Vec<Value>> {
        self.store.list_masters(kind, search).await
    }

    pub async fn master(&self, kind: MasterKind, id: Uuid) -> AppResult<Value> {
        self.store
            .get_master(kind, id)
            .await?
            .ok_or_else(|| AppError::not_found(kind.slug(), id))
    }

    #[instrument(skip(self, doc))]
    pub async fn create_master(&self, kind: MasterKind, doc: Value) -> AppResult<Value> {
        let doc = stamp_new(kind.normalize(doc)?);
        self.store.insert_master(kind, &doc).await?;
        Ok(doc)
    }

    #[instrument(skip(self, doc))]
    pub async fn update_master(&self, kind: MasterKind, id: Uuid, doc: Value) -> AppResult<Value> {
        let doc = kind.normalize(doc)?;
        if !self.store.update_master(kind, id, &doc).await? {
            return Err(AppError::not_found(kind.slug(), id));
        }
        self.master(kind, id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_master(&self, kind: MasterKind, id: Uuid) -> AppResult<()> {
        if !self.store.delete_master(kind, id).await? {
            return Err(AppError::not_found(kind.slug(), id));
        }
        Ok(())
    }

    // ===== Imports =====

    #[instrument(skip(self, data, options), fields(bytes = data.len()))]
    pub async fn import_masters(&self, kind: MasterKind, data: &str, options: &ImportOptions) -> AppResult<ImportReport> {
        let parsed = import::parse_masters(kind, data, options)?;
        let docs: Vec<Value> = parsed.records.iter().cloned().map(stamp_new).collect();
        let imported = if docs.is_empty() {
            0
        } else {
            self.store.insert_masters(kind, &docs).await?
        };
        if !parsed.skipped.is_empty() {
            warn!(skipped = parsed.skipped.len(), "some rows were not imported");
        }
        info!("Imported {} {} rows", imported, kind);
        Ok(parsed.report(imported))
    }

    #[instrument(skip(self, data, options), fields(bytes = data.len()))]
    pub async fn import_patients(&self, data: &str, options: &ImportOptions) -> AppResult<ImportReport> {
        let parsed = import::parse_patients(data, options)?;

        let prefix = uhid_prefix(Utc::now().date_naive());
        let first = next_number(self.store.max_patient_number(&prefix).await?);
        let patients: Vec<Patient> = parsed
            .records
            .iter()
            .cloned()
            .enumerate()
            .map(|(offset, form)| form.into_patient(format!("{}{:04}", prefix, first + offset as i64)))
            .collect();

        let imported = if patients.is_empty() {
            0
        } else {
            self.store.insert_patients(&patients).await?
        };
        if !parsed.skipped.is_empty() {
            warn!(skipped = parsed.skipped.len(), "some rows were not imported");
        }
        info!("Imported {} patients", imported);
        Ok(parsed.report(imported))
    }

    // ===== Billing =====

    pub fn billing_statuses(&self) -> Vec<StatusOption> {
        billing::status_options()
    }

    /// Apply a dropdown change and queue the debounced write.
    #[instrument(skip(self, request), fields(visit_id = %visit_id))]
    pub async fn select_billing_status(
        &self,
        visit_id: Uuid,
        request: BillingStatusRequest,
    ) -> AppResult<BillingStatusAccepted> {
        let visit = self.visit(visit_id).await?;
        let stored = BillingSelection::new(visit.billing_status.as_deref(), visit.billing_sub_status.as_deref());
        self.billing.seed(visit_id, stored.clone());

        let mut selection = self.billing.current(visit_id).unwrap_or(stored);
        if let Some(status) = request.status.as_deref() {
            selection.select_status(Some(status))?;
        }
        if let Some(sub_status) = request.sub_status.as_deref() {
            selection.select_sub_status(Some(sub_status))?;
        }

        let outcome = self.billing.submit(visit_id, selection.clone());
        Ok(BillingStatusAccepted {
            visit_id,
            selection,
            outcome,
        })
    }

    #[instrument(skip(self, draft), fields(visit_id = %visit_id))]
    pub async fn save_bill(&self, visit_id: Uuid, draft: BillDraft) -> AppResult<Bill> {
        let draft = draft.normalized();
        draft.validate()?;
        let visit = self.visit(visit_id).await?;
        let existing = self.store.bill_for_visit(visit_id).await?;
        let bill = billing::build_bill(&visit, existing.as_ref(), draft);
        self.store.save_bill(&bill).await?;

        info!("Bill saved: {} total {:.2}", bill.bill_no, bill.total_amount);
        Ok(bill)
    }

    pub async fn bill(&self, visit_id: Uuid) -> AppResult<Bill> {
        self.store
            .bill_for_visit(visit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no bill saved for visit {}", visit_id)))
    }

    // ===== Gate Passes =====

    #[instrument(skip(self, request), fields(visit_id = %visit_id, issued_by = %issued_by))]
    pub async fn issue_gate_pass(
        &self,
        visit_id: Uuid,
        request: GatePassRequest,
        issued_by: &str,
    ) -> AppResult<GatePass> {
        request.validate()?;
        // Settle any pending billing selection so the pass sees it.
        self.billing.flush(visit_id).await?;
        let visit = self.visit(visit_id).await?;

        if visit.discharge_date.is_none() {
            return Err(AppError::Validation(
                "a gate pass needs the visit's discharge date".into(),
            ));
        }
        if self.store.gate_pass_for_visit(visit_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "a gate pass was already issued for visit {}",
                visit.visit_id
            )));
        }

        let issued_at = Utc::now();
        let prefix = gate_pass_prefix(issued_at.date_naive());
        let last = self.store.max_gate_pass_number(&prefix).await?;
        let pass = GatePass {
            id: Uuid::new_v4(),
            visit_id,
            gate_pass_no: format!("{}{:03}", prefix, next_number(last)),
            issued_at,
            issued_by: issued_by.to_string(),
            bill_cleared: visit.billing_status.as_deref() == Some(billing::PAID_STATUS),
            attendant_name: request.attendant_name,
            vehicle_no: request.vehicle_no,
            remarks: request.remarks,
        };
        self.store.insert_gate_pass(&pass).await?;

        info!("Gate pass issued: {}", pass.gate_pass_no);
        Ok(pass)
    }

    pub async fn gate_pass(&self, visit_id: Uuid) -> AppResult<GatePass> {
        self.store
            .gate_pass_for_visit(visit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no gate pass issued for visit {}", visit_id)))
    }

    // ===== Printable forms =====

    #[instrument(skip(self), fields(visit_id = %visit_id))]
    pub async fn print(&self, visit_id: Uuid, form: FormKind) -> AppResult<String> {
        let VisitDetail { patient, graph } = self.visit_detail(visit_id).await?;
        Ok(match form {
            FormKind::DischargeSummary => DischargeSummary::build(&patient, &graph).render_html(),
            FormKind::Pvi => PviForm::build(&patient, &graph).render_html(),
            FormKind::GatePass => {
                let pass = self.gate_pass(visit_id).await?;
                GatePassForm::build(&patient, &graph, &pass).render_html()
            }
        })
    }

    /// Write out pending billing selections; called on shutdown.
    pub async fn shutdown(&self) -> AppResult<()> {
        let written = self.billing.flush_all().await?;
        info!("Flushed {} pending billing selections", written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Gender, VisitType};
    use serde_json::json;

    fn hospital() -> Hospital {
        Hospital::new(Arc::new(MemoryStore::new()), Duration::from_millis(2000))
    }

    fn ravi() -> NewPatient {
        NewPatient {
            name: "Ravi Kumar".into(),
            age: Some(42),
            gender: Some(Gender::Male),
            phone: Some("9876543210".into()),
            ..Default::default()
        }
    }

    fn ipd(patient_id: Uuid, day: u32) -> NewVisit {
        NewVisit {
            patient_id,
            visit_type: VisitType::Ipd,
            visit_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            admission_date: NaiveDate::from_ymd_opt(2024, 6, day),
            surgery_date: None,
            reason_for_visit: None,
            appointment_with: None,
            referee_id: None,
            hope_surgeon_id: None,
            hope_consultant_id: None,
            esic_surgeon_id: None,
        }
    }

    #[tokio::test]
    async fn identifiers_are_sequential_per_day() {
        let hospital = hospital();
        let first = hospital.register_patient(ravi()).await.unwrap();
        let second = hospital.register_patient(ravi()).await.unwrap();
        let prefix = uhid_prefix(Utc::now().date_naive());
        assert_eq!(first.patients_id, format!("{}0001", prefix));
        assert_eq!(second.patients_id, format!("{}0002", prefix));

        let v1 = hospital.create_visit(ipd(first.id, 15)).await.unwrap();
        let v2 = hospital.create_visit(ipd(second.id, 15)).await.unwrap();
        assert_eq!(v1.visit_id, "IH24061501");
        assert_eq!(v2.visit_id, "IH24061502");
    }

    #[tokio::test]
    async fn numbers_freed_by_deletes_are_not_reissued() {
        let hospital = hospital();
        let first = hospital.register_patient(ravi()).await.unwrap();
        let second = hospital.register_patient(ravi()).await.unwrap();
        hospital.delete_patient(first.id).await.unwrap();
        let third = hospital.register_patient(ravi()).await.unwrap();
        assert_eq!(third.patients_id, format!("{}0003", uhid_prefix(Utc::now().date_naive())));

        let v1 = hospital.create_visit(ipd(second.id, 15)).await.unwrap();
        hospital.create_visit(ipd(second.id, 15)).await.unwrap();
        hospital.delete_visit(v1.id).await.unwrap();
        let v3 = hospital.create_visit(ipd(second.id, 15)).await.unwrap();
        assert_eq!(v3.visit_id, "IH24061503");
    }

    #[tokio::test]
    async fn gate_pass_number_survives_a_deleted_visit() {
        let hospital = hospital();
        let patient = hospital.register_patient(ravi()).await.unwrap();
        let mut passes = Vec::new();
        let mut visits = Vec::new();
        for _ in 0..3 {
            let visit = hospital.create_visit(ipd(patient.id, 15)).await.unwrap();
            hospital
                .update_visit(
                    visit.id,
                    VisitUpdate {
                        discharge_date: NaiveDate::from_ymd_opt(2024, 6, 18),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            visits.push(visit);
        }
        for visit in &visits[..2] {
            passes.push(
                hospital
                    .issue_gate_pass(visit.id, GatePassRequest::default(), "billing")
                    .await
                    .unwrap(),
            );
        }
        hospital.delete_visit(visits[0].id).await.unwrap();

        let third = hospital
            .issue_gate_pass(visits[2].id, GatePassRequest::default(), "billing")
            .await
            .unwrap();
        assert!(passes[1].gate_pass_no.ends_with("-002"));
        assert!(third.gate_pass_no.ends_with("-003"));
    }

    #[tokio::test]
    async fn deleting_patient_drops_pending_billing_for_its_visits() {
        let hospital = hospital();
        let patient = hospital.register_patient(ravi()).await.unwrap();
        let visit = hospital.create_visit(ipd(patient.id, 15)).await.unwrap();
        hospital
            .select_billing_status(
                visit.id,
                BillingStatusRequest {
                    status: Some("Pending".into()),
                    sub_status: None,
                },
            )
            .await
            .unwrap();
        assert!(hospital.billing.has_pending(visit.id));

        hospital.delete_patient(patient.id).await.unwrap();
        assert!(!hospital.billing.has_pending(visit.id));
        assert!(hospital.billing.current(visit.id).is_none());
        hospital.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn visit_for_unknown_patient_is_not_found() {
        let err = hospital().create_visit(ipd(Uuid::new_v4(), 15)).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn gate_pass_requires_discharge_and_is_issued_once() {
        let hospital = hospital();
        let patient = hospital.register_patient(ravi()).await.unwrap();
        let visit = hospital.create_visit(ipd(patient.id, 15)).await.unwrap();

        let err = hospital
            .issue_gate_pass(visit.id, GatePassRequest::default(), "billing")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        hospital
            .update_visit(
                visit.id,
                VisitUpdate {
                    discharge_date: NaiveDate::from_ymd_opt(2024, 6, 18),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let pass = hospital
            .issue_gate_pass(visit.id, GatePassRequest::default(), "billing")
            .await
            .unwrap();
        assert!(pass.gate_pass_no.ends_with("-001"));
        assert!(!pass.bill_cleared);

        let again = hospital
            .issue_gate_pass(visit.id, GatePassRequest::default(), "billing")
            .await
            .unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn gate_pass_sees_pending_paid_status() {
        let hospital = hospital();
        let patient = hospital.register_patient(ravi()).await.unwrap();
        let visit = hospital.create_visit(ipd(patient.id, 15)).await.unwrap();
        hospital
            .update_visit(
                visit.id,
                VisitUpdate {
                    discharge_date: NaiveDate::from_ymd_opt(2024, 6, 18),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let accepted = hospital
            .select_billing_status(
                visit.id,
                BillingStatusRequest {
                    status: Some("Paid".into()),
                    sub_status: Some("Payment Received".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(accepted.outcome, SyncOutcome::Scheduled);

        let pass = hospital
            .issue_gate_pass(visit.id, GatePassRequest::default(), "billing")
            .await
            .unwrap();
        assert!(pass.bill_cleared);
    }

    #[tokio::test]
    async fn master_documents_are_normalised_and_searchable() {
        let hospital = hospital();
        let created = hospital
            .create_master(MasterKind::Surgery, json!({"name": "TKR", "category": "Orthopaedics", "x": 1}))
            .await
            .unwrap();
        assert!(created.get("x").is_none());

        let id = crate::models::master::document_id(&created).unwrap();
        let updated = hospital
            .update_master(MasterKind::Surgery, id, json!({"name": "Total Knee Replacement", "nabh_rate": 150000.0}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Total Knee Replacement");
        assert_eq!(updated["nabh_rate"], 150000.0);

        let found = hospital
            .list_masters(MasterKind::Surgery, Some("knee".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn patient_import_assigns_uhids() {
        let hospital = hospital();
        let report = hospital
            .import_patients("name\tphone\nAsha\t9876500001\nKiran\t9876500002\n", &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 2);

        let patients = hospital.search_patients(None).await.unwrap();
        let mut ids: Vec<String> = patients.into_iter().map(|p| p.patients_id).collect();
        ids.sort();
        assert!(ids[0].ends_with("0001"));
        assert!(ids[1].ends_with("0002"));
    }
}
