//! In-memory [`HospitalStore`], mirroring the constraints the Postgres schema
//! enforces (unique ids, foreign keys, cascades).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{matches_search, max_suffix, HospitalStore};
use crate::error::{AppError, AppResult};
use crate::models::master::{document_id, document_name};
use crate::models::visit::{VisitDiagnosis, VisitMedication, VisitSurgery};
use crate::models::{
    Bill, BillingSelection, GatePass, LinkKind, MasterKind, Patient, PatientGraph, SanctionStatus, Visit,
    VisitGraph, VisitLink,
};

#[derive(Default)]
struct State {
    patients: HashMap<Uuid, Patient>,
    visits: HashMap<Uuid, Visit>,
    masters: HashMap<MasterKind, HashMap<Uuid, Value>>,
    links: HashMap<Uuid, Vec<VisitLink>>,
    bills: HashMap<Uuid, Bill>,
    gate_passes: HashMap<Uuid, GatePass>,
}

impl State {
    fn master<T: DeserializeOwned>(&self, kind: MasterKind, id: Uuid) -> AppResult<Option<T>> {
        self.masters
            .get(&kind)
            .and_then(|table| table.get(&id))
            .map(|doc| serde_json::from_value(doc.clone()).map_err(|e| AppError::Internal(e.into())))
            .transpose()
    }

    fn require_master<T: DeserializeOwned>(&self, kind: MasterKind, id: Uuid) -> AppResult<T> {
        self.master(kind, id)?
            .ok_or_else(|| AppError::NotFound(format!("visit link refers to a {} that does not exist", kind)))
    }

    fn graph(&self, visit: &Visit) -> AppResult<VisitGraph> {
        let mut graph = VisitGraph::bare(visit.clone());
        for link in self.links.get(&visit.id).into_iter().flatten() {
            match link {
                VisitLink::Diagnosis { id, is_primary } => graph.diagnoses.push(VisitDiagnosis {
                    diagnosis: self.require_master(MasterKind::Diagnosis, *id)?,
                    is_primary: *is_primary,
                }),
                VisitLink::Surgery { id, sanction_status, is_primary } => graph.surgeries.push(VisitSurgery {
                    surgery: self.require_master(MasterKind::Surgery, *id)?,
                    sanction_status: *sanction_status,
                    is_primary: *is_primary,
                }),
                VisitLink::Complication { id } => graph
                    .complications
                    .push(self.require_master(MasterKind::Complication, *id)?),
                VisitLink::Medication { id, dose, frequency, days } => graph.medications.push(VisitMedication {
                    medication: self.require_master(MasterKind::Medication, *id)?,
                    dose: dose.clone(),
                    frequency: frequency.clone(),
                    days: *days,
                }),
                VisitLink::Lab { id } => graph.labs.push(self.require_master(MasterKind::Lab, *id)?),
                VisitLink::Radiology { id } => graph
                    .radiology
                    .push(self.require_master(MasterKind::Radiology, *id)?),
            }
        }

        if let Some(id) = visit.referee_id {
            graph.referee = self.master(MasterKind::Referee, id)?;
        }
        if let Some(id) = visit.hope_surgeon_id {
            graph.hope_surgeon = self.master(MasterKind::HopeSurgeon, id)?;
        }
        if let Some(id) = visit.hope_consultant_id {
            graph.hope_consultant = self.master(MasterKind::HopeConsultant, id)?;
        }
        if let Some(id) = visit.esic_surgeon_id {
            graph.esic_surgeon = self.master(MasterKind::EsicSurgeon, id)?;
        }
        Ok(graph)
    }

    fn check_patient_unique(&self, patient: &Patient) -> AppResult<()> {
        if self.patients.values().any(|p| p.patients_id == patient.patients_id) {
            return Err(AppError::Conflict("patient already exists".into()));
        }
        Ok(())
    }

    fn check_visit_references(&self, visit: &Visit) -> AppResult<()> {
        if !self.patients.contains_key(&visit.patient_id) {
            return Err(AppError::NotFound("visit refers to a record that does not exist".into()));
        }
        let references = [
            (MasterKind::Referee, visit.referee_id),
            (MasterKind::HopeSurgeon, visit.hope_surgeon_id),
            (MasterKind::HopeConsultant, visit.hope_consultant_id),
            (MasterKind::EsicSurgeon, visit.esic_surgeon_id),
        ];
        for (kind, id) in references {
            if let Some(id) = id {
                let exists = self.masters.get(&kind).map_or(false, |t| t.contains_key(&id));
                if !exists {
                    return Err(AppError::NotFound("visit refers to a record that does not exist".into()));
                }
            }
        }
        Ok(())
    }

    fn remove_visit(&mut self, id: Uuid) -> bool {
        self.links.remove(&id);
        self.bills.remove(&id);
        self.gate_passes.remove(&id);
        self.visits.remove(&id).is_some()
    }
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HospitalStore for MemoryStore {
    // ===== Patients =====

    async fn insert_patient(&self, patient: &Patient) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.check_patient_unique(patient)?;
        state.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    async fn insert_patients(&self, patients: &[Patient]) -> AppResult<usize> {
        let mut state = self.state.write().await;
        // Validate everything first so a failure leaves nothing behind.
        let mut seen = std::collections::HashSet::new();
        for patient in patients {
            state.check_patient_unique(patient)?;
            if !seen.insert(patient.patients_id.as_str()) {
                return Err(AppError::Conflict("patient already exists".into()));
            }
        }
        for patient in patients {
            state.patients.insert(patient.id, patient.clone());
        }
        Ok(patients.len())
    }

    async fn update_patient(&self, patient: &Patient) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.patients.get_mut(&patient.id) {
            Some(stored) => {
                // UHID and creation time are immutable.
                let patients_id = stored.patients_id.clone();
                let created_at = stored.created_at;
                *stored = Patient {
                    patients_id,
                    created_at,
                    ..patient.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_patient(&self, id: Uuid) -> AppResult<Option<Patient>> {
        Ok(self.state.read().await.patients.get(&id).cloned())
    }

    async fn delete_patient(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let visit_ids: Vec<Uuid> = state
            .visits
            .values()
            .filter(|v| v.patient_id == id)
            .map(|v| v.id)
            .collect();
        for visit_id in visit_ids {
            state.remove_visit(visit_id);
        }
        Ok(state.patients.remove(&id).is_some())
    }

    async fn search_patients(&self, search: Option<String>) -> AppResult<Vec<Patient>> {
        let state = self.state.read().await;
        let mut patients: Vec<Patient> = state
            .patients
            .values()
            .filter(|p| match &search {
                Some(needle) => matches_search(
                    needle,
                    &[Some(p.name.as_str()), Some(p.patients_id.as_str()), p.phone.as_deref()],
                ),
                None => true,
            })
            .cloned()
            .collect();
        patients.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(patients)
    }

    async fn max_patient_number(&self, prefix: &str) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(max_suffix(prefix, state.patients.values().map(|p| p.patients_id.as_str())))
    }

    // ===== Visits =====

    async fn insert_visit(&self, visit: &Visit) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.visits.values().any(|v| v.visit_id == visit.visit_id) {
            return Err(AppError::Conflict("visit already exists".into()));
        }
        state.check_visit_references(visit)?;
        state.visits.insert(visit.id, visit.clone());
        Ok(())
    }

    async fn update_visit(&self, visit: &Visit) -> AppResult<bool> {
        let mut state = self.state.write().await;
        if !state.visits.contains_key(&visit.id) {
            return Ok(false);
        }
        state.check_visit_references(visit)?;
        if let Some(stored) = state.visits.get_mut(&visit.id) {
            let billing_status = stored.billing_status.take();
            let billing_sub_status = stored.billing_sub_status.take();
            *stored = Visit {
                visit_id: stored.visit_id.clone(),
                patient_id: stored.patient_id,
                created_at: stored.created_at,
                billing_status,
                billing_sub_status,
                ..visit.clone()
            };
        }
        Ok(true)
    }

    async fn get_visit(&self, id: Uuid) -> AppResult<Option<Visit>> {
        Ok(self.state.read().await.visits.get(&id).cloned())
    }

    async fn delete_visit(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.state.write().await.remove_visit(id))
    }

    async fn max_visit_number(&self, prefix: &str) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(max_suffix(prefix, state.visits.values().map(|v| v.visit_id.as_str())))
    }

    async fn visit_ids_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .visits
            .values()
            .filter(|v| v.patient_id == patient_id)
            .map(|v| v.id)
            .collect())
    }

    async fn update_billing_status(&self, visit_id: Uuid, selection: &BillingSelection) -> AppResult<()> {
        let mut state = self.state.write().await;
        let visit = state
            .visits
            .get_mut(&visit_id)
            .ok_or_else(|| AppError::not_found("visit", visit_id))?;
        visit.billing_status = selection.status.clone();
        visit.billing_sub_status = selection.sub_status.clone();
        Ok(())
    }

    // ===== Junction tables =====

    async fn link_visit(&self, visit_id: Uuid, link: &VisitLink) -> AppResult<()> {
        let mut state = self.state.write().await;
        let kind = link.kind();
        let master_exists = state
            .masters
            .get(&kind.master_kind())
            .map_or(false, |t| t.contains_key(&link.master_id()));
        if !state.visits.contains_key(&visit_id) || !master_exists {
            return Err(AppError::NotFound(
                "visit link refers to a record that does not exist".into(),
            ));
        }

        let links = state.links.entry(visit_id).or_default();
        let primary = matches!(
            link,
            VisitLink::Diagnosis { is_primary: true, .. } | VisitLink::Surgery { is_primary: true, .. }
        );
        if primary {
            for existing in links.iter_mut() {
                match existing {
                    VisitLink::Diagnosis { is_primary, .. } if kind == LinkKind::Diagnosis => *is_primary = false,
                    VisitLink::Surgery { is_primary, .. } if kind == LinkKind::Surgery => *is_primary = false,
                    _ => {}
                }
            }
        }
        match links
            .iter_mut()
            .find(|l| l.kind() == kind && l.master_id() == link.master_id())
        {
            Some(existing) => *existing = link.clone(),
            None => links.push(link.clone()),
        }
        Ok(())
    }

    async fn unlink_visit(&self, visit_id: Uuid, kind: LinkKind, master_id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let links = match state.links.get_mut(&visit_id) {
            Some(links) => links,
            None => return Ok(false),
        };
        let before = links.len();
        links.retain(|l| !(l.kind() == kind && l.master_id() == master_id));
        Ok(links.len() != before)
    }

    async fn set_sanction_status(&self, visit_id: Uuid, surgery_id: Uuid, status: SanctionStatus) -> AppResult<bool> {
        let mut state = self.state.write().await;
        for link in state.links.get_mut(&visit_id).into_iter().flatten() {
            if let VisitLink::Surgery { id, sanction_status, .. } = link {
                if *id == surgery_id {
                    *sanction_status = status;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ===== Nested reads =====

    async fn patient_graphs(&self, search: Option<String>) -> AppResult<Vec<PatientGraph>> {
        let state = self.state.read().await;
        let mut patients: Vec<&Patient> = state.patients.values().collect();
        patients.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut graphs = Vec::new();
        for patient in patients {
            let mut visits: Vec<&Visit> = state.visits.values().filter(|v| v.patient_id == patient.id).collect();
            let matched = match &search {
                Some(needle) => {
                    matches_search(
                        needle,
                        &[Some(patient.name.as_str()), Some(patient.patients_id.as_str()), patient.phone.as_deref()],
                    ) || visits.iter().any(|v| matches_search(needle, &[Some(v.visit_id.as_str())]))
                }
                None => true,
            };
            if !matched {
                continue;
            }
            visits.sort_by(|a, b| b.visit_date.cmp(&a.visit_date).then_with(|| a.visit_id.cmp(&b.visit_id)));
            let visits = visits
                .into_iter()
                .map(|v| state.graph(v))
                .collect::<AppResult<Vec<_>>>()?;
            graphs.push(PatientGraph {
                patient: patient.clone(),
                visits,
            });
        }
        Ok(graphs)
    }

    async fn visit_graph(&self, visit_id: Uuid) -> AppResult<Option<(Patient, VisitGraph)>> {
        let state = self.state.read().await;
        let visit = match state.visits.get(&visit_id) {
            Some(visit) => visit,
            None => return Ok(None),
        };
        let patient = state
            .patients
            .get(&visit.patient_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("patient", visit.patient_id))?;
        Ok(Some((patient, state.graph(visit)?)))
    }

    // ===== Master data =====

    async fn list_masters(&self, kind: MasterKind, search: Option<String>) -> AppResult<Vec<Value>> {
        let state = self.state.read().await;
        let mut docs: Vec<Value> = state
            .masters
            .get(&kind)
            .into_iter()
            .flat_map(|table| table.values())
            .filter(|doc| match &search {
                Some(needle) => matches_search(needle, &[Some(document_name(doc))]),
                None => true,
            })
            .cloned()
            .collect();
        docs.sort_by(|a, b| document_name(a).cmp(document_name(b)));
        Ok(docs)
    }

    async fn get_master(&self, kind: MasterKind, id: Uuid) -> AppResult<Option<Value>> {
        let state = self.state.read().await;
        Ok(state.masters.get(&kind).and_then(|t| t.get(&id)).cloned())
    }

    async fn insert_master(&self, kind: MasterKind, doc: &Value) -> AppResult<()> {
        self.insert_masters(kind, std::slice::from_ref(doc)).await.map(|_| ())
    }

    async fn insert_masters(&self, kind: MasterKind, docs: &[Value]) -> AppResult<usize> {
        let mut state = self.state.write().await;
        let mut staged = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = document_id(doc)
                .ok_or_else(|| AppError::Validation(format!("{} document is missing an id", kind)))?;
            staged.push((id, doc.clone()));
        }
        let table = state.masters.entry(kind).or_default();
        if staged.iter().any(|(id, _)| table.contains_key(id)) {
            return Err(AppError::Conflict(format!("{} already exists", kind.slug())));
        }
        table.extend(staged);
        Ok(docs.len())
    }

    async fn update_master(&self, kind: MasterKind, id: Uuid, doc: &Value) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let stored = match state.masters.get_mut(&kind).and_then(|t| t.get_mut(&id)) {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if let (Value::Object(target), Value::Object(source)) = (stored, doc) {
            for column in kind.columns() {
                target.insert((*column).to_string(), source.get(*column).cloned().unwrap_or(Value::Null));
            }
        }
        Ok(true)
    }

    async fn delete_master(&self, kind: MasterKind, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let removed = state
            .masters
            .get_mut(&kind)
            .and_then(|t| t.remove(&id))
            .is_some();
        if !removed {
            return Ok(false);
        }

        // ON DELETE CASCADE for junction rows, SET NULL for visit columns.
        for links in state.links.values_mut() {
            links.retain(|l| !(l.kind().master_kind() == kind && l.master_id() == id));
        }
        for visit in state.visits.values_mut() {
            let column = match kind {
                MasterKind::Referee => &mut visit.referee_id,
                MasterKind::HopeSurgeon => &mut visit.hope_surgeon_id,
                MasterKind::HopeConsultant => &mut visit.hope_consultant_id,
                MasterKind::EsicSurgeon => &mut visit.esic_surgeon_id,
                _ => continue,
            };
            if *column == Some(id) {
                *column = None;
            }
        }
        Ok(true)
    }

    // ===== Billing =====

    async fn save_bill(&self, bill: &Bill) -> AppResult<()> {
        let mut state = self.state.write().await;
        if !state.visits.contains_key(&bill.visit_id) {
            return Err(AppError::NotFound("bill refers to a record that does not exist".into()));
        }
        state.bills.insert(bill.visit_id, bill.clone());
        Ok(())
    }

    async fn bill_for_visit(&self, visit_id: Uuid) -> AppResult<Option<Bill>> {
        Ok(self.state.read().await.bills.get(&visit_id).cloned())
    }

    // ===== Gate passes =====

    async fn insert_gate_pass(&self, pass: &GatePass) -> AppResult<()> {
        let mut state = self.state.write().await;
        if !state.visits.contains_key(&pass.visit_id) {
            return Err(AppError::NotFound(
                "gate pass refers to a record that does not exist".into(),
            ));
        }
        let duplicate = state.gate_passes.contains_key(&pass.visit_id)
            || state.gate_passes.values().any(|p| p.gate_pass_no == pass.gate_pass_no);
        if duplicate {
            return Err(AppError::Conflict("gate pass already exists".into()));
        }
        state.gate_passes.insert(pass.visit_id, pass.clone());
        Ok(())
    }

    async fn gate_pass_for_visit(&self, visit_id: Uuid) -> AppResult<Option<GatePass>> {
        Ok(self.state.read().await.gate_passes.get(&visit_id).cloned())
    }

    async fn max_gate_pass_number(&self, prefix: &str) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(max_suffix(prefix, state.gate_passes.values().map(|p| p.gate_pass_no.as_str())))
    }
}
