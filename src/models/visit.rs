use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::master::{Complication, Diagnosis, Investigation, Medication, Practitioner, Referee, Surgery};
use super::patient::Patient;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitType {
    #[serde(rename = "IPD")]
    Ipd,
    #[serde(rename = "OPD")]
    Opd,
    #[serde(alias = "EMERGENCY")]
    Emergency,
}

impl VisitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitType::Ipd => "IPD",
            VisitType::Opd => "OPD",
            VisitType::Emergency => "Emergency",
        }
    }
}

impl FromStr for VisitType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IPD" => Ok(VisitType::Ipd),
            "OPD" => Ok(VisitType::Opd),
            "EMERGENCY" => Ok(VisitType::Emergency),
            other => Err(AppError::Validation(format!("unknown visit type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Scheduled,
    Admitted,
    Discharged,
    Cancelled,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Scheduled => "scheduled",
            VisitStatus::Admitted => "admitted",
            VisitStatus::Discharged => "discharged",
            VisitStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for VisitStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(VisitStatus::Scheduled),
            "admitted" => Ok(VisitStatus::Admitted),
            "discharged" => Ok(VisitStatus::Discharged),
            "cancelled" => Ok(VisitStatus::Cancelled),
            other => Err(AppError::Validation(format!("unknown visit status '{}'", other))),
        }
    }
}

/// Insurance / administrative approval state of a surgery on a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SanctionStatus {
    Sanctioned,
    #[default]
    #[serde(rename = "Not Sanctioned")]
    NotSanctioned,
    Pending,
}

impl SanctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SanctionStatus::Sanctioned => "Sanctioned",
            SanctionStatus::NotSanctioned => "Not Sanctioned",
            SanctionStatus::Pending => "Pending",
        }
    }
}

impl fmt::Display for SanctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SanctionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sanctioned" => Ok(SanctionStatus::Sanctioned),
            "Not Sanctioned" => Ok(SanctionStatus::NotSanctioned),
            "Pending" => Ok(SanctionStatus::Pending),
            other => Err(AppError::Validation(format!("unknown sanction status '{}'", other))),
        }
    }
}

/// One admission / encounter episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: Uuid,
    /// Human readable id, e.g. `IH24061502`.
    pub visit_id: String,
    pub patient_id: Uuid,
    pub visit_type: VisitType,
    pub visit_date: NaiveDate,
    pub admission_date: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    pub surgery_date: Option<NaiveDate>,
    pub status: VisitStatus,
    pub reason_for_visit: Option<String>,
    pub appointment_with: Option<String>,
    pub referee_id: Option<Uuid>,
    pub hope_surgeon_id: Option<Uuid>,
    pub hope_consultant_id: Option<Uuid>,
    pub esic_surgeon_id: Option<Uuid>,
    pub billing_status: Option<String>,
    pub billing_sub_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewVisit {
    pub patient_id: Uuid,
    pub visit_type: VisitType,
    pub visit_date: NaiveDate,
    pub admission_date: Option<NaiveDate>,
    pub surgery_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub reason_for_visit: Option<String>,
    pub appointment_with: Option<String>,
    pub referee_id: Option<Uuid>,
    pub hope_surgeon_id: Option<Uuid>,
    pub hope_consultant_id: Option<Uuid>,
    pub esic_surgeon_id: Option<Uuid>,
}

impl NewVisit {
    pub fn into_visit(self, visit_id: String) -> Visit {
        let status = match self.visit_type {
            VisitType::Ipd | VisitType::Emergency if self.admission_date.is_some() => VisitStatus::Admitted,
            _ => VisitStatus::Scheduled,
        };
        Visit {
            id: Uuid::new_v4(),
            visit_id,
            patient_id: self.patient_id,
            visit_type: self.visit_type,
            visit_date: self.visit_date,
            admission_date: self.admission_date,
            discharge_date: None,
            surgery_date: self.surgery_date,
            status,
            reason_for_visit: self.reason_for_visit,
            appointment_with: self.appointment_with,
            referee_id: self.referee_id,
            hope_surgeon_id: self.hope_surgeon_id,
            hope_consultant_id: self.hope_consultant_id,
            esic_surgeon_id: self.esic_surgeon_id,
            billing_status: None,
            billing_sub_status: None,
            created_at: Utc::now(),
        }
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct VisitUpdate {
    pub visit_type: Option<VisitType>,
    pub visit_date: Option<NaiveDate>,
    pub admission_date: Option<NaiveDate>,
    pub discharge_date: Option<NaiveDate>,
    pub surgery_date: Option<NaiveDate>,
    pub status: Option<VisitStatus>,
    #[validate(length(max = 500))]
    pub reason_for_visit: Option<String>,
    pub appointment_with: Option<String>,
    pub referee_id: Option<Uuid>,
    pub hope_surgeon_id: Option<Uuid>,
    pub hope_consultant_id: Option<Uuid>,
    pub esic_surgeon_id: Option<Uuid>,
}

impl VisitUpdate {
    pub fn apply(self, visit: &mut Visit) -> Result<(), AppError> {
        if let Some(v) = self.visit_type {
            visit.visit_type = v;
        }
        if let Some(v) = self.visit_date {
            visit.visit_date = v;
        }
        if self.admission_date.is_some() {
            visit.admission_date = self.admission_date;
        }
        if self.discharge_date.is_some() {
            visit.discharge_date = self.discharge_date;
        }
        if self.surgery_date.is_some() {
            visit.surgery_date = self.surgery_date;
        }
        if let Some(status) = self.status {
            visit.status = status;
        }
        if self.reason_for_visit.is_some() {
            visit.reason_for_visit = self.reason_for_visit;
        }
        if self.appointment_with.is_some() {
            visit.appointment_with = self.appointment_with;
        }
        if self.referee_id.is_some() {
            visit.referee_id = self.referee_id;
        }
        if self.hope_surgeon_id.is_some() {
            visit.hope_surgeon_id = self.hope_surgeon_id;
        }
        if self.hope_consultant_id.is_some() {
            visit.hope_consultant_id = self.hope_consultant_id;
        }
        if self.esic_surgeon_id.is_some() {
            visit.esic_surgeon_id = self.esic_surgeon_id;
        }

        if let (Some(admitted), Some(discharged)) = (visit.admission_date, visit.discharge_date) {
            if discharged < admitted {
                return Err(AppError::Validation(
                    "discharge date cannot precede admission date".into(),
                ));
            }
        }
        if visit.discharge_date.is_some() && visit.status != VisitStatus::Cancelled {
            visit.status = VisitStatus::Discharged;
        }
        Ok(())
    }
}

/// Junction tables hanging off a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Diagnosis,
    Surgery,
    Complication,
    Medication,
    Lab,
    Radiology,
}

impl LinkKind {
    pub fn junction_table(&self) -> &'static str {
        match self {
            LinkKind::Diagnosis => "visit_diagnoses",
            LinkKind::Surgery => "visit_surgeries",
            LinkKind::Complication => "visit_complications",
            LinkKind::Medication => "visit_medications",
            LinkKind::Lab => "visit_labs",
            LinkKind::Radiology => "visit_radiology",
        }
    }

    /// Foreign key column pointing at the master row.
    pub fn master_column(&self) -> &'static str {
        match self {
            LinkKind::Diagnosis => "diagnosis_id",
            LinkKind::Surgery => "surgery_id",
            LinkKind::Complication => "complication_id",
            LinkKind::Medication => "medication_id",
            LinkKind::Lab => "lab_id",
            LinkKind::Radiology => "radiology_id",
        }
    }

    pub fn master_kind(&self) -> super::master::MasterKind {
        use super::master::MasterKind;
        match self {
            LinkKind::Diagnosis => MasterKind::Diagnosis,
            LinkKind::Surgery => MasterKind::Surgery,
            LinkKind::Complication => MasterKind::Complication,
            LinkKind::Medication => MasterKind::Medication,
            LinkKind::Lab => MasterKind::Lab,
            LinkKind::Radiology => MasterKind::Radiology,
        }
    }
}

impl FromStr for LinkKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diagnosis" | "diagnoses" => Ok(LinkKind::Diagnosis),
            "surgery" | "surgeries" => Ok(LinkKind::Surgery),
            "complication" | "complications" => Ok(LinkKind::Complication),
            "medication" | "medications" => Ok(LinkKind::Medication),
            "lab" | "labs" => Ok(LinkKind::Lab),
            "radiology" => Ok(LinkKind::Radiology),
            other => Err(AppError::NotFound(format!("unknown visit link '{}'", other))),
        }
    }
}

/// Request to attach a master row to a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisitLink {
    Diagnosis {
        id: Uuid,
        #[serde(default)]
        is_primary: bool,
    },
    Surgery {
        id: Uuid,
        #[serde(default)]
        sanction_status: SanctionStatus,
        #[serde(default)]
        is_primary: bool,
    },
    Complication {
        id: Uuid,
    },
    Medication {
        id: Uuid,
        #[serde(default)]
        dose: Option<String>,
        #[serde(default)]
        frequency: Option<String>,
        #[serde(default)]
        days: Option<i32>,
    },
    Lab {
        id: Uuid,
    },
    Radiology {
        id: Uuid,
    },
}

impl VisitLink {
    pub fn kind(&self) -> LinkKind {
        match self {
            VisitLink::Diagnosis { .. } => LinkKind::Diagnosis,
            VisitLink::Surgery { .. } => LinkKind::Surgery,
            VisitLink::Complication { .. } => LinkKind::Complication,
            VisitLink::Medication { .. } => LinkKind::Medication,
            VisitLink::Lab { .. } => LinkKind::Lab,
            VisitLink::Radiology { .. } => LinkKind::Radiology,
        }
    }

    pub fn master_id(&self) -> Uuid {
        match self {
            VisitLink::Diagnosis { id, .. }
            | VisitLink::Surgery { id, .. }
            | VisitLink::Complication { id }
            | VisitLink::Medication { id, .. }
            | VisitLink::Lab { id }
            | VisitLink::Radiology { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitDiagnosis {
    pub diagnosis: Diagnosis,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSurgery {
    pub surgery: Surgery,
    pub sanction_status: SanctionStatus,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitMedication {
    pub medication: Medication,
    pub dose: Option<String>,
    pub frequency: Option<String>,
    pub days: Option<i32>,
}

/// A visit together with everything its junction tables and foreign keys
/// point at, as returned by the nested visit query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitGraph {
    pub visit: Visit,
    pub diagnoses: Vec<VisitDiagnosis>,
    pub surgeries: Vec<VisitSurgery>,
    pub complications: Vec<Complication>,
    pub medications: Vec<VisitMedication>,
    pub labs: Vec<Investigation>,
    pub radiology: Vec<Investigation>,
    pub referee: Option<Referee>,
    pub hope_surgeon: Option<Practitioner>,
    pub hope_consultant: Option<Practitioner>,
    pub esic_surgeon: Option<Practitioner>,
}

impl VisitGraph {
    pub fn bare(visit: Visit) -> Self {
        Self {
            visit,
            diagnoses: Vec::new(),
            surgeries: Vec::new(),
            complications: Vec::new(),
            medications: Vec::new(),
            labs: Vec::new(),
            radiology: Vec::new(),
            referee: None,
            hope_surgeon: None,
            hope_consultant: None,
            esic_surgeon: None,
        }
    }

    /// Primary surgery, falling back to the first one linked.
    pub fn primary_surgery(&self) -> Option<&VisitSurgery> {
        self.surgeries
            .iter()
            .find(|s| s.is_primary)
            .or_else(|| self.surgeries.first())
    }

    pub fn primary_diagnosis(&self) -> Option<&Diagnosis> {
        self.diagnoses
            .iter()
            .find(|d| d.is_primary)
            .or_else(|| self.diagnoses.first())
            .map(|d| &d.diagnosis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientGraph {
    pub patient: Patient,
    pub visits: Vec<VisitGraph>,
}

/// Flat per-visit view record, one per (patient, visit) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRow {
    pub patient_uuid: Uuid,
    pub visit_uuid: Uuid,
    pub patients_id: String,
    pub visit_id: String,
    pub patient_name: String,
    pub age: String,
    pub gender: String,
    pub phone: String,
    pub corporate: String,
    pub insurance_person_no: String,
    pub visit_type: String,
    pub visit_date: NaiveDate,
    pub admission_date: String,
    pub discharge_date: String,
    pub status: String,
    pub diagnosis: String,
    pub surgery: String,
    pub surgery_code: String,
    pub surgery_category: String,
    pub sanction_status: String,
    pub complications: String,
    pub referee: String,
    pub surgeon: String,
    pub consultant: String,
    pub billing_status: String,
    pub billing_sub_status: String,
}
