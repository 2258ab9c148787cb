//! Postgres implementation of [`HospitalStore`].
//!
//! Patients, visits, bills and gate passes map onto typed rows. Master data is
//! read and written as JSON documents through `to_jsonb` and
//! `jsonb_populate_record`, so one code path serves every master table while
//! the typed records in `models::master` keep the documents honest.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::HospitalStore;
use crate::error::{AppError, AppResult};
use crate::models::master::{Complication, Diagnosis, Investigation, Medication, Practitioner, Referee, Surgery};
use crate::models::visit::{VisitDiagnosis, VisitMedication, VisitSurgery};
use crate::models::{
    Bill, BillLineItem, BillSection, BillingSelection, GatePass, Gender, LinkKind, MasterKind, Patient,
    PatientGraph, SanctionStatus, Visit, VisitGraph, VisitLink,
};

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Translate constraint violations into client-facing errors.
fn constraint_error(err: sqlx::Error, what: &str) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => return AppError::Conflict(format!("{} already exists", what)),
            Some(FOREIGN_KEY_VIOLATION) => {
                return AppError::NotFound(format!("{} refers to a record that does not exist", what))
            }
            _ => {}
        }
    }
    AppError::Database(err)
}

fn from_doc<T: DeserializeOwned>(doc: Value) -> AppResult<T> {
    serde_json::from_value(doc).map_err(|e| AppError::Internal(e.into()))
}

#[derive(Debug, FromRow)]
struct PatientRow {
    id: Uuid,
    patients_id: String,
    name: String,
    age: Option<i32>,
    gender: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    date_of_birth: Option<NaiveDate>,
    insurance_person_no: Option<String>,
    corporate: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Patient {
            id: row.id,
            patients_id: row.patients_id,
            name: row.name,
            age: row.age,
            gender: row.gender.as_deref().and_then(Gender::parse),
            phone: row.phone,
            address: row.address,
            date_of_birth: row.date_of_birth,
            insurance_person_no: row.insurance_person_no,
            corporate: row.corporate,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct VisitRecord {
    id: Uuid,
    visit_id: String,
    patient_id: Uuid,
    visit_type: String,
    visit_date: NaiveDate,
    admission_date: Option<NaiveDate>,
    discharge_date: Option<NaiveDate>,
    surgery_date: Option<NaiveDate>,
    status: String,
    reason_for_visit: Option<String>,
    appointment_with: Option<String>,
    referee_id: Option<Uuid>,
    hope_surgeon_id: Option<Uuid>,
    hope_consultant_id: Option<Uuid>,
    esic_surgeon_id: Option<Uuid>,
    billing_status: Option<String>,
    billing_sub_status: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<VisitRecord> for Visit {
    type Error = AppError;

    fn try_from(row: VisitRecord) -> Result<Self, Self::Error> {
        Ok(Visit {
            id: row.id,
            visit_id: row.visit_id,
            patient_id: row.patient_id,
            visit_type: row.visit_type.parse()?,
            visit_date: row.visit_date,
            admission_date: row.admission_date,
            discharge_date: row.discharge_date,
            surgery_date: row.surgery_date,
            status: row.status.parse()?,
            reason_for_visit: row.reason_for_visit,
            appointment_with: row.appointment_with,
            referee_id: row.referee_id,
            hope_surgeon_id: row.hope_surgeon_id,
            hope_consultant_id: row.hope_consultant_id,
            esic_surgeon_id: row.esic_surgeon_id,
            billing_status: row.billing_status,
            billing_sub_status: row.billing_sub_status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BillRow {
    id: Uuid,
    visit_id: Uuid,
    bill_no: String,
    category: Option<String>,
    bill_date: NaiveDate,
    total_amount: f64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SectionRow {
    id: Uuid,
    title: String,
    position: i32,
    subtotal: f64,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: Uuid,
    section_id: Uuid,
    description: String,
    code: Option<String>,
    rate: f64,
    quantity: f64,
    amount: f64,
}

pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    async fn insert_patient_with<'e, E>(executor: E, patient: &Patient) -> AppResult<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO patients (
                id, patients_id, name, age, gender, phone, address,
                date_of_birth, insurance_person_no, corporate, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(patient.id)
        .bind(&patient.patients_id)
        .bind(&patient.name)
        .bind(patient.age)
        .bind(patient.gender.map(|g| g.as_str()))
        .bind(&patient.phone)
        .bind(&patient.address)
        .bind(patient.date_of_birth)
        .bind(&patient.insurance_person_no)
        .bind(&patient.corporate)
        .bind(patient.created_at)
        .execute(executor)
        .await
        .map_err(|e| constraint_error(e, "patient"))?;
        Ok(())
    }

    /// Fetch linked master rows of one junction table, keyed by visit.
    async fn junction_docs(
        &self,
        kind: LinkKind,
        extra_columns: &str,
        visit_ids: &[Uuid],
    ) -> AppResult<Vec<sqlx::postgres::PgRow>> {
        let master = kind.master_kind();
        let sql = format!(
            "SELECT j.visit_id{extra}, to_jsonb(m.*) AS doc
             FROM {junction} j
             JOIN {table} m ON m.id = j.{column}
             WHERE j.visit_id = ANY($1)
             ORDER BY j.link_seq",
            extra = extra_columns,
            junction = kind.junction_table(),
            table = master.table(),
            column = kind.master_column(),
        );
        Ok(sqlx::query(&sql).bind(visit_ids).fetch_all(self.pool()).await?)
    }

    async fn docs_by_id<T: DeserializeOwned>(&self, kind: MasterKind, ids: Vec<Uuid>) -> AppResult<HashMap<Uuid, T>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT t.id, to_jsonb(t.*) AS doc FROM {} t WHERE t.id = ANY($1)",
            kind.table()
        );
        let rows: Vec<(Uuid, Value)> = sqlx::query_as(&sql).bind(&ids[..]).fetch_all(self.pool()).await?;
        rows.into_iter()
            .map(|(id, doc)| Ok((id, from_doc(doc)?)))
            .collect()
    }

    /// Resolve junction tables and foreign keys for a batch of visits.
    async fn load_visit_graphs(&self, visits: Vec<Visit>) -> AppResult<Vec<VisitGraph>> {
        use sqlx::Row;

        if visits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = visits.iter().map(|v| v.id).collect();

        let mut diagnoses: HashMap<Uuid, Vec<VisitDiagnosis>> = HashMap::new();
        for row in self.junction_docs(LinkKind::Diagnosis, ", j.is_primary", &ids).await? {
            diagnoses.entry(row.try_get("visit_id")?).or_default().push(VisitDiagnosis {
                diagnosis: from_doc::<Diagnosis>(row.try_get("doc")?)?,
                is_primary: row.try_get("is_primary")?,
            });
        }

        let mut surgeries: HashMap<Uuid, Vec<VisitSurgery>> = HashMap::new();
        for row in self
            .junction_docs(LinkKind::Surgery, ", j.sanction_status, j.is_primary", &ids)
            .await?
        {
            let status: String = row.try_get("sanction_status")?;
            surgeries.entry(row.try_get("visit_id")?).or_default().push(VisitSurgery {
                surgery: from_doc::<Surgery>(row.try_get("doc")?)?,
                sanction_status: status.parse()?,
                is_primary: row.try_get("is_primary")?,
            });
        }

        let mut complications: HashMap<Uuid, Vec<Complication>> = HashMap::new();
        for row in self.junction_docs(LinkKind::Complication, "", &ids).await? {
            complications
                .entry(row.try_get("visit_id")?)
                .or_default()
                .push(from_doc(row.try_get("doc")?)?);
        }

        let mut medications: HashMap<Uuid, Vec<VisitMedication>> = HashMap::new();
        for row in self
            .junction_docs(LinkKind::Medication, ", j.dose, j.frequency, j.days", &ids)
            .await?
        {
            medications.entry(row.try_get("visit_id")?).or_default().push(VisitMedication {
                medication: from_doc::<Medication>(row.try_get("doc")?)?,
                dose: row.try_get("dose")?,
                frequency: row.try_get("frequency")?,
                days: row.try_get("days")?,
            });
        }

        let mut labs: HashMap<Uuid, Vec<Investigation>> = HashMap::new();
        for row in self.junction_docs(LinkKind::Lab, "", &ids).await? {
            labs.entry(row.try_get("visit_id")?)
                .or_default()
                .push(from_doc(row.try_get("doc")?)?);
        }

        let mut radiology: HashMap<Uuid, Vec<Investigation>> = HashMap::new();
        for row in self.junction_docs(LinkKind::Radiology, "", &ids).await? {
            radiology
                .entry(row.try_get("visit_id")?)
                .or_default()
                .push(from_doc(row.try_get("doc")?)?);
        }

        let referees: HashMap<Uuid, Referee> = self
            .docs_by_id(MasterKind::Referee, visits.iter().filter_map(|v| v.referee_id).collect())
            .await?;
        let hope_surgeons: HashMap<Uuid, Practitioner> = self
            .docs_by_id(MasterKind::HopeSurgeon, visits.iter().filter_map(|v| v.hope_surgeon_id).collect())
            .await?;
        let hope_consultants: HashMap<Uuid, Practitioner> = self
            .docs_by_id(
                MasterKind::HopeConsultant,
                visits.iter().filter_map(|v| v.hope_consultant_id).collect(),
            )
            .await?;
        let esic_surgeons: HashMap<Uuid, Practitioner> = self
            .docs_by_id(MasterKind::EsicSurgeon, visits.iter().filter_map(|v| v.esic_surgeon_id).collect())
            .await?;

        let graphs = visits
            .into_iter()
            .map(|visit| {
                let id = visit.id;
                let referee = visit.referee_id.and_then(|r| referees.get(&r).cloned());
                let hope_surgeon = visit.hope_surgeon_id.and_then(|s| hope_surgeons.get(&s).cloned());
                let hope_consultant = visit.hope_consultant_id.and_then(|c| hope_consultants.get(&c).cloned());
                let esic_surgeon = visit.esic_surgeon_id.and_then(|s| esic_surgeons.get(&s).cloned());
                VisitGraph {
                    diagnoses: diagnoses.remove(&id).unwrap_or_default(),
                    surgeries: surgeries.remove(&id).unwrap_or_default(),
                    complications: complications.remove(&id).unwrap_or_default(),
                    medications: medications.remove(&id).unwrap_or_default(),
                    labs: labs.remove(&id).unwrap_or_default(),
                    radiology: radiology.remove(&id).unwrap_or_default(),
                    referee,
                    hope_surgeon,
                    hope_consultant,
                    esic_surgeon,
                    visit,
                }
            })
            .collect();
        Ok(graphs)
    }

    async fn visits_for_patients(&self, patient_ids: &[Uuid]) -> AppResult<Vec<Visit>> {
        let rows: Vec<VisitRecord> = sqlx::query_as(
            "SELECT * FROM visits WHERE patient_id = ANY($1) ORDER BY visit_date DESC, visit_id",
        )
        .bind(patient_ids)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Visit::try_from).collect()
    }

    async fn load_sections(&self, bill_id: Uuid) -> AppResult<Vec<BillSection>> {
        let sections: Vec<SectionRow> =
            sqlx::query_as("SELECT id, title, position, subtotal FROM bill_sections WHERE bill_id = $1 ORDER BY position")
                .bind(bill_id)
                .fetch_all(self.pool())
                .await?;
        let section_ids: Vec<Uuid> = sections.iter().map(|s| s.id).collect();
        let items: Vec<ItemRow> = sqlx::query_as(
            "SELECT id, section_id, description, code, rate, quantity, amount
             FROM bill_line_items WHERE section_id = ANY($1) ORDER BY position",
        )
        .bind(&section_ids[..])
        .fetch_all(self.pool())
        .await?;

        let mut by_section: HashMap<Uuid, Vec<BillLineItem>> = HashMap::new();
        for item in items {
            by_section.entry(item.section_id).or_default().push(BillLineItem {
                id: item.id,
                description: item.description,
                code: item.code,
                rate: item.rate,
                quantity: item.quantity,
                amount: item.amount,
            });
        }

        Ok(sections
            .into_iter()
            .map(|s| BillSection {
                items: by_section.remove(&s.id).unwrap_or_default(),
                id: s.id,
                title: s.title,
                position: s.position,
                subtotal: s.subtotal,
            })
            .collect())
    }
}

#[async_trait]
impl HospitalStore for PgStore {
    // ===== Patients =====

    #[instrument(skip(self, patient), fields(uhid = %patient.patients_id))]
    async fn insert_patient(&self, patient: &Patient) -> AppResult<()> {
        Self::insert_patient_with(self.pool(), patient).await
    }

    #[instrument(skip(self, patients), fields(count = patients.len()))]
    async fn insert_patients(&self, patients: &[Patient]) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;
        for patient in patients {
            Self::insert_patient_with(&mut tx, patient).await?;
        }
        tx.commit().await?;
        Ok(patients.len())
    }

    async fn update_patient(&self, patient: &Patient) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE patients SET
                name = $2, age = $3, gender = $4, phone = $5, address = $6,
                date_of_birth = $7, insurance_person_no = $8, corporate = $9
             WHERE id = $1",
        )
        .bind(patient.id)
        .bind(&patient.name)
        .bind(patient.age)
        .bind(patient.gender.map(|g| g.as_str()))
        .bind(&patient.phone)
        .bind(&patient.address)
        .bind(patient.date_of_birth)
        .bind(&patient.insurance_person_no)
        .bind(&patient.corporate)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_patient(&self, id: Uuid) -> AppResult<Option<Patient>> {
        let row: Option<PatientRow> = sqlx::query_as("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Patient::from))
    }

    async fn delete_patient(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_patients(&self, search: Option<String>) -> AppResult<Vec<Patient>> {
        let rows: Vec<PatientRow> = sqlx::query_as(
            "SELECT * FROM patients
             WHERE $1::text IS NULL
                OR name ILIKE '%' || $1 || '%'
                OR patients_id ILIKE '%' || $1 || '%'
                OR phone ILIKE '%' || $1 || '%'
             ORDER BY created_at DESC",
        )
        .bind(search)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Patient::from).collect())
    }

    async fn max_patient_number(&self, prefix: &str) -> AppResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(MAX(CAST(substr(patients_id, $2) AS BIGINT)), 0)
             FROM patients
             WHERE patients_id LIKE $1 || '%' AND substr(patients_id, $2) ~ '^[0-9]+$'",
        )
        .bind(prefix)
        .bind(prefix.len() as i32 + 1)
        .fetch_one(self.pool())
        .await?)
    }

    // ===== Visits =====

    #[instrument(skip(self, visit), fields(visit_id = %visit.visit_id))]
    async fn insert_visit(&self, visit: &Visit) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO visits (
                id, visit_id, patient_id, visit_type, visit_date, admission_date,
                discharge_date, surgery_date, status, reason_for_visit, appointment_with,
                referee_id, hope_surgeon_id, hope_consultant_id, esic_surgeon_id,
                billing_status, billing_sub_status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(visit.id)
        .bind(&visit.visit_id)
        .bind(visit.patient_id)
        .bind(visit.visit_type.as_str())
        .bind(visit.visit_date)
        .bind(visit.admission_date)
        .bind(visit.discharge_date)
        .bind(visit.surgery_date)
        .bind(visit.status.as_str())
        .bind(&visit.reason_for_visit)
        .bind(&visit.appointment_with)
        .bind(visit.referee_id)
        .bind(visit.hope_surgeon_id)
        .bind(visit.hope_consultant_id)
        .bind(visit.esic_surgeon_id)
        .bind(&visit.billing_status)
        .bind(&visit.billing_sub_status)
        .bind(visit.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| constraint_error(e, "visit"))?;
        Ok(())
    }

    async fn update_visit(&self, visit: &Visit) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE visits SET
                visit_type = $2, visit_date = $3, admission_date = $4, discharge_date = $5,
                surgery_date = $6, status = $7, reason_for_visit = $8, appointment_with = $9,
                referee_id = $10, hope_surgeon_id = $11, hope_consultant_id = $12, esic_surgeon_id = $13
             WHERE id = $1",
        )
        .bind(visit.id)
        .bind(visit.visit_type.as_str())
        .bind(visit.visit_date)
        .bind(visit.admission_date)
        .bind(visit.discharge_date)
        .bind(visit.surgery_date)
        .bind(visit.status.as_str())
        .bind(&visit.reason_for_visit)
        .bind(&visit.appointment_with)
        .bind(visit.referee_id)
        .bind(visit.hope_surgeon_id)
        .bind(visit.hope_consultant_id)
        .bind(visit.esic_surgeon_id)
        .execute(self.pool())
        .await
        .map_err(|e| constraint_error(e, "visit"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_visit(&self, id: Uuid) -> AppResult<Option<Visit>> {
        let row: Option<VisitRecord> = sqlx::query_as("SELECT * FROM visits WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(Visit::try_from).transpose()
    }

    async fn delete_visit(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM visits WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn visit_ids_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(sqlx::query_scalar("SELECT id FROM visits WHERE patient_id = $1")
            .bind(patient_id)
            .fetch_all(self.pool())
            .await?)
    }

    async fn max_visit_number(&self, prefix: &str) -> AppResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(MAX(CAST(substr(visit_id, $2) AS BIGINT)), 0)
             FROM visits
             WHERE visit_id LIKE $1 || '%' AND substr(visit_id, $2) ~ '^[0-9]+$'",
        )
        .bind(prefix)
        .bind(prefix.len() as i32 + 1)
        .fetch_one(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn update_billing_status(&self, visit_id: Uuid, selection: &BillingSelection) -> AppResult<()> {
        let result = sqlx::query("UPDATE visits SET billing_status = $2, billing_sub_status = $3 WHERE id = $1")
            .bind(visit_id)
            .bind(&selection.status)
            .bind(&selection.sub_status)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("visit", visit_id));
        }
        Ok(())
    }

    // ===== Junction tables =====

    #[instrument(skip(self, link), fields(kind = ?link.kind()))]
    async fn link_visit(&self, visit_id: Uuid, link: &VisitLink) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let kind = link.kind();
        let primary = matches!(
            link,
            VisitLink::Diagnosis { is_primary: true, .. } | VisitLink::Surgery { is_primary: true, .. }
        );
        if primary {
            sqlx::query(&format!(
                "UPDATE {} SET is_primary = FALSE WHERE visit_id = $1",
                kind.junction_table()
            ))
            .bind(visit_id)
            .execute(&mut tx)
            .await?;
        }

        let result = match link {
            VisitLink::Diagnosis { id, is_primary } => {
                sqlx::query(
                    "INSERT INTO visit_diagnoses (visit_id, diagnosis_id, is_primary) VALUES ($1, $2, $3)
                     ON CONFLICT (visit_id, diagnosis_id) DO UPDATE SET is_primary = EXCLUDED.is_primary",
                )
                .bind(visit_id)
                .bind(*id)
                .bind(*is_primary)
                .execute(&mut tx)
                .await
            }
            VisitLink::Surgery { id, sanction_status, is_primary } => {
                sqlx::query(
                    "INSERT INTO visit_surgeries (visit_id, surgery_id, sanction_status, is_primary)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (visit_id, surgery_id) DO UPDATE
                     SET sanction_status = EXCLUDED.sanction_status, is_primary = EXCLUDED.is_primary",
                )
                .bind(visit_id)
                .bind(*id)
                .bind(sanction_status.as_str())
                .bind(*is_primary)
                .execute(&mut tx)
                .await
            }
            VisitLink::Medication { id, dose, frequency, days } => {
                sqlx::query(
                    "INSERT INTO visit_medications (visit_id, medication_id, dose, frequency, days)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (visit_id, medication_id) DO UPDATE
                     SET dose = EXCLUDED.dose, frequency = EXCLUDED.frequency, days = EXCLUDED.days",
                )
                .bind(visit_id)
                .bind(*id)
                .bind(dose.as_deref())
                .bind(frequency.as_deref())
                .bind(*days)
                .execute(&mut tx)
                .await
            }
            VisitLink::Complication { id } | VisitLink::Lab { id } | VisitLink::Radiology { id } => {
                let sql = format!(
                    "INSERT INTO {} (visit_id, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    kind.junction_table(),
                    kind.master_column()
                );
                sqlx::query(&sql).bind(visit_id).bind(*id).execute(&mut tx).await
            }
        };
        result.map_err(|e| constraint_error(e, "visit link"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn unlink_visit(&self, visit_id: Uuid, kind: LinkKind, master_id: Uuid) -> AppResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE visit_id = $1 AND {} = $2",
            kind.junction_table(),
            kind.master_column()
        );
        let result = sqlx::query(&sql)
            .bind(visit_id)
            .bind(master_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_sanction_status(&self, visit_id: Uuid, surgery_id: Uuid, status: SanctionStatus) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE visit_surgeries SET sanction_status = $3 WHERE visit_id = $1 AND surgery_id = $2")
                .bind(visit_id)
                .bind(surgery_id)
                .bind(status.as_str())
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // ===== Nested reads =====

    #[instrument(skip(self))]
    async fn patient_graphs(&self, search: Option<String>) -> AppResult<Vec<PatientGraph>> {
        let patients: Vec<PatientRow> = sqlx::query_as(
            "SELECT p.* FROM patients p
             WHERE $1::text IS NULL
                OR p.name ILIKE '%' || $1 || '%'
                OR p.patients_id ILIKE '%' || $1 || '%'
                OR p.phone ILIKE '%' || $1 || '%'
                OR EXISTS (
                    SELECT 1 FROM visits v
                    WHERE v.patient_id = p.id AND v.visit_id ILIKE '%' || $1 || '%'
                )
             ORDER BY p.created_at DESC",
        )
        .bind(search)
        .fetch_all(self.pool())
        .await?;

        let patient_ids: Vec<Uuid> = patients.iter().map(|p| p.id).collect();
        let visits = self.visits_for_patients(&patient_ids).await?;
        let mut by_patient: HashMap<Uuid, Vec<VisitGraph>> = HashMap::new();
        for graph in self.load_visit_graphs(visits).await? {
            by_patient.entry(graph.visit.patient_id).or_default().push(graph);
        }
        debug!(patients = patients.len(), "loaded patient graphs");

        Ok(patients
            .into_iter()
            .map(|row| {
                let visits = by_patient.remove(&row.id).unwrap_or_default();
                PatientGraph {
                    patient: row.into(),
                    visits,
                }
            })
            .collect())
    }

    async fn visit_graph(&self, visit_id: Uuid) -> AppResult<Option<(Patient, VisitGraph)>> {
        let visit = match self.get_visit(visit_id).await? {
            Some(visit) => visit,
            None => return Ok(None),
        };
        let patient = self
            .get_patient(visit.patient_id)
            .await?
            .ok_or_else(|| AppError::not_found("patient", visit.patient_id))?;
        let graph = self.load_visit_graphs(vec![visit]).await?.pop();
        Ok(graph.map(|g| (patient, g)))
    }

    // ===== Master data =====

    async fn list_masters(&self, kind: MasterKind, search: Option<String>) -> AppResult<Vec<Value>> {
        let sql = format!(
            "SELECT to_jsonb(t.*) AS doc FROM {} t
             WHERE $1::text IS NULL OR t.name ILIKE '%' || $1 || '%'
             ORDER BY t.name",
            kind.table()
        );
        Ok(sqlx::query_scalar(&sql).bind(search).fetch_all(self.pool()).await?)
    }

    async fn get_master(&self, kind: MasterKind, id: Uuid) -> AppResult<Option<Value>> {
        let sql = format!("SELECT to_jsonb(t.*) AS doc FROM {} t WHERE t.id = $1", kind.table());
        Ok(sqlx::query_scalar(&sql).bind(id).fetch_optional(self.pool()).await?)
    }

    #[instrument(skip(self, doc))]
    async fn insert_master(&self, kind: MasterKind, doc: &Value) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)",
            table = kind.table()
        );
        sqlx::query(&sql)
            .bind(doc)
            .execute(self.pool())
            .await
            .map_err(|e| constraint_error(e, kind.slug()))?;
        Ok(())
    }

    #[instrument(skip(self, docs), fields(count = docs.len()))]
    async fn insert_masters(&self, kind: MasterKind, docs: &[Value]) -> AppResult<usize> {
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)",
            table = kind.table()
        );
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(&sql)
                .bind(doc)
                .execute(&mut tx)
                .await
                .map_err(|e| constraint_error(e, kind.slug()))?;
        }
        tx.commit().await?;
        Ok(docs.len())
    }

    async fn update_master(&self, kind: MasterKind, id: Uuid, doc: &Value) -> AppResult<bool> {
        let columns = kind.columns().join(", ");
        let sql = format!(
            "UPDATE {table} SET ({columns}) =
                (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $2))
             WHERE id = $1",
            table = kind.table(),
            columns = columns,
        );
        let result = sqlx::query(&sql).bind(id).bind(doc).execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_master(&self, kind: MasterKind, id: Uuid) -> AppResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
        let result = sqlx::query(&sql).bind(id).execute(self.pool()).await?;
        Ok(result.rows_affected() > 0)
    }

    // ===== Billing =====

    #[instrument(skip(self, bill), fields(bill_no = %bill.bill_no))]
    async fn save_bill(&self, bill: &Bill) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO bills (id, visit_id, bill_no, category, bill_date, total_amount, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (visit_id) DO UPDATE SET
                category = EXCLUDED.category,
                bill_date = EXCLUDED.bill_date,
                total_amount = EXCLUDED.total_amount,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(bill.id)
        .bind(bill.visit_id)
        .bind(&bill.bill_no)
        .bind(&bill.category)
        .bind(bill.bill_date)
        .bind(bill.total_amount)
        .bind(bill.updated_at)
        .execute(&mut tx)
        .await
        .map_err(|e| constraint_error(e, "bill"))?;

        sqlx::query("DELETE FROM bill_sections WHERE bill_id = $1")
            .bind(bill.id)
            .execute(&mut tx)
            .await?;

        for section in &bill.sections {
            sqlx::query("INSERT INTO bill_sections (id, bill_id, title, position, subtotal) VALUES ($1, $2, $3, $4, $5)")
                .bind(section.id)
                .bind(bill.id)
                .bind(&section.title)
                .bind(section.position)
                .bind(section.subtotal)
                .execute(&mut tx)
                .await?;

            for (position, item) in section.items.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO bill_line_items (id, section_id, position, description, code, rate, quantity, amount)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(item.id)
                .bind(section.id)
                .bind(position as i32)
                .bind(&item.description)
                .bind(&item.code)
                .bind(item.rate)
                .bind(item.quantity)
                .bind(item.amount)
                .execute(&mut tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn bill_for_visit(&self, visit_id: Uuid) -> AppResult<Option<Bill>> {
        let row: Option<BillRow> = sqlx::query_as(
            "SELECT id, visit_id, bill_no, category, bill_date, total_amount, updated_at
             FROM bills WHERE visit_id = $1",
        )
        .bind(visit_id)
        .fetch_optional(self.pool())
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let sections = self.load_sections(row.id).await?;
        Ok(Some(Bill {
            id: row.id,
            visit_id: row.visit_id,
            bill_no: row.bill_no,
            category: row.category,
            bill_date: row.bill_date,
            sections,
            total_amount: row.total_amount,
            updated_at: row.updated_at,
        }))
    }

    // ===== Gate passes =====

    async fn insert_gate_pass(&self, pass: &GatePass) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO gate_passes (
                id, visit_id, gate_pass_no, issued_at, issued_by,
                bill_cleared, attendant_name, vehicle_no, remarks
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(pass.id)
        .bind(pass.visit_id)
        .bind(&pass.gate_pass_no)
        .bind(pass.issued_at)
        .bind(&pass.issued_by)
        .bind(pass.bill_cleared)
        .bind(&pass.attendant_name)
        .bind(&pass.vehicle_no)
        .bind(&pass.remarks)
        .execute(self.pool())
        .await
        .map_err(|e| constraint_error(e, "gate pass"))?;
        Ok(())
    }

    async fn gate_pass_for_visit(&self, visit_id: Uuid) -> AppResult<Option<GatePass>> {
        Ok(sqlx::query_as("SELECT * FROM gate_passes WHERE visit_id = $1")
            .bind(visit_id)
            .fetch_optional(self.pool())
            .await?)
    }

    async fn max_gate_pass_number(&self, prefix: &str) -> AppResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(MAX(CAST(substr(gate_pass_no, $2) AS BIGINT)), 0)
             FROM gate_passes
             WHERE gate_pass_no LIKE $1 || '%' AND substr(gate_pass_no, $2) ~ '^[0-9]+$'",
        )
        .bind(prefix)
        .bind(prefix.len() as i32 + 1)
        .fetch_one(self.pool())
        .await?)
    }
}
