//! Database module for the HMIS service
//!
//! `HospitalStore` is the seam between the service layer and persistence.
//! Postgres is the production backend; the in-memory store backs tests and
//! demo deployments.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{DatabaseConfig, StoreBackend};
use crate::error::AppResult;
use crate::models::{
    Bill, BillingSelection, GatePass, LinkKind, MasterKind, Patient, PatientGraph, SanctionStatus, Visit,
    VisitGraph, VisitLink,
};

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
pub use queries::PgStore;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HospitalStore: Send + Sync {
    // ===== Patients =====
    async fn insert_patient(&self, patient: &Patient) -> AppResult<()>;
    /// Insert many patients atomically; used by imports.
    async fn insert_patients(&self, patients: &[Patient]) -> AppResult<usize>;
    async fn update_patient(&self, patient: &Patient) -> AppResult<bool>;
    async fn get_patient(&self, id: Uuid) -> AppResult<Option<Patient>>;
    async fn delete_patient(&self, id: Uuid) -> AppResult<bool>;
    async fn search_patients(&self, search: Option<String>) -> AppResult<Vec<Patient>>;
    /// Highest numeric suffix among UHIDs starting with `prefix`, or 0.
    async fn max_patient_number(&self, prefix: &str) -> AppResult<i64>;

    // ===== Visits =====
    async fn insert_visit(&self, visit: &Visit) -> AppResult<()>;
    async fn update_visit(&self, visit: &Visit) -> AppResult<bool>;
    async fn get_visit(&self, id: Uuid) -> AppResult<Option<Visit>>;
    async fn delete_visit(&self, id: Uuid) -> AppResult<bool>;
    async fn max_visit_number(&self, prefix: &str) -> AppResult<i64>;
    async fn visit_ids_for_patient(&self, patient_id: Uuid) -> AppResult<Vec<Uuid>>;
    async fn update_billing_status(&self, visit_id: Uuid, selection: &BillingSelection) -> AppResult<()>;

    // ===== Junction tables =====
    /// Attach a master row; re-linking the same row updates its attributes.
    async fn link_visit(&self, visit_id: Uuid, link: &VisitLink) -> AppResult<()>;
    async fn unlink_visit(&self, visit_id: Uuid, kind: LinkKind, master_id: Uuid) -> AppResult<bool>;
    async fn set_sanction_status(&self, visit_id: Uuid, surgery_id: Uuid, status: SanctionStatus) -> AppResult<bool>;

    // ===== Nested reads =====
    /// Patients with their visits and everything linked to them. `search`
    /// matches patient name, UHID, phone or any visit id.
    async fn patient_graphs(&self, search: Option<String>) -> AppResult<Vec<PatientGraph>>;
    async fn visit_graph(&self, visit_id: Uuid) -> AppResult<Option<(Patient, VisitGraph)>>;

    // ===== Master data =====
    async fn list_masters(&self, kind: MasterKind, search: Option<String>) -> AppResult<Vec<Value>>;
    async fn get_master(&self, kind: MasterKind, id: Uuid) -> AppResult<Option<Value>>;
    async fn insert_master(&self, kind: MasterKind, doc: &Value) -> AppResult<()>;
    async fn insert_masters(&self, kind: MasterKind, docs: &[Value]) -> AppResult<usize>;
    async fn update_master(&self, kind: MasterKind, id: Uuid, doc: &Value) -> AppResult<bool>;
    async fn delete_master(&self, kind: MasterKind, id: Uuid) -> AppResult<bool>;

    // ===== Billing =====
    /// Upsert the bill and replace its sections and items in one transaction.
    async fn save_bill(&self, bill: &Bill) -> AppResult<()>;
    async fn bill_for_visit(&self, visit_id: Uuid) -> AppResult<Option<Bill>>;

    // ===== Gate passes =====
    async fn insert_gate_pass(&self, pass: &GatePass) -> AppResult<()>;
    async fn gate_pass_for_visit(&self, visit_id: Uuid) -> AppResult<Option<GatePass>>;
    async fn max_gate_pass_number(&self, prefix: &str) -> AppResult<i64>;
}

/// Database connection pool
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await
    }
}

/// Build the configured store, migrating Postgres on the way.
pub async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn HospitalStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            let database = Database::connect(config).await?;
            database.run_migrations().await?;
            tracing::info!(max_connections = config.max_connections, "connected to postgres");
            Ok(Arc::new(PgStore::new(database.pool())))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Case-insensitive "contains" used by both stores for free-text search.
pub(crate) fn matches_search(needle: &str, haystacks: &[Option<&str>]) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    haystacks
        .iter()
        .flatten()
        .any(|value| value.to_lowercase().contains(&needle))
}

/// Highest numeric suffix of the identifiers that start with `prefix`.
pub(crate) fn max_suffix<'a>(prefix: &str, ids: impl Iterator<Item = &'a str>) -> i64 {
    ids.filter_map(|id| id.strip_prefix(prefix))
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|suffix| suffix.parse::<i64>().ok())
        .max()
        .unwrap_or(0)
}
