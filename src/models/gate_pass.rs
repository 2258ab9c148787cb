use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Exit authorisation issued once a patient is discharged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GatePass {
    pub id: Uuid,
    pub visit_id: Uuid,
    /// `GP-YYYYMMDD-NNN`
    pub gate_pass_no: String,
    pub issued_at: DateTime<Utc>,
    pub issued_by: String,
    pub bill_cleared: bool,
    pub attendant_name: Option<String>,
    pub vehicle_no: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct GatePassRequest {
    #[validate(length(max = 200))]
    pub attendant_name: Option<String>,
    #[validate(length(max = 20))]
    pub vehicle_no: Option<String>,
    #[validate(length(max = 500))]
    pub remarks: Option<String>,
}
