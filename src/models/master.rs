//! Master data tables: the catalogues visits link against.
//!
//! Storage is kind-agnostic (documents keyed by [`MasterKind`]); every write
//! goes through the typed struct for its kind first, so the stored document
//! always has the shape the kind declares.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKind {
    Diagnosis,
    Complication,
    Surgery,
    Medication,
    Lab,
    Radiology,
    HopeSurgeon,
    HopeConsultant,
    EsicSurgeon,
    Referee,
}

impl MasterKind {
    pub const ALL: [MasterKind; 10] = [
        MasterKind::Diagnosis,
        MasterKind::Complication,
        MasterKind::Surgery,
        MasterKind::Medication,
        MasterKind::Lab,
        MasterKind::Radiology,
        MasterKind::HopeSurgeon,
        MasterKind::HopeConsultant,
        MasterKind::EsicSurgeon,
        MasterKind::Referee,
    ];

    /// Database table backing this kind.
    pub fn table(&self) -> &'static str {
        match self {
            MasterKind::Diagnosis => "diagnoses",
            MasterKind::Complication => "complications",
            MasterKind::Surgery => "cghs_surgery",
            MasterKind::Medication => "medication",
            MasterKind::Lab => "lab",
            MasterKind::Radiology => "radiology",
            MasterKind::HopeSurgeon => "hope_surgeons",
            MasterKind::HopeConsultant => "hope_consultants",
            MasterKind::EsicSurgeon => "esic_surgeons",
            MasterKind::Referee => "referees",
        }
    }

    /// URL segment, e.g. `/api/masters/hope-surgeons`.
    pub fn slug(&self) -> &'static str {
        match self {
            MasterKind::Diagnosis => "diagnoses",
            MasterKind::Complication => "complications",
            MasterKind::Surgery => "surgeries",
            MasterKind::Medication => "medications",
            MasterKind::Lab => "labs",
            MasterKind::Radiology => "radiology",
            MasterKind::HopeSurgeon => "hope-surgeons",
            MasterKind::HopeConsultant => "hope-consultants",
            MasterKind::EsicSurgeon => "esic-surgeons",
            MasterKind::Referee => "referees",
        }
    }

    /// Writable columns, in table order (excludes `id` and `created_at`).
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            MasterKind::Diagnosis => &["name", "icd_code", "description"],
            MasterKind::Complication => &["name", "description"],
            MasterKind::Surgery => &["name", "code", "category", "nabh_rate", "non_nabh_rate", "description"],
            MasterKind::Medication => &["name", "generic_name", "category", "dosage", "description"],
            MasterKind::Lab | MasterKind::Radiology => &["name", "category", "price", "description"],
            MasterKind::HopeSurgeon | MasterKind::HopeConsultant | MasterKind::EsicSurgeon => {
                &["name", "specialty", "department", "contact_info"]
            }
            MasterKind::Referee => &["name", "specialty", "institution", "contact_info"],
        }
    }

    /// Run a document through the typed record for this kind: unknown keys are
    /// dropped, required fields and ranges are checked.
    pub fn normalize(&self, doc: Value) -> Result<Value, AppError> {
        match self {
            MasterKind::Diagnosis => typed::<Diagnosis>(doc),
            MasterKind::Complication => typed::<Complication>(doc),
            MasterKind::Surgery => typed::<Surgery>(doc),
            MasterKind::Medication => typed::<Medication>(doc),
            MasterKind::Lab | MasterKind::Radiology => typed::<Investigation>(doc),
            MasterKind::HopeSurgeon | MasterKind::HopeConsultant | MasterKind::EsicSurgeon => {
                typed::<Practitioner>(doc)
            }
            MasterKind::Referee => typed::<Referee>(doc),
        }
    }
}

fn typed<T>(mut doc: Value) -> Result<Value, AppError>
where
    T: DeserializeOwned + Serialize + Validate,
{
    if let Value::Object(map) = &mut doc {
        for value in map.values_mut() {
            if let Value::String(text) = value {
                *text = text.trim().to_string();
            }
        }
    }
    let record: T = serde_json::from_value(doc).map_err(|e| AppError::Validation(e.to_string()))?;
    record.validate()?;
    serde_json::to_value(record).map_err(|e| AppError::Internal(e.into()))
}

impl fmt::Display for MasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for MasterKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MasterKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == s || kind.table() == s)
            .ok_or_else(|| AppError::NotFound(format!("unknown master table '{}'", s)))
    }
}

/// Fill the bookkeeping fields a fresh document needs before insert.
pub fn stamp_new(mut doc: Value) -> Value {
    if let Value::Object(map) = &mut doc {
        map.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        map.insert("created_at".into(), serde_json::json!(Utc::now()));
    }
    doc
}

pub fn document_id(doc: &Value) -> Option<Uuid> {
    doc.get("id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
}

pub fn document_name(doc: &Value) -> &str {
    doc.get("name").and_then(Value::as_str).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Diagnosis {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub icd_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Complication {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// CGHS surgery package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Surgery {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "rate cannot be negative"))]
    pub nabh_rate: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "rate cannot be negative"))]
    pub non_nabh_rate: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Medication {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Lab test or radiology study; both tables share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Investigation {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "price cannot be negative"))]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Hope surgeon, Hope consultant or ESIC surgeon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Practitioner {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Referee {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub contact_info: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
