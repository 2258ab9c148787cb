use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Ten digit Indian mobile number, no country prefix.
pub static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[6-9]\d{9}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }

    /// Lenient parse used by imports ("M", "female", ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Some(Gender::Male),
            "f" | "female" => Some(Gender::Female),
            "o" | "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// Permanent patient record. A patient owns zero or more visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    /// Hospital UHID, e.g. `UHID2406150003`.
    pub patients_id: String,
    pub name: String,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub insurance_person_no: Option<String>,
    /// Payer: ESIC, CGHS, private, ...
    pub corporate: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Registration form payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewPatient {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(range(min = 0, max = 150, message = "age must be between 0 and 150"))]
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    #[validate(regex(path = "PHONE_REGEX", message = "phone must be a 10 digit mobile number"))]
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub insurance_person_no: Option<String>,
    pub corporate: Option<String>,
}

impl NewPatient {
    /// Trim text fields and turn blanks into `None`.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        for field in [
            &mut self.phone,
            &mut self.address,
            &mut self.insurance_person_no,
            &mut self.corporate,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self
    }

    pub fn into_patient(self, patients_id: String) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            patients_id,
            name: self.name,
            age: self.age,
            gender: self.gender,
            phone: self.phone,
            address: self.address,
            date_of_birth: self.date_of_birth,
            insurance_person_no: self.insurance_person_no,
            corporate: self.corporate,
            created_at: Utc::now(),
        }
    }
}
