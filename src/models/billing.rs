use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillLineItem {
    pub id: Uuid,
    pub description: String,
    pub code: Option<String>,
    pub rate: f64,
    pub quantity: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillSection {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub items: Vec<BillLineItem>,
    pub subtotal: f64,
}

/// Final bill of a visit, with its sections and line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub bill_no: String,
    /// Payer category printed on the bill (ESIC, CGHS, private).
    pub category: Option<String>,
    pub bill_date: NaiveDate,
    pub sections: Vec<BillSection>,
    pub total_amount: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineItemDraft {
    #[validate(length(min = 1, message = "line item description is required"))]
    pub description: String,
    #[serde(default)]
    pub code: Option<String>,
    #[validate(range(min = 0.0, message = "rate cannot be negative"))]
    pub rate: f64,
    #[validate(range(min = 0.0, message = "quantity cannot be negative"))]
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SectionDraft {
    #[validate(length(min = 1, message = "section title is required"))]
    pub title: String,
    #[validate]
    #[serde(default)]
    pub items: Vec<LineItemDraft>,
}

/// Bill editor payload. Amounts are always recomputed server side.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BillDraft {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub bill_date: Option<NaiveDate>,
    #[validate]
    #[serde(default)]
    pub sections: Vec<SectionDraft>,
}

impl BillDraft {
    /// Trim section titles and line item text; blank codes become `None`.
    pub fn normalized(mut self) -> Self {
        for section in &mut self.sections {
            section.title = section.title.trim().to_string();
            for item in &mut section.items {
                item.description = item.description.trim().to_string();
                item.code = item
                    .code
                    .take()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty());
            }
        }
        self
    }
}

/// Current billing selection of a visit (the two cascading dropdowns).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingSelection {
    pub status: Option<String>,
    pub sub_status: Option<String>,
}

impl BillingSelection {
    pub fn new(status: Option<&str>, sub_status: Option<&str>) -> Self {
        Self {
            status: status.map(str::to_string),
            sub_status: sub_status.map(str::to_string),
        }
    }
}
